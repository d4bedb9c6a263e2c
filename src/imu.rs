use crate::data_provider::*;
use crate::error::{AcquisitionError, DeviceError};
use log::{debug, info, trace, warn};
use nalgebra::{vector, Matrix3};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

/// A line oriented link to the sensor board.
pub trait LineTransport: Send + Sync {
    fn is_open(&self) -> bool;

    /// Queues one line, without its terminator.
    fn send_line(&self, line: &str) -> Result<(), DeviceError>;

    /// Waits for at most `timeout`. Errors once the link is gone.
    fn recv_line(&self, timeout: Duration) -> Result<Option<String>, DeviceError>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DeviceCommand {
    StreamSamples(bool),
    StreamOrientation(bool),
    Offsets(DeviceOffsets),
}

fn on_off(on: bool) -> &'static str {
    if on {
        "on"
    } else {
        "off"
    }
}

impl fmt::Display for DeviceCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceCommand::StreamSamples(on) => write!(f, "stream samples {}", on_off(*on)),
            DeviceCommand::StreamOrientation(on) => write!(f, "stream orient {}", on_off(*on)),
            DeviceCommand::Offsets(offsets) => {
                let o = offsets.offset;
                write!(f, "offsets {} {} {} {}", offsets.sensor.sensor().tag(), o.x, o.y, o.z)?;
                // row major
                for r in 0..3 {
                    for c in 0..3 {
                        write!(f, " {}", offsets.matrix[(r, c)])?;
                    }
                }
                Ok(())
            }
        }
    }
}

/// Splits off the leading tag and collapses repeated whitespace so the
/// fields can be scanned with single space separators.
fn split_tag(line: &str) -> (&str, String) {
    let mut fields = line.split_whitespace();
    let tag = fields.next().unwrap_or("");
    (tag, fields.collect::<Vec<_>>().join(" "))
}

fn finite<const N: usize>(line: &str, values: [f64; N]) -> Result<[f64; N], AcquisitionError> {
    if values.iter().all(|v| v.is_finite()) {
        Ok(values)
    } else {
        Err(AcquisitionError::Malformed(line.to_string()))
    }
}

/// Parses one device line into zero or more samples appended to `out`.
/// Nothing is appended on error.
pub fn parse_samples(line: &str, out: &mut VecDeque<Sample>) -> Result<(), AcquisitionError> {
    let (tag, fields) = split_tag(line);
    let malformed = || AcquisitionError::Malformed(line.to_string());

    let sensor = match tag {
        "mag" => SensorType::Magnetometer,
        "acc" => SensorType::Accelerometer,
        "gyro" => SensorType::Gyroscope,
        "imu" => {
            let mut gyro_x = 0.0;
            let mut gyro_y = 0.0;
            let mut gyro_z = 0.0;
            let mut acc_x = 0.0;
            let mut acc_y = 0.0;
            let mut acc_z = 0.0;

            scanf::sscanf!(
                &fields,
                "{} {} {} {} {} {}",
                gyro_x,
                gyro_y,
                gyro_z,
                acc_x,
                acc_y,
                acc_z
            )
            .map_err(|_| malformed())?;

            let [gx, gy, gz, ax, ay, az] =
                finite(line, [gyro_x, gyro_y, gyro_z, acc_x, acc_y, acc_z])?;
            out.push_back(Sample::new(SensorType::Gyroscope, vector![gx, gy, gz]));
            out.push_back(Sample::new(SensorType::Accelerometer, vector![ax, ay, az]));
            return Ok(());
        }
        _ => return Err(AcquisitionError::Unrecognized(line.to_string())),
    };

    let mut x = 0.0;
    let mut y = 0.0;
    let mut z = 0.0;
    scanf::sscanf!(&fields, "{} {} {}", x, y, z).map_err(|_| malformed())?;

    let [x, y, z] = finite(line, [x, y, z])?;
    out.push_back(Sample::new(sensor, vector![x, y, z]));
    Ok(())
}

pub fn parse_orientation(line: &str) -> Result<Matrix3<f64>, AcquisitionError> {
    let (tag, fields) = split_tag(line);
    if tag != "orient" {
        return Err(AcquisitionError::Unrecognized(line.to_string()));
    }

    let mut r00 = 0.0;
    let mut r01 = 0.0;
    let mut r02 = 0.0;
    let mut r10 = 0.0;
    let mut r11 = 0.0;
    let mut r12 = 0.0;
    let mut r20 = 0.0;
    let mut r21 = 0.0;
    let mut r22 = 0.0;
    scanf::sscanf!(
        &fields,
        "{} {} {} {} {} {} {} {} {}",
        r00,
        r01,
        r02,
        r10,
        r11,
        r12,
        r20,
        r21,
        r22
    )
    .map_err(|_| AcquisitionError::Malformed(line.to_string()))?;

    let r = finite(line, [r00, r01, r02, r10, r11, r12, r20, r21, r22])?;
    Ok(Matrix3::from_row_slice(&r))
}

/// The sensor board behind a line transport. Starts out disconnected or with
/// a transport, which can be swapped at any time.
pub struct Imu<T> {
    transport: RwLock<Option<T>>,
}

impl<T: LineTransport> Imu<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport: RwLock::new(Some(transport)),
        }
    }

    pub fn disconnected() -> Self {
        Self {
            transport: RwLock::new(None),
        }
    }

    /// Returns the previous transport, if any.
    pub fn connect(&self, transport: T) -> Option<T> {
        self.transport
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(transport)
    }

    pub fn disconnect(&self) -> Option<T> {
        self.transport
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn send(&self, command: &DeviceCommand) -> Result<(), DeviceError> {
        let guard = self.transport.read().unwrap_or_else(PoisonError::into_inner);
        let transport = guard.as_ref().ok_or(DeviceError::NotConnected)?;
        trace!("> {command}");
        transport.send_line(&command.to_string())
    }

    fn recv(&self, timeout: Duration) -> Result<Option<String>, DeviceError> {
        let guard = self.transport.read().unwrap_or_else(PoisonError::into_inner);
        guard
            .as_ref()
            .ok_or(DeviceError::NotConnected)?
            .recv_line(timeout)
    }

    fn stop_stream(&self, command: DeviceCommand) {
        if let Err(e) = self.send(&command) {
            debug!("'{command}' failed: {e}");
        }
    }
}

pub struct LineSampleStream<'a, T: LineTransport> {
    imu: &'a Imu<T>,
    pending: VecDeque<Sample>,
}

impl<T: LineTransport> SampleStream for LineSampleStream<'_, T> {
    fn next_sample(&mut self, timeout: Duration) -> Result<Option<Sample>, DeviceError> {
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(sample) = self.pending.pop_front() {
                return Ok(Some(sample));
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            let Some(line) = self.imu.recv(remaining)? else {
                return Ok(None);
            };

            match parse_samples(&line, &mut self.pending) {
                Ok(()) => {}
                Err(e @ AcquisitionError::Malformed(_)) => warn!("discarding sample: {e}"),
                Err(e) => trace!("{e}"),
            }

            if self.pending.is_empty() && remaining.is_zero() {
                return Ok(None);
            }
        }
    }
}

impl<T: LineTransport> Drop for LineSampleStream<'_, T> {
    fn drop(&mut self) {
        self.imu.stop_stream(DeviceCommand::StreamSamples(false));
    }
}

pub struct LineOrientationStream<'a, T: LineTransport> {
    imu: &'a Imu<T>,
}

impl<T: LineTransport> OrientationStream for LineOrientationStream<'_, T> {
    fn next_orientation(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<Matrix3<f64>>, DeviceError> {
        let deadline = Instant::now() + timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let Some(line) = self.imu.recv(remaining)? else {
                return Ok(None);
            };

            match parse_orientation(&line) {
                Ok(orientation) => return Ok(Some(orientation)),
                Err(e @ AcquisitionError::Malformed(_)) => warn!("discarding orientation: {e}"),
                Err(e) => trace!("{e}"),
            }

            if remaining.is_zero() {
                return Ok(None);
            }
        }
    }
}

impl<T: LineTransport> Drop for LineOrientationStream<'_, T> {
    fn drop(&mut self) {
        self.imu.stop_stream(DeviceCommand::StreamOrientation(false));
    }
}

impl<T: LineTransport> ImuDevice for Imu<T> {
    fn is_connected(&self) -> bool {
        self.transport
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|t| t.is_open())
    }

    fn read_samples(&self) -> Result<Box<dyn SampleStream + '_>, DeviceError> {
        self.send(&DeviceCommand::StreamSamples(true))?;
        Ok(Box::new(LineSampleStream {
            imu: self,
            pending: VecDeque::new(),
        }))
    }

    fn stream_orientation(&self) -> Result<Box<dyn OrientationStream + '_>, DeviceError> {
        self.send(&DeviceCommand::StreamOrientation(true))?;
        Ok(Box::new(LineOrientationStream { imu: self }))
    }

    fn write_offsets(&self, offsets: &DeviceOffsets) -> Result<(), DeviceError> {
        let command = DeviceCommand::Offsets(*offsets);
        self.send(&command)?;
        info!("wrote {} offsets", offsets.sensor);
        Ok(())
    }

    fn read_debug_line(&self, timeout: Duration) -> Result<Option<String>, DeviceError> {
        self.recv(timeout)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use nalgebra::Vector3;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct MockTransport {
        incoming: Mutex<VecDeque<String>>,
        sent: Arc<Mutex<Vec<String>>>,
        closed: AtomicBool,
    }

    impl MockTransport {
        fn with_lines(lines: &[&str]) -> Self {
            Self {
                incoming: Mutex::new(lines.iter().map(|l| l.to_string()).collect()),
                ..Default::default()
            }
        }
    }

    impl LineTransport for MockTransport {
        fn is_open(&self) -> bool {
            !self.closed.load(Ordering::SeqCst)
        }

        fn send_line(&self, line: &str) -> Result<(), DeviceError> {
            self.sent.lock().unwrap().push(line.to_string());
            Ok(())
        }

        fn recv_line(&self, _timeout: Duration) -> Result<Option<String>, DeviceError> {
            Ok(self.incoming.lock().unwrap().pop_front())
        }
    }

    #[test]
    fn parse_sensor_lines() {
        let mut out = VecDeque::new();
        parse_samples("mag 1.5 -2 3e2", &mut out).unwrap();
        parse_samples("acc  0   0\t9.81\r", &mut out).unwrap();
        parse_samples("imu 0.1 0.2 0.3 4 5 6", &mut out).unwrap();

        let out: Vec<_> = out.into_iter().collect();
        assert_eq!(
            out,
            [
                Sample::new(SensorType::Magnetometer, vector![1.5, -2.0, 300.0]),
                Sample::new(SensorType::Accelerometer, vector![0.0, 0.0, 9.81]),
                Sample::new(SensorType::Gyroscope, vector![0.1, 0.2, 0.3]),
                Sample::new(SensorType::Accelerometer, vector![4.0, 5.0, 6.0]),
            ]
        );
    }

    #[test]
    fn parse_rejects_bad_lines() {
        let mut out = VecDeque::new();
        assert!(matches!(
            parse_samples("mag 1 2", &mut out),
            Err(AcquisitionError::Malformed(_))
        ));
        assert!(matches!(
            parse_samples("acc 1 x 3", &mut out),
            Err(AcquisitionError::Malformed(_))
        ));
        assert!(matches!(
            parse_samples("gyro 1 NaN 3", &mut out),
            Err(AcquisitionError::Malformed(_))
        ));
        assert!(matches!(
            parse_samples("imu 1 2 3 4 5", &mut out),
            Err(AcquisitionError::Malformed(_))
        ));
        assert!(matches!(
            parse_samples("hello world", &mut out),
            Err(AcquisitionError::Unrecognized(_))
        ));
        assert!(out.is_empty());
    }

    #[test]
    fn parse_orientation_row_major() {
        let m = parse_orientation("orient 1 2 3 4 5 6 7 8 9").unwrap();
        assert_eq!(m, Matrix3::new(1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0));
        assert!(parse_orientation("orient 1 2 3").is_err());
        assert!(matches!(
            parse_orientation("mag 1 2 3"),
            Err(AcquisitionError::Unrecognized(_))
        ));
    }

    #[test]
    fn sample_stream_skips_garbage_and_tears_down() {
        let transport = MockTransport::with_lines(&["boot v1.2", "mag 1 2", "mag 1 2 3", "acc 4 5 6"]);
        let sent = transport.sent.clone();
        let imu = Imu::new(transport);

        {
            let mut stream = imu.read_samples().unwrap();
            let timeout = Duration::from_millis(10);
            assert_eq!(
                stream.next_sample(timeout).unwrap(),
                Some(Sample::new(SensorType::Magnetometer, vector![1.0, 2.0, 3.0]))
            );
            assert_eq!(
                stream.next_sample(timeout).unwrap(),
                Some(Sample::new(SensorType::Accelerometer, vector![4.0, 5.0, 6.0]))
            );
            assert_eq!(stream.next_sample(timeout).unwrap(), None);
        }

        assert_eq!(*sent.lock().unwrap(), ["stream samples on", "stream samples off"]);
    }

    #[test]
    fn orientation_stream_tears_down() {
        let transport = MockTransport::with_lines(&["mag 1 2 3", "orient 1 0 0 0 1 0 0 0 1"]);
        let sent = transport.sent.clone();
        let imu = Imu::new(transport);

        let mut stream = imu.stream_orientation().unwrap();
        assert_eq!(
            stream.next_orientation(Duration::from_millis(10)).unwrap(),
            Some(Matrix3::identity())
        );
        drop(stream);

        assert_eq!(*sent.lock().unwrap(), ["stream orient on", "stream orient off"]);
    }

    #[test]
    fn offsets_command() {
        let transport = MockTransport::default();
        let sent = transport.sent.clone();
        let imu = Imu::new(transport);

        let offsets = DeviceOffsets {
            sensor: DataSelector::Accelerometer,
            offset: Vector3::new(-1.5, 2.0, 0.25),
            matrix: Matrix3::new(1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0),
        };
        imu.write_offsets(&offsets).unwrap();

        assert_eq!(*sent.lock().unwrap(), ["offsets acc -1.5 2 0.25 1 2 3 4 5 6 7 8 9"]);
    }

    #[test]
    fn disconnected_device() {
        let imu = Imu::<MockTransport>::disconnected();
        assert!(!imu.is_connected());

        let offsets = DeviceOffsets {
            sensor: DataSelector::Magnetometer,
            offset: Vector3::zeros(),
            matrix: Matrix3::identity(),
        };
        assert!(matches!(
            imu.write_offsets(&offsets),
            Err(DeviceError::NotConnected)
        ));
        assert!(matches!(imu.read_samples(), Err(DeviceError::NotConnected)));

        assert!(imu.connect(MockTransport::default()).is_none());
        assert!(imu.is_connected());
        assert!(imu.disconnect().is_some());
        assert!(!imu.is_connected());
    }
}
