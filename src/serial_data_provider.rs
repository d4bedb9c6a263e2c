use crate::error::DeviceError;
use crate::imu::LineTransport;
use bytes::BytesMut;
use futures::prelude::*;
use log::{info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use stream_cancel::StreamExt;
use tokio::sync::mpsc::UnboundedSender;
use tokio_serial::{SerialPort, SerialPortBuilderExt};
use tokio_util::codec::{Decoder, Encoder};

pub const BAUDRATES: [u32; 9] = [
    4800, 9600, 19200, 38400, 57600, 115200, 230400, 460800, 921600,
];

/// Serial ports that may have a sensor attached.
pub fn list_ports() -> Result<Vec<String>, DeviceError> {
    Ok(tokio_serial::available_ports()?
        .into_iter()
        // remove /dev/ttySx.
        .filter(|port| !port.port_name.contains("/dev/ttyS"))
        .map(|port| port.port_name)
        .collect())
}

/// An open 8-N-1 serial port. The port is read and written by two tasks on
/// the given runtime and closed when this is dropped.
pub struct SerialTransport {
    port_name: String,
    lines: Mutex<Receiver<String>>,
    commands: UnboundedSender<String>,
    open: Arc<AtomicBool>,
    _trigger: stream_cancel::Trigger,
}

impl SerialTransport {
    pub fn open(
        handle: &tokio::runtime::Handle,
        port_name: &str,
        baud_rate: u32,
    ) -> Result<Self, DeviceError> {
        // the port registers with the reactor of the current runtime
        let _enter = handle.enter();

        let mut port = tokio_serial::new(port_name, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .flow_control(tokio_serial::FlowControl::None)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .open_native_async()?;
        port.write_data_terminal_ready(true)?; // dtr: required for Arduinos to send data
        info!("Open serial port: {port_name} @ {baud_rate} 8-N-1");

        let (trigger, tripwire) = stream_cancel::Tripwire::new();
        let (mut writer, reader) = LineCodec.framed(port).split::<String>();
        let (line_tx, line_rx) = std::sync::mpsc::channel();
        let (cmd_tx, mut cmd_rx) = tokio::sync::mpsc::unbounded_channel::<String>();
        let open = Arc::new(AtomicBool::new(true));

        let reader_open = open.clone();
        let name = port_name.to_string();
        handle.spawn(async move {
            let mut incoming = reader.take_until_if(tripwire);

            while let Some(line) = incoming.next().await {
                match line {
                    Ok(line) => {
                        if line_tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("{name}: {e}");
                        break;
                    }
                }
            }

            reader_open.store(false, Ordering::SeqCst);
            info!("Closed serial port: {name}");
        });

        let writer_open = open.clone();
        handle.spawn(async move {
            while let Some(line) = cmd_rx.recv().await {
                if let Err(e) = writer.send(line).await {
                    warn!("serial write failed: {e}");
                    writer_open.store(false, Ordering::SeqCst);
                    break;
                }
            }
        });

        Ok(Self {
            port_name: port_name.to_string(),
            lines: Mutex::new(line_rx),
            commands: cmd_tx,
            open,
            _trigger: trigger,
        })
    }
}

impl LineTransport for SerialTransport {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.commands.is_closed()
    }

    fn send_line(&self, line: &str) -> Result<(), DeviceError> {
        self.commands.send(line.to_string()).map_err(|_| {
            DeviceError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                format!("{} is closed", self.port_name),
            ))
        })
    }

    fn recv_line(&self, timeout: Duration) -> Result<Option<String>, DeviceError> {
        let lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        match lines.recv_timeout(timeout) {
            Ok(line) => Ok(Some(line)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(DeviceError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("{} is closed", self.port_name),
            ))),
        }
    }
}

/// Newline framed text. Invalid UTF-8 is replaced rather than ending the
/// stream, so a garbled line shows up as a malformed sample.
struct LineCodec;

impl Decoder for LineCodec {
    type Item = String;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let newline = src.as_ref().iter().position(|b| *b == b'\n');
        if let Some(n) = newline {
            let line = src.split_to(n + 1);
            let line = String::from_utf8_lossy(line.as_ref());
            return Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()));
        }
        Ok(None)
    }
}

impl Encoder<String> for LineCodec {
    type Error = std::io::Error;

    fn encode(&mut self, line: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(line.len() + 1);
        dst.extend_from_slice(line.as_bytes());
        dst.extend_from_slice(b"\n");
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn decode_lines() {
        let mut codec = LineCodec;
        let mut buf = BytesMut::from(&b"mag 1 2 3\r\nacc 4 5"[..]);

        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("mag 1 2 3"));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert_eq!(&buf[..], b"acc 4 5");

        buf.extend_from_slice(b" 6\n\n");
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("acc 4 5 6"));
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some(""));
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_invalid_utf8() {
        let mut codec = LineCodec;
        let mut buf = BytesMut::from(&b"mag \xff 2 3\n"[..]);

        assert_eq!(
            codec.decode(&mut buf).unwrap().as_deref(),
            Some("mag \u{FFFD} 2 3")
        );
    }

    #[test]
    fn encode_appends_newline() {
        let mut codec = LineCodec;
        let mut buf = BytesMut::new();
        codec.encode("stream samples on".to_string(), &mut buf).unwrap();
        assert_eq!(&buf[..], b"stream samples on\n");
    }

    #[test]
    fn baudrates_include_default() {
        assert!(BAUDRATES.contains(&115200));
    }
}
