use crate::error::{ConfigError, DeviceError, FitError};
use crate::fit::CalibrationTransform;
use crate::quadric::try_invert;
use nalgebra::{Matrix3, Vector3};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorType {
    Magnetometer,
    Accelerometer,
    Gyroscope,
}

impl SensorType {
    /// Prefix used on the device line protocol.
    pub fn tag(self) -> &'static str {
        match self {
            SensorType::Magnetometer => "mag",
            SensorType::Accelerometer => "acc",
            SensorType::Gyroscope => "gyro",
        }
    }
}

/// The clouds that can be fitted and calibrated on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSelector {
    Magnetometer,
    Accelerometer,
}

impl DataSelector {
    pub const ALL: [DataSelector; 2] = [DataSelector::Magnetometer, DataSelector::Accelerometer];

    pub fn label(self) -> &'static str {
        match self {
            DataSelector::Magnetometer => "Mag",
            DataSelector::Accelerometer => "Accel",
        }
    }

    pub fn sensor(self) -> SensorType {
        match self {
            DataSelector::Magnetometer => SensorType::Magnetometer,
            DataSelector::Accelerometer => SensorType::Accelerometer,
        }
    }
}

impl fmt::Display for DataSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for DataSelector {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mag" | "magnetometer" => Ok(DataSelector::Magnetometer),
            "acc" | "accel" | "accelerometer" => Ok(DataSelector::Accelerometer),
            _ => Err(ConfigError::UnknownSensor(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub sensor: SensorType,
    pub value: Vector3<f64>,
}

impl Sample {
    pub fn new(sensor: SensorType, value: Vector3<f64>) -> Self {
        Self { sensor, value }
    }
}

/// Offsets in the form the device applies them: `matrix * (raw + offset)`.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct DeviceOffsets {
    pub sensor: DataSelector,
    pub offset: Vector3<f32>,
    pub matrix: Matrix3<f32>,
}

impl DeviceOffsets {
    /// The linear part is normalized by `avg_scale` before inversion, so a
    /// corrected reading keeps the sensor's default magnitude.
    pub fn from_transform(
        sensor: DataSelector,
        transform: &CalibrationTransform,
    ) -> Result<Self, FitError> {
        if transform.avg_scale == 0.0 || !transform.avg_scale.is_finite() {
            return Err(FitError::SingularMatrix("average scale"));
        }

        let normalized = transform.linear() / transform.avg_scale;
        let matrix = try_invert(&normalized, "normalized calibration matrix")?;

        Ok(Self {
            sensor,
            offset: (-transform.translation()).cast::<f32>(),
            matrix: matrix.cast::<f32>(),
        })
    }

    pub fn apply(&self, raw: &Vector3<f32>) -> Vector3<f32> {
        self.matrix * (raw + self.offset)
    }
}

pub trait SampleStream {
    /// Blocks for at most `timeout`. `Ok(None)` means nothing arrived in time,
    /// an error means the stream is over.
    fn next_sample(&mut self, timeout: Duration) -> Result<Option<Sample>, DeviceError>;
}

pub trait OrientationStream {
    fn next_orientation(&mut self, timeout: Duration)
        -> Result<Option<Matrix3<f64>>, DeviceError>;
}

/// Everything the calibration engine needs from a sensor.
///
/// Streams stop the corresponding device mode when dropped.
pub trait ImuDevice: Send + Sync {
    fn is_connected(&self) -> bool;

    fn read_samples(&self) -> Result<Box<dyn SampleStream + '_>, DeviceError>;

    fn stream_orientation(&self) -> Result<Box<dyn OrientationStream + '_>, DeviceError>;

    fn write_offsets(&self, offsets: &DeviceOffsets) -> Result<(), DeviceError>;

    fn read_debug_line(&self, timeout: Duration) -> Result<Option<String>, DeviceError>;
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{center, fit, synthetic};
    use approx::assert_relative_eq;
    use nalgebra::vector;

    #[test]
    fn selector_from_str() {
        assert_eq!("mag".parse::<DataSelector>().unwrap(), DataSelector::Magnetometer);
        assert_eq!("Accel".parse::<DataSelector>().unwrap(), DataSelector::Accelerometer);
        for s in DataSelector::ALL {
            assert_eq!(s.to_string().parse::<DataSelector>().unwrap(), s);
        }
        assert!(matches!(
            "gyro".parse::<DataSelector>(),
            Err(ConfigError::UnknownSensor(_))
        ));
    }

    #[test]
    fn offsets_keep_default_magnitude() {
        let c = vector![12.0, -40.0, 3.5];
        let cloud = synthetic::axis_points(vector![50.0, 40.0, 30.0], c);
        let transform =
            fit::from_axis_aligned_bounding_box(&cloud, center::by_bounds(&cloud).unwrap()).unwrap();

        let offsets =
            DeviceOffsets::from_transform(DataSelector::Magnetometer, &transform).unwrap();
        assert_relative_eq!(offsets.offset, (-c).cast::<f32>(), epsilon = 1e-4);

        // the axis extremes land on a sphere of radius avg_scale
        for p in &cloud {
            let corrected = offsets.apply(&p.cast::<f32>());
            assert_relative_eq!(corrected.norm(), transform.avg_scale as f32, max_relative = 1e-5);
        }
    }

    #[test]
    fn offsets_reject_degenerate_transform() {
        let transform = CalibrationTransform::new(nalgebra::Matrix4::zeros(), 0.0);
        assert!(DeviceOffsets::from_transform(DataSelector::Accelerometer, &transform).is_err());
    }
}
