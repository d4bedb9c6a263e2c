use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FitError {
    #[error("need at least {needed} samples, got {got}")]
    Underdetermined { needed: usize, got: usize },
    #[error("samples are degenerate: rank {rank} of {needed}")]
    RankDeficient { rank: usize, needed: usize },
    #[error("{0} is singular")]
    SingularMatrix(&'static str),
}

impl FitError {
    /// True when more (or better spread) samples could fix the fit.
    pub fn is_underdetermined(&self) -> bool {
        matches!(
            self,
            FitError::Underdetermined { .. } | FitError::RankDeficient { .. }
        )
    }
}

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("IMU is not connected")]
    NotConnected,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),
}

/// A garbled line from the device. Recovered inside the sample streams.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AcquisitionError {
    #[error("malformed line: {0:?}")]
    Malformed(String),
    #[error("unrecognized line: {0:?}")]
    Unrecognized(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("unknown strategy '{0}'")]
    UnknownStrategy(String),
    #[error("unknown sensor '{0}', expected mag or accel")]
    UnknownSensor(String),
}
