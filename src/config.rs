use crate::cal::{CenterStrategy, ShapeStrategy};
use crate::data_provider::{DataSelector, SensorType};
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Application configuration, loaded from TOML. Every section may be omitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub serial: SerialConfig,
    pub store: StoreConfig,
    pub fit: FitConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub port: Option<String>,
    pub baud_rate: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Longest blocking device read in the acquisition loop.
    pub read_timeout_ms: u64,
    /// Wait between retries while idle or disconnected.
    pub idle_wait_ms: u64,
    pub colors: SensorColors,
}

/// Visualisation point colours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorColors {
    pub mag: [u8; 3],
    pub accel: [u8; 3],
    pub gyro: [u8; 3],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    pub data: DataSelector,
    pub center: CenterStrategy,
    pub shape: ShapeStrategy,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: 115200,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: 50,
            idle_wait_ms: 100,
            colors: SensorColors::default(),
        }
    }
}

impl StoreConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn idle_wait(&self) -> Duration {
        Duration::from_millis(self.idle_wait_ms)
    }
}

impl Default for SensorColors {
    fn default() -> Self {
        Self {
            mag: [204, 204, 0],
            accel: [255, 0, 0],
            gyro: [0, 255, 0],
        }
    }
}

impl SensorColors {
    pub fn color(&self, sensor: SensorType) -> [u8; 3] {
        match sensor {
            SensorType::Magnetometer => self.mag,
            SensorType::Accelerometer => self.accel,
            SensorType::Gyroscope => self.gyro,
        }
    }
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            data: DataSelector::Magnetometer,
            center: CenterStrategy::Ellipsoid,
            shape: ShapeStrategy::Ellipsoid,
        }
    }
}

impl AppConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.serial.baud_rate == 0 {
            return Err(ConfigError::Validation(
                "Baud rate must be positive".to_string(),
            ));
        }

        if self.store.read_timeout_ms == 0 || self.store.read_timeout_ms > 1000 {
            return Err(ConfigError::Validation(
                "Read timeout must be between 1 and 1000 ms".to_string(),
            ));
        }

        if self.store.idle_wait_ms == 0 {
            return Err(ConfigError::Validation(
                "Idle wait must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn empty_file_is_default() {
        assert_eq!(AppConfig::from_toml_str("").unwrap(), AppConfig::default());
    }

    #[test]
    fn partial_sections() {
        let config = AppConfig::from_toml_str(
            r#"
            [serial]
            port = "/dev/ttyACM0"

            [store.colors]
            gyro = [1, 2, 3]

            [fit]
            data = "accelerometer"
            center = "sphere"
            shape = "aabb"
            "#,
        )
        .unwrap();

        assert_eq!(config.serial.port.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(config.serial.baud_rate, 115200);
        assert_eq!(config.store.read_timeout(), Duration::from_millis(50));
        assert_eq!(config.store.colors.color(SensorType::Gyroscope), [1, 2, 3]);
        assert_eq!(config.store.colors.color(SensorType::Magnetometer), [204, 204, 0]);
        assert_eq!(config.fit.data, DataSelector::Accelerometer);
        assert_eq!(config.fit.center, CenterStrategy::Sphere);
        assert_eq!(config.fit.shape, ShapeStrategy::AxisAlignedBoundingBox);
    }

    #[test]
    fn validation() {
        assert!(matches!(
            AppConfig::from_toml_str("[serial]\nbaud_rate = 0"),
            Err(ConfigError::Validation(_))
        ));
        assert!(matches!(
            AppConfig::from_toml_str("[store]\nread_timeout_ms = 5000"),
            Err(ConfigError::Validation(_))
        ));
        assert!(matches!(
            AppConfig::from_toml_str("[store]\nidle_wait_ms = 0"),
            Err(ConfigError::Validation(_))
        ));
        assert!(matches!(
            AppConfig::from_toml_str("[fit]\ncenter = \"median\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn save_and_load() {
        let path = std::env::temp_dir().join(format!("imu_cal_config_{}.toml", std::process::id()));

        let mut config = AppConfig::default();
        config.serial.port = Some("COM3".to_string());
        config.fit.shape = ShapeStrategy::Pca;
        config.save_to_file(&path).unwrap();

        let loaded = AppConfig::load_from_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
