pub mod cal;
pub mod center;
pub mod config;
pub mod data_provider;
pub mod error;
pub mod fit;
pub mod imu;
pub mod logger;
pub mod quadric;
pub mod quality;
pub mod serial_data_provider;
pub mod store;

#[cfg(test)]
mod synthetic;
