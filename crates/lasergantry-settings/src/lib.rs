//! # LaserGantry Settings
//!
//! Application configuration: which serial ports to open, how long to wait on
//! the controllers, and the calibration profile of each axis.

pub mod config;
pub mod error;

pub use config::{
    AxisProfile, Config, GrblSettings, HomingSettings, LimitSettings, MotionSettings,
    CONFIG_FILE_NAME,
};
pub use error::{ConfigError, ConfigResult, SettingsError, SettingsResult};
