//! Configuration file and validation errors

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Reading or writing the configuration file failed
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Cannot read configuration {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Cannot write configuration {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// No per-user configuration directory on this platform
    #[error("No configuration directory available")]
    NoConfigDirectory,

    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("TOML error: {0}")]
    TomlSerError(#[from] toml::ser::Error),

    /// The file parsed but its values are unusable
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

/// A configuration value the gantry cannot run with
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Extension other than `.toml` or `.json`
    #[error("Unsupported config format: {0}")]
    UnsupportedFormat(String),

    #[error("Value out of range for '{key}': {value}")]
    ValueOutOfRange { key: String, value: String },

    /// Two values contradict each other, e.g. one switch on both ends
    #[error("Conflicting configuration: {0}")]
    Conflict(String),
}

impl ConfigError {
    pub(crate) fn out_of_range(key: &str, value: impl ToString) -> Self {
        Self::ValueOutOfRange {
            key: key.to_string(),
            value: value.to_string(),
        }
    }
}

pub type SettingsResult<T> = Result<T, SettingsError>;

pub type ConfigResult<T> = Result<T, ConfigError>;
