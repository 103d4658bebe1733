//! Error handling for LaserGantry
//!
//! Errors are split by the layer that raises them:
//! - Connection errors (serial transport, device discovery)
//! - Controller errors (settings table, operation lock)
//! - Homing errors (limit search and calibration sequence)
//! - Motion errors (jog and toolpath replay)
//!
//! Protocol-level failures (`error:`/`alarm:` replies, missing `ok`) are not
//! errors at all; the GRBL driver reports them as a failed command response.

use crate::data::{Axis, HomingStage};
use thiserror::Error;

/// Connection error type
///
/// Transport-level failures. These are fatal to whatever operation is running.
#[derive(Error, Debug, Clone)]
pub enum ConnectionError {
    /// Failed to open port
    #[error("Failed to open port {port}: {reason}")]
    FailedToOpen {
        /// The name of the port that failed to open.
        port: String,
        /// The reason the port failed to open.
        reason: String,
    },

    /// The port opened but the controller never completed its startup exchange
    #[error("Handshake with {port} failed: {reason}")]
    Handshake {
        /// The port the handshake was attempted on.
        port: String,
        /// What went wrong.
        reason: String,
    },

    /// No serial port carried the expected peripheral
    #[error("Device '{device}' not found on any serial port")]
    DeviceNotFound {
        /// The device identifier that was searched for.
        device: String,
    },

    /// Failed to enumerate serial ports
    #[error("Failed to enumerate serial ports: {reason}")]
    Enumeration {
        /// The reason enumeration failed.
        reason: String,
    },
}

/// Controller error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ControllerError {
    /// Setting name is not part of the GRBL settings table
    #[error("Unknown setting key: {key}")]
    UnknownSetting {
        /// The rejected key.
        key: String,
    },

    /// Another operation already holds the machine
    #[error("Machine is busy with another operation")]
    Busy,
}

/// Homing error type
///
/// Raised when a limit search or calibration step cannot complete. The whole
/// homing sequence is abandoned; nothing is retried.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HomingError {
    /// A seek never reached its limit switch
    #[error("{axis} axis homing failed in {stage}: limit switch {switches:?} not reached")]
    LimitNotReached {
        /// The axis being homed.
        axis: Axis,
        /// The state the sequence was in.
        stage: HomingStage,
        /// The switch ids that were expected to trigger.
        switches: Vec<u32>,
    },

    /// The controller rejected a fine seek step
    #[error("{axis} axis homing failed in {stage}: controller replied '{response}'")]
    ControllerFault {
        /// The axis being homed.
        axis: Axis,
        /// The state the sequence was in.
        stage: HomingStage,
        /// The `error:`/`alarm:` line.
        response: String,
    },

    /// A measured length makes calibration meaningless
    #[error("{axis} axis calibration rejected: measured length {measured:.3}mm")]
    InvalidMeasurement {
        /// The axis being homed.
        axis: Axis,
        /// The measured length.
        measured: f64,
    },
}

impl HomingError {
    /// Axis the failure belongs to
    pub fn axis(&self) -> Axis {
        match self {
            Self::LimitNotReached { axis, .. }
            | Self::ControllerFault { axis, .. }
            | Self::InvalidMeasurement { axis, .. } => *axis,
        }
    }

    /// State the sequence had reached when it failed
    pub fn stage(&self) -> HomingStage {
        match self {
            Self::LimitNotReached { stage, .. } | Self::ControllerFault { stage, .. } => *stage,
            Self::InvalidMeasurement { .. } => HomingStage::Calibrate,
        }
    }
}

/// Motion error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MotionError {
    /// Jog request without any axis
    #[error("At least one axis (x or y) must be specified")]
    NoAxisSpecified,

    /// Status report did not contain a usable machine position
    #[error("Unable to query current machine position")]
    PositionUnavailable,

    /// Feed rate of zero or less
    #[error("Feed rate must be positive, got {feed}")]
    InvalidFeed {
        /// The rejected feed rate.
        feed: f64,
    },

    /// Laser power outside 0..=1000
    #[error("Laser power must be between 0 and 1000, got {power}")]
    LaserPowerOutOfRange {
        /// The rejected power.
        power: u32,
    },

    /// G0/G1 word that is not a number
    #[error("Invalid coordinate '{word}' at line {line_number}")]
    InvalidCoordinate {
        /// 1-based line number in the G-code stream.
        line_number: usize,
        /// The offending word.
        word: String,
    },

    /// Toolpath has no coordinate-bearing moves
    #[error("Toolpath contains no valid coordinates")]
    EmptyToolpath,
}

/// Main error type for LaserGantry
#[derive(Error, Debug)]
pub enum Error {
    /// Connection error
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Controller error
    #[error(transparent)]
    Controller(#[from] ControllerError),

    /// Homing error
    #[error(transparent)]
    Homing(#[from] HomingError),

    /// Motion error
    #[error(transparent)]
    Motion(#[from] MotionError),

    /// Standard I/O error on a serial channel
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Transport-level failure (open, read, write)
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::Connection(_) | Error::Io(_))
    }

    /// Sequence-level failure that aborted homing or motion
    pub fn is_sequence_error(&self) -> bool {
        matches!(
            self,
            Error::Homing(_)
                | Error::Motion(_)
                | Error::Controller(ControllerError::UnknownSetting { .. })
        )
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_homing_error_display() {
        let err = HomingError::LimitNotReached {
            axis: Axis::X,
            stage: HomingStage::RoughSeekForward,
            switches: vec![3],
        };
        assert_eq!(
            err.to_string(),
            "X axis homing failed in ROUGH_SEEK_FORWARD: limit switch [3] not reached"
        );
        assert_eq!(err.axis(), Axis::X);
        assert_eq!(err.stage(), HomingStage::RoughSeekForward);
    }

    #[test]
    fn test_error_classification() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "unplugged");
        assert!(Error::from(io).is_connection_error());

        let err: Error = MotionError::NoAxisSpecified.into();
        assert!(err.is_sequence_error());
        assert!(!err.is_connection_error());

        let err: Error = ControllerError::UnknownSetting {
            key: "q_steps".to_string(),
        }
        .into();
        assert!(err.is_sequence_error());
        assert!(!Error::from(ControllerError::Busy).is_sequence_error());
    }
}
