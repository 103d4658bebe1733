//! Machine data model
//!
//! Axes, status-report positions, and the homing state labels shared by the
//! driver and the calibration sequence.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Physical gantry axis
///
/// The firmware's Z motor is the second Y motor on this gantry, so only X and
/// Y exist as physical axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    /// Short axis (carriage)
    X,
    /// Long axis, driven by the Y and Z motors together
    Y,
}

impl Axis {
    /// Lowercase label used in results and config files
    pub fn label(self) -> &'static str {
        match self {
            Self::X => "x",
            Self::Y => "y",
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::X => write!(f, "X"),
            Self::Y => write!(f, "Y"),
        }
    }
}

/// Positioning mode reported in a status block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositioningMode {
    /// G90
    Absolute,
    /// G91
    Relative,
    /// Not present in the reply
    #[default]
    Unknown,
}

impl fmt::Display for PositioningMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absolute => write!(f, "Absolute (G90)"),
            Self::Relative => write!(f, "Relative (G91)"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Coarse machine state from the first field of a status block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MachineState {
    Idle,
    Run,
    Hold,
    Jog,
    Alarm,
    Door,
    Check,
    Home,
    Sleep,
    #[default]
    Unknown,
}

impl MachineState {
    /// Map a GRBL state word (`Idle`, `Hold:0`, `Door:1`, ...) to a state
    pub fn from_grbl_state(state: &str) -> Self {
        let word = state.split(':').next().unwrap_or_default();
        match word {
            "Idle" => Self::Idle,
            "Run" => Self::Run,
            "Hold" => Self::Hold,
            "Jog" => Self::Jog,
            "Alarm" => Self::Alarm,
            "Door" => Self::Door,
            "Check" => Self::Check,
            "Home" => Self::Home,
            "Sleep" => Self::Sleep,
            _ => Self::Unknown,
        }
    }
}

/// Machine position parsed from one `?` status reply
///
/// `x`, `y` and `z` are machine coordinates (`MPos`) and are `None` when the
/// reply could not be parsed. Never cached: every query produces a fresh
/// value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
    /// Bracketed status block, e.g. `<Idle|MPos:0.000,0.000,0.000|FS:0,0>`
    pub status: Option<String>,
    pub state: MachineState,
    pub mode: PositioningMode,
    /// Work coordinate offset (`WCO`); work = machine - offset
    #[serde(default)]
    pub work_offset: Option<[f64; 3]>,
    /// Everything the controller sent back
    pub raw: String,
}

impl Position {
    /// Coordinate of a physical axis
    pub fn axis(&self, axis: Axis) -> Option<f64> {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
        }
    }

    /// Both planar coordinates, if known
    pub fn xy(&self) -> Option<(f64, f64)> {
        Some((self.x?, self.y?))
    }

    /// Planar coordinates in the work frame that `G90` moves address
    ///
    /// A missing offset counts as zero.
    pub fn work_xy(&self) -> Option<(f64, f64)> {
        let (x, y) = self.xy()?;
        let [dx, dy, _] = self.work_offset.unwrap_or_default();
        Some((x - dx, y - dy))
    }
}

/// States of the per-axis homing sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HomingStage {
    RoughSeekForward,
    RoughSeekBackward,
    Center,
    FastApproach,
    FineSeekForward,
    Retreat,
    FineSeekBackward,
    Calibrate,
    Recenter,
    Done,
}

impl fmt::Display for HomingStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::RoughSeekForward => "ROUGH_SEEK_FORWARD",
            Self::RoughSeekBackward => "ROUGH_SEEK_BACKWARD",
            Self::Center => "CENTER",
            Self::FastApproach => "FAST_APPROACH",
            Self::FineSeekForward => "FINE_SEEK_FORWARD",
            Self::Retreat => "RETREAT",
            Self::FineSeekBackward => "FINE_SEEK_BACKWARD",
            Self::Calibrate => "CALIBRATE",
            Self::Recenter => "RECENTER",
            Self::Done => "DONE",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_machine_state_parse() {
        assert_eq!(MachineState::from_grbl_state("Idle"), MachineState::Idle);
        assert_eq!(MachineState::from_grbl_state("Hold:0"), MachineState::Hold);
        assert_eq!(MachineState::from_grbl_state("Door:1"), MachineState::Door);
        assert_eq!(MachineState::from_grbl_state("Alarm"), MachineState::Alarm);
        assert_eq!(MachineState::from_grbl_state("Bogus"), MachineState::Unknown);
    }

    #[test]
    fn test_position_axis_lookup() {
        let pos = Position {
            x: Some(1.0),
            y: Some(2.0),
            z: Some(2.0),
            ..Default::default()
        };
        assert_eq!(pos.axis(Axis::X), Some(1.0));
        assert_eq!(pos.axis(Axis::Y), Some(2.0));
        assert_eq!(pos.xy(), Some((1.0, 2.0)));

        let empty = Position::default();
        assert_eq!(empty.xy(), None);
        assert_eq!(empty.work_xy(), None);
    }

    #[test]
    fn test_work_xy_subtracts_offset() {
        let mut pos = Position {
            x: Some(150.0),
            y: Some(450.0),
            z: Some(450.0),
            ..Default::default()
        };
        assert_eq!(pos.work_xy(), Some((150.0, 450.0)));

        pos.work_offset = Some([135.5, 439.5, 439.5]);
        assert_eq!(pos.work_xy(), Some((14.5, 10.5)));
    }
}
