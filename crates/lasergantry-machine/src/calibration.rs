//! Calibration arithmetic and homing results

use serde::{Deserialize, Serialize};

use lasergantry_core::Axis;

/// Outcome of a homing sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HomingStatus {
    Complete,
}

/// `measured / known`: the factor the firmware's steps-per-mm is off by
///
/// A firmware scale that is too low makes the axis read short of its true
/// length once the motors step the whole travel, so the measured length in
/// firmware millimetres comes out longer than the physical one.
pub fn correction_factor(measured: f64, known: f64) -> f64 {
    measured / known
}

/// New steps-per-mm after applying a correction factor
pub fn corrected_steps_per_mm(current: f64, factor: f64) -> f64 {
    current * factor
}

/// Result of homing and calibrating one axis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationResult {
    pub axis: Axis,
    /// Travel between the limit switches in pre-calibration millimetres
    pub measured_length: f64,
    pub known_length: f64,
    pub correction_factor: f64,
    /// Value written to the axis's steps-per-mm setting
    pub steps_per_mm: f64,
    /// Minus-side limit in post-calibration machine coordinates
    pub minus_limit: Option<f64>,
    /// Plus-side limit in post-calibration machine coordinates
    pub plus_limit: Option<f64>,
    pub status: HomingStatus,
}

/// Result of the full Y-then-X sequence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HomeAllResult {
    pub status: HomingStatus,
    pub message: String,
    pub y: CalibrationResult,
    pub x: CalibrationResult,
    /// Coordinates the parked position was declared to be (`G92`)
    pub origin_offset_x: f64,
    pub origin_offset_y: f64,
    pub outlined: bool,
}

impl HomeAllResult {
    pub fn x_axis_length(&self) -> f64 {
        self.x.measured_length
    }

    pub fn y_axis_length(&self) -> f64 {
        self.y.measured_length
    }
}
