//! # LaserGantry Machine
//!
//! Homing, steps-per-mm calibration, jogging, and toolpath replay on top of
//! the two controller connections. [`Machine`] bundles the connections behind
//! a single-operation lock.

pub mod calibration;
pub mod homing;
pub mod machine;
pub mod motion;
pub mod toolpath;

pub use calibration::{
    corrected_steps_per_mm, correction_factor, CalibrationResult, HomeAllResult, HomingStatus,
};
pub use homing::{Direction, Homing, RoughSeek};
pub use machine::Machine;
pub use motion::{move_duration, path_length, JogReport, JogRequest, MotionExecutor};
pub use toolpath::{
    apply_laser_power, parse_program, BoundingBox, GcodeLine, ReplayReport, ReplayRequest,
    ToolpathReplay, ToolpathSummary, MAX_LASER_POWER,
};
