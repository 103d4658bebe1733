//! Firmware implementations for the gantry's two controllers
//!
//! - GRBL: the motion controller driving X, Y and the coupled Y2 (Z) motor
//! - Limits: the microcontroller streaming limit-switch states as JSON

pub mod grbl;
pub mod limits;

pub use grbl::{CommandRequest, CommandResponse, GrblConnection, GrblOptions, SettingKey};
pub use limits::{LimitController, LimitFrame, LimitOptions, LimitSwitch, SwitchReading};
