//! # LaserGantry Core
//!
//! Core types shared by every LaserGantry crate: the error hierarchy, the
//! machine data model, and the clock abstraction used by all blocking loops.

pub mod clock;
pub mod data;
pub mod error;

pub use clock::{Clock, SharedClock, SimulatedClock, SystemClock};
pub use data::{Axis, HomingStage, MachineState, Position, PositioningMode};
pub use error::{
    ConnectionError, ControllerError, Error, HomingError, MotionError, Result,
};
