//! # LaserGantry
//!
//! Driver for a laser gantry built from a GRBL motion controller and a
//! separate limit-switch controller that streams switch telemetry.
//!
//! ## Architecture
//!
//! LaserGantry is organized as a workspace with multiple crates:
//!
//! 1. **lasergantry-core** - Error types, machine data model, clock abstraction
//! 2. **lasergantry-communication** - Serial transport, GRBL driver, limit telemetry, gantry model
//! 3. **lasergantry-settings** - Configuration files
//! 4. **lasergantry-machine** - Homing and calibration, jogging, toolpath replay
//! 5. **lasergantry** - Command-line binary that integrates all crates
//!
//! The long axis is driven by two motors wired to GRBL's Y and Z channels, so
//! every Y move is sent with an identical Z. Homing runs a fast pass into each
//! limit, then a fine stepped pass, and rescales steps-per-mm from the
//! measured travel.

pub use lasergantry_communication::firmware;
pub use lasergantry_communication::sim;

pub use lasergantry_core::{
    Axis, Clock, ConnectionError, ControllerError, Error, HomingError, HomingStage, MachineState,
    MotionError, Position, PositioningMode, Result, SharedClock, SimulatedClock, SystemClock,
};

pub use lasergantry_communication::{
    list_all_ports, list_ports, AxisSettings, CommandRequest, CommandResponse, GrblConnection,
    GrblOptions, LimitController, LimitOptions, SerialPortInfo, SettingKey, SimConfig,
    SimulatedGantry,
};

pub use lasergantry_settings::{
    AxisProfile, Config, GrblSettings, HomingSettings, LimitSettings, MotionSettings,
    SettingsError,
};

pub use lasergantry_machine::{
    BoundingBox, CalibrationResult, Direction, HomeAllResult, Homing, HomingStatus, JogReport,
    JogRequest, Machine, MotionExecutor, ReplayReport, ReplayRequest, ToolpathReplay,
    ToolpathSummary, MAX_LASER_POWER,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize logging
///
/// Log lines go to stderr so that command results on stdout stay parseable.
/// `RUST_LOG` overrides the default `info` level; `json` switches to one
/// JSON object per event.
pub fn init_logging(json: bool) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if json {
        let fmt_layer = fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_current_span(true);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
    } else {
        let fmt_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_level(true)
            .with_line_number(true);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
    }

    Ok(())
}
