//! # LaserGantry Communication
//!
//! Serial transport and firmware drivers for the gantry's two controllers:
//! the GRBL motion controller and the limit-switch telemetry board. Also
//! carries a behavioural gantry model ([`sim`]) for tests and dry runs.

pub mod communication;
pub mod firmware;
pub mod sim;

pub use communication::{
    list_all_ports, list_ports, RealSerialPort, SerialPort, SerialPortInfo, DEFAULT_BAUD_RATE,
};

pub use firmware::grbl::{
    AxisSettings, CommandRequest, CommandResponse, GrblConnection, GrblOptions, MoveCommand,
    SettingKey,
};
pub use firmware::limits::{
    discover_port, discover_port_with, LimitController, LimitFrame, LimitOptions, LimitSwitch,
    SwitchReading, DEFAULT_DEVICE_ID,
};
pub use sim::{SimConfig, SimulatedGantry};
