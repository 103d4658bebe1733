//! GRBL firmware support
//!
//! Protocol driver, settings table, status parsing, and code decoding for
//! the gantry's GRBL 1.1 motion controller.

pub mod command;
pub mod connection;
pub mod error_decoder;
pub mod settings;
pub mod status_parser;

pub use command::{format_coordinate, CommandRequest, CommandResponse, MoveCommand, ResponseLine};
pub use connection::{GrblConnection, GrblOptions, SOFT_RESET};
pub use error_decoder::{decode_alarm, decode_error, describe_response};
pub use settings::{parse_settings, AxisSettings, SettingKey};
pub use status_parser::parse_position;
