//! Serial channels
//!
//! Both controllers on the gantry are reached over a USB serial line at
//! 115200 baud. Everything above this module talks to a `dyn SerialPort`.

pub mod serial;

pub use serial::{
    list_all_ports, list_ports, RealSerialPort, SerialPort, SerialPortInfo, DEFAULT_BAUD_RATE,
};
