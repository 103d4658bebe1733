//! Serial transport
//!
//! The [`SerialPort`] trait is the newline-framed channel both controllers
//! are spoken to over. [`RealSerialPort`] backs it with the `serialport`
//! crate and keeps partial lines between reads.

use lasergantry_core::{ConnectionError, Error, Result};
use serde::Serialize;
use std::io::{self, Read, Write};
use std::time::Duration;

/// Baud rate of both the GRBL controller and the limit controller
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// A port the OS reports, as shown by `lasergantry ports`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SerialPortInfo {
    /// `/dev/ttyUSB0`, `COM3`, ...
    pub port_name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    /// USB vendor and product id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usb_ids: Option<(u16, u16)>,
}

/// List every serial port the OS reports
pub fn list_all_ports() -> Result<Vec<SerialPortInfo>> {
    let ports = serialport::available_ports().map_err(|e| {
        tracing::error!("Failed to enumerate serial ports: {}", e);
        ConnectionError::Enumeration {
            reason: e.to_string(),
        }
    })?;

    Ok(ports.iter().map(to_port_info).collect())
}

/// List ports that look like USB controller boards
///
/// Valid patterns:
/// - Windows: COM* (COM1, COM2, etc.)
/// - Linux: /dev/ttyUSB*, /dev/ttyACM*
/// - macOS: /dev/cu.usbserial-*, /dev/cu.usbmodem*
pub fn list_ports() -> Result<Vec<SerialPortInfo>> {
    Ok(list_all_ports()?
        .into_iter()
        .filter(|port| is_controller_port(&port.port_name))
        .collect())
}

fn is_controller_port(port_name: &str) -> bool {
    if let Some(number) = port_name.strip_prefix("COM") {
        return !number.is_empty() && number.chars().all(|c| c.is_ascii_digit());
    }

    port_name.starts_with("/dev/ttyUSB")
        || port_name.starts_with("/dev/ttyACM")
        || port_name.starts_with("/dev/cu.usbserial-")
        || port_name.starts_with("/dev/cu.usbmodem")
}

fn to_port_info(port: &serialport::SerialPortInfo) -> SerialPortInfo {
    match &port.port_type {
        serialport::SerialPortType::UsbPort(usb) => SerialPortInfo {
            port_name: port.port_name.clone(),
            description: format!(
                "USB {} {}",
                usb.manufacturer.as_deref().unwrap_or("Device"),
                usb.product.as_deref().unwrap_or("Serial Port")
            ),
            manufacturer: usb.manufacturer.clone(),
            serial_number: usb.serial_number.clone(),
            usb_ids: Some((usb.vid, usb.pid)),
        },
        other => SerialPortInfo {
            port_name: port.port_name.clone(),
            description: match other {
                serialport::SerialPortType::BluetoothPort => "Bluetooth Serial",
                serialport::SerialPortType::PciPort => "PCI Serial",
                _ => "Serial Port",
            }
            .to_string(),
            manufacturer: None,
            serial_number: None,
            usb_ids: None,
        },
    }
}

/// Line-oriented serial channel
///
/// One implementation talks to hardware ([`RealSerialPort`]); the gantry model
/// in [`crate::sim`] provides the others. Every method is blocking.
pub trait SerialPort: Send {
    /// Port name, for logging
    fn name(&self) -> String;

    /// Write all bytes
    fn write(&mut self, data: &[u8]) -> io::Result<()>;

    /// Read one line with its terminator and surrounding whitespace removed
    ///
    /// Returns `Ok(None)` when the port's read timeout elapses before a full
    /// line arrives. Partial data is kept for the next call.
    fn read_line(&mut self) -> io::Result<Option<String>>;

    /// Drain whatever is currently buffered, without waiting
    fn read_available(&mut self) -> io::Result<Vec<u8>>;

    /// Discard everything buffered on the input side
    fn clear_input(&mut self) -> io::Result<()>;

    /// Close the port
    fn close(&mut self) -> io::Result<()>;
}

/// Real serial port implementation using serialport crate
pub struct RealSerialPort {
    name: String,
    port: Box<dyn serialport::SerialPort>,
    pending: Vec<u8>,
}

impl RealSerialPort {
    /// Open `path` at `baud_rate` with the given read timeout
    pub fn open(path: &str, baud_rate: u32, timeout: Duration) -> Result<Self> {
        match serialport::new(path, baud_rate).timeout(timeout).open() {
            Ok(port) => Ok(Self {
                name: path.to_string(),
                port,
                pending: Vec::new(),
            }),
            Err(e) => {
                tracing::warn!("Failed to open serial port {}: {}", path, e);
                Err(Error::from(ConnectionError::FailedToOpen {
                    port: path.to_string(),
                    reason: e.to_string(),
                }))
            }
        }
    }

    fn take_line(&mut self) -> Option<String> {
        let end = self.pending.iter().position(|b| *b == b'\n')?;
        let line: Vec<u8> = self.pending.drain(..=end).collect();
        Some(String::from_utf8_lossy(&line).trim().to_string())
    }
}

impl SerialPort for RealSerialPort {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.port.write_all(data)?;
        self.port.flush()
    }

    fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut buf = [0u8; 256];
        loop {
            if let Some(line) = self.take_line() {
                return Ok(Some(line));
            }
            match self.port.read(&mut buf) {
                Ok(0) => return Ok(None),
                Ok(n) => self.pending.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::TimedOut => return Ok(None),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    fn read_available(&mut self) -> io::Result<Vec<u8>> {
        let mut data = std::mem::take(&mut self.pending);
        let waiting = self.port.bytes_to_read()? as usize;
        if waiting > 0 {
            let mut buf = vec![0u8; waiting];
            let n = self.port.read(&mut buf)?;
            data.extend_from_slice(&buf[..n]);
        }
        Ok(data)
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.pending.clear();
        self.port.clear(serialport::ClearBuffer::Input)?;
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        // serialport closes the descriptor on drop; only buffered state is ours
        self.pending.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_controller_port_patterns() {
        assert!(is_controller_port("/dev/ttyUSB1"));
        assert!(is_controller_port("/dev/ttyACM0"));
        assert!(is_controller_port("COM3"));
        assert!(is_controller_port("/dev/cu.usbmodem1421"));
        assert!(!is_controller_port("COM"));
        assert!(!is_controller_port("/dev/ttyS0"));
    }

    #[test]
    fn test_port_info_json_omits_missing_fields() {
        let info = SerialPortInfo {
            port_name: "/dev/ttyUSB1".to_string(),
            description: "USB FTDI FT232R".to_string(),
            manufacturer: Some("FTDI".to_string()),
            serial_number: None,
            usb_ids: Some((0x0403, 0x6001)),
        };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["port_name"], "/dev/ttyUSB1");
        assert_eq!(json["usb_ids"][0], 0x0403);
        assert!(json.get("serial_number").is_none());
    }
}
