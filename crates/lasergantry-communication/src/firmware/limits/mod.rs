//! Limit-switch telemetry reader
//!
//! The limit controller is a small microcontroller that prints one JSON
//! object per line, continuously:
//!
//! ```text
//! {"device": "limit-controller", "switches": [{"id": 0, "state": 0}, {"id": 3, "state": 1}]}
//! ```
//!
//! Nothing is ever written to it. Every query clears the input buffer first so
//! that only frames emitted after the call started are considered, then reads
//! until a matching frame arrives or the deadline passes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use lasergantry_core::{Result, SharedClock};

use crate::communication::{list_all_ports, RealSerialPort, SerialPort, DEFAULT_BAUD_RATE};

/// Device identifier the limit controller reports
pub const DEFAULT_DEVICE_ID: &str = "limit-controller";

/// Pause between polls when no line is available
const POLL_YIELD: Duration = Duration::from_millis(1);

/// One switch in a telemetry frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitSwitch {
    pub id: u32,
    /// 1 = pressed
    #[serde(default)]
    pub state: u8,
}

impl LimitSwitch {
    pub fn is_pressed(&self) -> bool {
        self.state == 1
    }
}

/// One telemetry line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitFrame {
    pub device: String,
    #[serde(default)]
    pub switches: Vec<LimitSwitch>,
}

impl LimitFrame {
    pub fn switch(&self, id: u32) -> Option<&LimitSwitch> {
        self.switches.iter().find(|s| s.id == id)
    }

    /// First of `ids` (in frame order) that is pressed
    pub fn first_pressed(&self, ids: &[u32]) -> Option<u32> {
        self.switches
            .iter()
            .find(|s| s.is_pressed() && ids.contains(&s.id))
            .map(|s| s.id)
    }
}

/// Point-in-time state of one switch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchReading {
    pub switch_id: u32,
    pub state: u8,
    /// False when no frame mentioning the switch arrived in time
    pub found: bool,
}

/// Parse one line; `None` for non-JSON, malformed, or foreign-device lines
pub fn parse_frame(line: &str, device_id: &str) -> Option<LimitFrame> {
    let line = line.trim();
    if !line.starts_with('{') {
        return None;
    }
    let frame: LimitFrame = serde_json::from_str(line).ok()?;
    (frame.device == device_id).then_some(frame)
}

/// Limit controller channel settings
#[derive(Debug, Clone, PartialEq)]
pub struct LimitOptions {
    pub baud_rate: u32,
    /// Serial read timeout for a single line
    pub read_timeout: Duration,
    pub device_id: String,
    /// Wait after opening a candidate port during discovery
    pub boot_delay: Duration,
    /// How long to listen on each candidate port
    pub discovery_window: Duration,
}

impl Default for LimitOptions {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout: Duration::from_millis(10),
            device_id: DEFAULT_DEVICE_ID.to_string(),
            boot_delay: Duration::from_millis(2500),
            discovery_window: Duration::from_secs(1),
        }
    }
}

/// Scan every serial port the OS reports for the limit controller
pub fn discover_port(clock: &SharedClock, options: &LimitOptions) -> Result<Option<String>> {
    let candidates: Vec<String> = list_all_ports()?
        .into_iter()
        .map(|info| info.port_name)
        .collect();

    Ok(discover_port_with(&candidates, clock, options, |path| {
        let port = RealSerialPort::open(path, options.baud_rate, options.read_timeout)?;
        Ok(Box::new(port) as Box<dyn SerialPort>)
    }))
}

/// Probe `candidates` in order with `open`; first port emitting a frame
/// from the expected device wins
///
/// Ports that fail to open or read are skipped.
pub fn discover_port_with<F>(
    candidates: &[String],
    clock: &SharedClock,
    options: &LimitOptions,
    mut open: F,
) -> Option<String>
where
    F: FnMut(&str) -> Result<Box<dyn SerialPort>>,
{
    for candidate in candidates {
        tracing::debug!("Probing {} for {}", candidate, options.device_id);
        let mut port = match open(candidate) {
            Ok(port) => port,
            Err(e) => {
                tracing::debug!("Skipping {}: {}", candidate, e);
                continue;
            }
        };

        clock.sleep(options.boot_delay);
        let found = listen_for_device(port.as_mut(), clock, options);
        if let Err(e) = port.close() {
            tracing::debug!("Close of {} failed: {}", candidate, e);
        }

        match found {
            Ok(true) => {
                tracing::info!("Found {} on {}", options.device_id, candidate);
                return Some(candidate.clone());
            }
            Ok(false) => {}
            Err(e) => tracing::debug!("Skipping {}: {}", candidate, e),
        }
    }

    tracing::warn!("{} not found on any serial port", options.device_id);
    None
}

fn listen_for_device(
    port: &mut dyn SerialPort,
    clock: &SharedClock,
    options: &LimitOptions,
) -> std::io::Result<bool> {
    port.clear_input()?;
    let deadline = clock.deadline(options.discovery_window);
    while clock.before(deadline) {
        match port.read_line()? {
            Some(line) if parse_frame(&line, &options.device_id).is_some() => return Ok(true),
            Some(_) => {}
            None => clock.sleep(POLL_YIELD),
        }
    }
    Ok(false)
}

/// Connection to the limit controller
pub struct LimitController {
    port: Box<dyn SerialPort>,
    clock: SharedClock,
    device_id: String,
}

impl std::fmt::Debug for LimitController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LimitController")
            .field("port", &self.port.name())
            .field("device_id", &self.device_id)
            .finish()
    }
}

impl LimitController {
    pub fn new(port: Box<dyn SerialPort>, clock: SharedClock, device_id: impl Into<String>) -> Self {
        Self {
            port,
            clock,
            device_id: device_id.into(),
        }
    }

    /// Open a hardware port
    pub fn open(path: &str, clock: SharedClock, options: &LimitOptions) -> Result<Self> {
        let port = RealSerialPort::open(path, options.baud_rate, options.read_timeout)?;
        tracing::info!("Limit controller connected on {}", path);
        Ok(Self::new(Box::new(port), clock, options.device_id.clone()))
    }

    pub fn port_name(&self) -> String {
        self.port.name()
    }

    pub fn close(&mut self) -> Result<()> {
        tracing::debug!("Closing limit controller port {}", self.port.name());
        self.port.close()?;
        Ok(())
    }

    /// Read frames until `accept` returns a value or the timeout elapses
    fn poll<T>(&mut self, timeout: Duration, mut accept: impl FnMut(&LimitFrame) -> Option<T>) -> Result<Option<T>> {
        self.port.clear_input()?;
        let deadline = self.clock.deadline(timeout);

        while self.clock.before(deadline) {
            let Some(line) = self.port.read_line()? else {
                self.clock.sleep(POLL_YIELD);
                continue;
            };
            let Some(frame) = parse_frame(&line, &self.device_id) else {
                continue;
            };
            if let Some(value) = accept(&frame) {
                return Ok(Some(value));
            }
        }

        Ok(None)
    }

    /// Next complete frame
    pub fn read_frame(&mut self, timeout: Duration) -> Result<Option<LimitFrame>> {
        self.poll(timeout, |frame| Some(frame.clone()))
    }

    /// State of one switch from the first frame that mentions it
    pub fn get_switch_state(&mut self, switch_id: u32, timeout: Duration) -> Result<SwitchReading> {
        let state = self.poll(timeout, |frame| frame.switch(switch_id).map(|s| s.state))?;
        Ok(SwitchReading {
            switch_id,
            state: state.unwrap_or(0),
            found: state.is_some(),
        })
    }

    /// Whether any of `ids` reports pressed within the timeout
    pub fn any_pressed(&mut self, ids: &[u32], timeout: Duration) -> Result<bool> {
        Ok(self.first_pressed(ids, timeout)?.is_some())
    }

    /// First of `ids` to report pressed within the timeout
    pub fn first_pressed(&mut self, ids: &[u32], timeout: Duration) -> Result<Option<u32>> {
        self.poll(timeout, |frame| frame.first_pressed(ids))
    }

    /// id → state for every switch in the next frame
    pub fn all_states(&mut self, timeout: Duration) -> Result<Option<BTreeMap<u32, u8>>> {
        Ok(self
            .read_frame(timeout)?
            .map(|frame| frame.switches.iter().map(|s| (s.id, s.state)).collect()))
    }
}
