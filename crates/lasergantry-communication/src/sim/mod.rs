//! Behavioural gantry model
//!
//! [`SimulatedGantry`] stands in for the physical machine: one simulated port
//! speaks the GRBL subset the driver uses, another streams limit-controller
//! telemetry, and both run against a shared [`SimulatedClock`] so that long
//! seeks finish instantly in wall-clock time.
//!
//! This is not a firmware simulator. It models what homing and replay depend
//! on: step counting against a possibly wrong firmware scale, G90/G91/G92,
//! feed hold, soft reset into alarm, `$X`, `$$`, `$n=v`, `?`, and switches at
//! both ends of each axis.

mod model;
mod ports;

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use lasergantry_core::{Clock, SharedClock, SimulatedClock};

use crate::communication::SerialPort;
use crate::firmware::limits::DEFAULT_DEVICE_ID;

pub use model::{SimMode, SwitchOverride, TRANSCRIPT_RESET};
pub use ports::{SimGrblPort, SimLimitPort};

use model::SimState;

/// Mechanics of one physical axis
#[derive(Debug, Clone, PartialEq)]
pub struct SimAxis {
    /// Distance between the two switch trigger points, true millimetres
    pub travel: f64,
    /// Steps that actually move the carriage one millimetre
    pub true_steps_per_mm: f64,
    /// Carriage position at power-up, true millimetres from the minus switch
    pub start: f64,
    pub plus_switches: Vec<u32>,
    pub minus_switches: Vec<u32>,
}

/// Gantry model configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SimConfig {
    pub x: SimAxis,
    /// Long axis; the firmware's Y and Z motors each drive one side
    pub y: SimAxis,
    /// Travel past a switch before the hard stop
    pub overtravel: f64,
    /// `$n` values the firmware boots with
    pub firmware_settings: BTreeMap<u16, f64>,
    pub device_id: String,
    /// Emit a truncated telemetry line every n frames
    pub limit_noise_every: Option<u64>,
    /// Per-read wait when a simulated port has nothing to return
    pub read_timeout: Duration,
    /// Interval between limit-controller frames
    pub frame_interval: Duration,
}

impl Default for SimConfig {
    /// A 291 x 899 mm gantry whose firmware scale reads 300 x 910 mm
    fn default() -> Self {
        let firmware_settings: BTreeMap<u16, f64> = [
            (0, 10.0),
            (1, 25.0),
            (2, 0.0),
            (3, 0.0),
            (4, 0.0),
            (5, 0.0),
            (6, 0.0),
            (10, 1.0),
            (11, 0.010),
            (12, 0.002),
            (13, 0.0),
            (20, 0.0),
            (21, 0.0),
            (22, 0.0),
            (23, 0.0),
            (24, 25.0),
            (25, 500.0),
            (26, 250.0),
            (27, 1.0),
            (30, 1000.0),
            (31, 0.0),
            (32, 1.0),
            (100, 250.0),
            (101, 40.0),
            (102, 40.0),
            (110, 20000.0),
            (111, 20000.0),
            (112, 20000.0),
            (120, 500.0),
            (121, 500.0),
            (122, 500.0),
            (130, 300.0),
            (131, 900.0),
            (132, 900.0),
        ]
        .into_iter()
        .collect();

        Self {
            x: SimAxis {
                travel: 291.0,
                true_steps_per_mm: 250.0 * 300.0 / 291.0,
                start: 120.0,
                plus_switches: vec![3],
                minus_switches: vec![2],
            },
            y: SimAxis {
                travel: 899.0,
                true_steps_per_mm: 40.0 * 910.0 / 899.0,
                start: 400.0,
                plus_switches: vec![0, 1],
                minus_switches: vec![4, 5],
            },
            overtravel: 2.0,
            firmware_settings,
            device_id: DEFAULT_DEVICE_ID.to_string(),
            limit_noise_every: None,
            read_timeout: Duration::from_millis(10),
            frame_interval: Duration::from_millis(5),
        }
    }
}

/// Simulated gantry with its two controller ports
#[derive(Clone)]
pub struct SimulatedGantry {
    state: Arc<Mutex<SimState>>,
    clock: Arc<SimulatedClock>,
    config: SimConfig,
}

impl SimulatedGantry {
    pub fn new(config: SimConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState::new(config.clone()))),
            clock: Arc::new(SimulatedClock::new()),
            config,
        }
    }

    /// The virtual clock both ports run on
    pub fn clock(&self) -> SharedClock {
        self.clock.clone()
    }

    /// Port speaking the GRBL protocol
    pub fn grbl_port(&self) -> Box<dyn SerialPort> {
        Box::new(SimGrblPort::new(
            self.state.clone(),
            self.clock(),
            self.config.read_timeout,
        ))
    }

    /// Port streaming limit-controller telemetry
    pub fn limit_port(&self) -> Box<dyn SerialPort> {
        Box::new(SimLimitPort::new(
            self.state.clone(),
            self.clock(),
            self.config.frame_interval,
        ))
    }

    fn synced<T>(&self, read: impl FnOnce(&SimState) -> T) -> T {
        let mut state = self.state.lock();
        state.sync(self.clock.now());
        read(&state)
    }

    /// Every line and real-time command the firmware received
    pub fn transcript(&self) -> Vec<String> {
        self.state.lock().transcript().to_vec()
    }

    pub fn clear_transcript(&self) {
        self.state.lock().clear_transcript();
    }

    /// Carriage position in true millimetres from the minus switches
    pub fn physical_position(&self) -> [f64; 3] {
        self.synced(SimState::physical)
    }

    /// Position the firmware would report
    pub fn machine_position(&self) -> [f64; 3] {
        self.synced(SimState::mpos)
    }

    pub fn mode(&self) -> SimMode {
        self.synced(SimState::mode)
    }

    /// Current firmware value of `$index`
    pub fn setting(&self, index: u16) -> Option<f64> {
        self.state.lock().setting(index)
    }

    /// Script a switch
    pub fn override_switch(&self, switch_id: u32, value: SwitchOverride) {
        self.state.lock().set_override(switch_id, value);
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }
}
