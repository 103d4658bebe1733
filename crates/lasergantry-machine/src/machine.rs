//! The gantry as one lockable unit
//!
//! [`Machine`] owns both controller connections and the configuration. Every
//! operation takes the single-operation lock with `try_lock`, so a second
//! caller gets [`ControllerError::Busy`] instead of queueing motion behind a
//! running calibration.

use parking_lot::{Mutex, MutexGuard};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{info, warn};

use lasergantry_communication::{
    discover_port, AxisSettings, GrblConnection, LimitController, SettingKey, SimulatedGantry,
};
use lasergantry_core::{Axis, ConnectionError, ControllerError, Position, Result, SharedClock};
use lasergantry_settings::Config;

use crate::calibration::{CalibrationResult, HomeAllResult};
use crate::homing::Homing;
use crate::motion::{JogReport, JogRequest, MotionExecutor};
use crate::toolpath::{ReplayReport, ReplayRequest, ToolpathReplay};

/// Telemetry window for a one-off switch snapshot
const SNAPSHOT_TIMEOUT: Duration = Duration::from_millis(500);

struct Connections {
    grbl: GrblConnection,
    limits: LimitController,
}

/// Both controllers plus configuration, behind a single-operation lock
pub struct Machine {
    connections: Mutex<Connections>,
    config: Config,
}

impl std::fmt::Debug for Machine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Machine")
            .field("busy", &self.connections.is_locked())
            .finish()
    }
}

impl Machine {
    pub fn new(grbl: GrblConnection, limits: LimitController, config: Config) -> Self {
        Self {
            connections: Mutex::new(Connections { grbl, limits }),
            config,
        }
    }

    /// Open both controllers on hardware
    ///
    /// The limit controller is discovered when no port is configured. If it
    /// cannot be reached, the already open GRBL connection is closed before
    /// the error returns.
    pub fn connect(config: Config, clock: SharedClock) -> Result<Self> {
        let mut grbl = GrblConnection::open(&config.grbl.port, clock.clone(), config.grbl.to_options())?;

        match Self::open_limits(&config, &clock) {
            Ok(limits) => Ok(Self::new(grbl, limits, config)),
            Err(e) => {
                if let Err(close_err) = grbl.close() {
                    warn!("Closing GRBL after limit controller failure: {}", close_err);
                }
                Err(e)
            }
        }
    }

    fn open_limits(config: &Config, clock: &SharedClock) -> Result<LimitController> {
        let options = config.limits.to_options();
        let port = match &config.limits.port {
            Some(port) => port.clone(),
            None => discover_port(clock, &options)?.ok_or_else(|| ConnectionError::DeviceNotFound {
                device: options.device_id.clone(),
            })?,
        };
        LimitController::open(&port, clock.clone(), &options)
    }

    /// Connect to a simulated gantry
    pub fn simulated(config: Config, gantry: &SimulatedGantry) -> Result<Self> {
        let grbl = GrblConnection::connect(gantry.grbl_port(), gantry.clock(), config.grbl.to_options())?;
        let limits = LimitController::new(gantry.limit_port(), gantry.clock(), config.limits.device_id.clone());
        info!("Connected to simulated gantry");
        Ok(Self::new(grbl, limits, config))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connections>> {
        self.connections
            .try_lock()
            .ok_or_else(|| ControllerError::Busy.into())
    }

    /// Whether an operation is running
    pub fn is_busy(&self) -> bool {
        self.connections.is_locked()
    }

    pub fn status(&self) -> Result<Position> {
        self.lock()?.grbl.query_position()
    }

    /// Snapshot of the cached firmware settings
    pub fn settings(&self) -> Result<AxisSettings> {
        Ok(self.lock()?.grbl.settings().clone())
    }

    pub fn update_setting(&self, key: SettingKey, value: f64) -> Result<()> {
        self.lock()?.grbl.update_setting(key, value)
    }

    /// id → state from the next telemetry frame
    pub fn limit_states(&self) -> Result<Option<BTreeMap<u32, u8>>> {
        self.lock()?.limits.all_states(SNAPSHOT_TIMEOUT)
    }

    pub fn home_axis(&self, axis: Axis) -> Result<CalibrationResult> {
        let mut guard = self.lock()?;
        let Connections { grbl, limits } = &mut *guard;
        Homing::new(grbl, limits, &self.config.homing).home_axis(axis)
    }

    pub fn home_all(&self, outline: bool) -> Result<HomeAllResult> {
        let mut guard = self.lock()?;
        let Connections { grbl, limits } = &mut *guard;
        Homing::new(grbl, limits, &self.config.homing).home_all(outline)
    }

    pub fn jog(&self, request: &JogRequest) -> Result<JogReport> {
        let mut guard = self.lock()?;
        MotionExecutor::new(&mut guard.grbl, &self.config.motion).jog(request)
    }

    pub fn return_to_home(&self, feed: f64) -> Result<JogReport> {
        let mut guard = self.lock()?;
        MotionExecutor::new(&mut guard.grbl, &self.config.motion).return_to_home(feed)
    }

    pub fn replay(&self, program: &str, request: &ReplayRequest) -> Result<ReplayReport> {
        let mut guard = self.lock()?;
        ToolpathReplay::new(&mut guard.grbl, &self.config.motion).run(program, request)
    }

    /// Close both connections
    pub fn close(self) -> Result<()> {
        let mut connections = self.connections.into_inner();
        let limits = connections.limits.close();
        connections.grbl.close()?;
        limits
    }
}
