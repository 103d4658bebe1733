//! Configuration for LaserGantry
//!
//! Supports JSON and TOML files, stored by default in the platform config
//! directory. Every field has a default matching the physical machine, so a
//! missing file, section, or key falls back to the built-in values.
//!
//! Sections:
//! - `grbl`: motion controller port and exchange timing
//! - `limits`: limit controller port (discovered when unset)
//! - `homing`: per-axis calibration profiles and seek parameters
//! - `motion`: settle times and default feeds for jogs and replay

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use lasergantry_communication::{GrblOptions, LimitOptions, DEFAULT_BAUD_RATE, DEFAULT_DEVICE_ID};
use lasergantry_core::Axis;

use crate::error::{ConfigError, ConfigResult, SettingsError, SettingsResult};

/// File name used under the config directory
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Motion controller connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrblSettings {
    /// Serial port path
    pub port: String,
    pub baud_rate: u32,
    /// Serial read timeout for one line
    pub read_timeout_ms: u64,
    /// Wait after opening while the board reboots
    pub boot_delay_ms: u64,
    pub wake_delay_ms: u64,
    pub settings_wait_ms: u64,
    pub setting_apply_delay_ms: u64,
    pub reset_delay_ms: u64,
    pub status_wait_ms: u64,
}

impl Default for GrblSettings {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB1".to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout_ms: 100,
            boot_delay_ms: 2000,
            wake_delay_ms: 1000,
            settings_wait_ms: 300,
            setting_apply_delay_ms: 200,
            reset_delay_ms: 1000,
            status_wait_ms: 200,
        }
    }
}

impl GrblSettings {
    pub fn to_options(&self) -> GrblOptions {
        GrblOptions {
            baud_rate: self.baud_rate,
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            boot_delay: Duration::from_millis(self.boot_delay_ms),
            wake_delay: Duration::from_millis(self.wake_delay_ms),
            settings_wait: Duration::from_millis(self.settings_wait_ms),
            setting_apply_delay: Duration::from_millis(self.setting_apply_delay_ms),
            reset_delay: Duration::from_millis(self.reset_delay_ms),
            status_wait: Duration::from_millis(self.status_wait_ms),
        }
    }
}

/// Limit controller connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitSettings {
    /// Serial port path; scanned for when unset
    pub port: Option<String>,
    pub baud_rate: u32,
    pub device_id: String,
    pub read_timeout_ms: u64,
    /// Wait after opening a candidate port during discovery
    pub boot_delay_ms: u64,
    /// How long to listen on each candidate port
    pub discovery_window_ms: u64,
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: DEFAULT_BAUD_RATE,
            device_id: DEFAULT_DEVICE_ID.to_string(),
            read_timeout_ms: 10,
            boot_delay_ms: 2500,
            discovery_window_ms: 1000,
        }
    }
}

impl LimitSettings {
    pub fn to_options(&self) -> LimitOptions {
        LimitOptions {
            baud_rate: self.baud_rate,
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            device_id: self.device_id.clone(),
            boot_delay: Duration::from_millis(self.boot_delay_ms),
            discovery_window: Duration::from_millis(self.discovery_window_ms),
        }
    }
}

/// Calibration profile of one physical axis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisProfile {
    /// Physical travel between the two limit switches, in mm
    pub known_length: f64,
    /// Switches at the positive end; any one pressed stops the seek
    pub plus_switches: Vec<u32>,
    /// Switches at the negative end
    pub minus_switches: Vec<u32>,
    /// Used when the firmware did not report a value
    pub default_steps_per_mm: f64,
    /// Feed of the rough seek, mm/min
    pub rough_feed: f64,
    /// Length of the commanded rough seek move, mm
    pub rough_max_distance: f64,
    /// Pause at the rough centre before the fine pass
    #[serde(default)]
    pub center_pause_ms: u64,
}

impl AxisProfile {
    pub fn x() -> Self {
        Self {
            known_length: 291.0,
            plus_switches: vec![3],
            minus_switches: vec![2],
            default_steps_per_mm: 250.0,
            rough_feed: 800.0,
            rough_max_distance: 1000.0,
            center_pause_ms: 0,
        }
    }

    pub fn y() -> Self {
        Self {
            known_length: 899.0,
            plus_switches: vec![0, 1],
            minus_switches: vec![4, 5],
            default_steps_per_mm: 40.0,
            rough_feed: 1200.0,
            rough_max_distance: 1000.0,
            center_pause_ms: 3000,
        }
    }

    pub fn center_pause(&self) -> Duration {
        Duration::from_millis(self.center_pause_ms)
    }

    fn validate(&self, axis: Axis) -> ConfigResult<()> {
        let key = |field: &str| format!("homing.{}.{}", axis.label(), field);

        if !is_positive(self.known_length) {
            return Err(ConfigError::out_of_range(&key("known_length"), self.known_length));
        }
        if !is_positive(self.default_steps_per_mm) {
            return Err(ConfigError::out_of_range(
                &key("default_steps_per_mm"),
                self.default_steps_per_mm,
            ));
        }
        if !is_positive(self.rough_feed) {
            return Err(ConfigError::out_of_range(&key("rough_feed"), self.rough_feed));
        }
        if !is_positive(self.rough_max_distance) {
            return Err(ConfigError::out_of_range(
                &key("rough_max_distance"),
                self.rough_max_distance,
            ));
        }
        if self.plus_switches.is_empty() || self.minus_switches.is_empty() {
            return Err(ConfigError::Conflict(format!(
                "{} axis needs at least one switch at each end",
                axis
            )));
        }
        if let Some(id) = self
            .plus_switches
            .iter()
            .find(|id| self.minus_switches.contains(id))
        {
            return Err(ConfigError::Conflict(format!(
                "{} axis switch {} is assigned to both ends",
                axis, id
            )));
        }
        Ok(())
    }
}

/// Homing and calibration parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HomingSettings {
    /// Increment of one fine seek step, mm
    pub fine_step: f64,
    /// Feed of fine seek steps, mm/min
    pub fine_feed: f64,
    /// Fine seek gives up after this much travel, mm
    pub fine_max_travel: f64,
    /// Feed for centring and repositioning moves, mm/min
    pub travel_feed: f64,
    /// Distance kept from a limit before the fine seek starts, mm
    pub safety_margin: f64,
    /// `$1` while homing (255 keeps the motors energised)
    pub lock_idle_delay: f64,
    /// `$1` restored afterwards
    pub release_idle_delay: f64,
    /// Origin sits this far inward from the front-left corner, mm
    pub origin_offset: f64,
    pub outline_margin: f64,
    pub outline_feed: f64,
    /// Extra time a rough seek may run beyond its nominal duration
    pub rough_grace_ms: u64,
    /// Telemetry poll window during a rough seek
    pub rough_poll_ms: u64,
    /// Pause between the stop-sequence commands after a rough seek hits
    pub stop_pause_ms: u64,
    /// Wait for the reply to one fine step
    pub fine_reply_timeout_ms: u64,
    /// Telemetry window for the switch check before each fine step
    pub switch_check_timeout_ms: u64,
    /// Added to every computed move duration
    pub move_settle_ms: u64,
    /// Pause after mode and setting commands
    pub command_pause_ms: u64,
    pub x: AxisProfile,
    pub y: AxisProfile,
}

impl Default for HomingSettings {
    fn default() -> Self {
        Self {
            fine_step: 0.1,
            fine_feed: 200.0,
            fine_max_travel: 50.0,
            travel_feed: 20000.0,
            safety_margin: 5.0,
            lock_idle_delay: 255.0,
            release_idle_delay: 25.0,
            origin_offset: 10.0,
            outline_margin: 10.0,
            outline_feed: 6000.0,
            rough_grace_ms: 5000,
            rough_poll_ms: 10,
            stop_pause_ms: 100,
            fine_reply_timeout_ms: 2000,
            switch_check_timeout_ms: 500,
            move_settle_ms: 500,
            command_pause_ms: 200,
            x: AxisProfile::x(),
            y: AxisProfile::y(),
        }
    }
}

impl HomingSettings {
    pub fn profile(&self, axis: Axis) -> &AxisProfile {
        match axis {
            Axis::X => &self.x,
            Axis::Y => &self.y,
        }
    }

    pub fn rough_grace(&self) -> Duration {
        Duration::from_millis(self.rough_grace_ms)
    }

    pub fn rough_poll(&self) -> Duration {
        Duration::from_millis(self.rough_poll_ms)
    }

    pub fn stop_pause(&self) -> Duration {
        Duration::from_millis(self.stop_pause_ms)
    }

    pub fn fine_reply_timeout(&self) -> Duration {
        Duration::from_millis(self.fine_reply_timeout_ms)
    }

    pub fn switch_check_timeout(&self) -> Duration {
        Duration::from_millis(self.switch_check_timeout_ms)
    }

    pub fn move_settle(&self) -> Duration {
        Duration::from_millis(self.move_settle_ms)
    }

    pub fn command_pause(&self) -> Duration {
        Duration::from_millis(self.command_pause_ms)
    }

    fn validate(&self) -> ConfigResult<()> {
        self.x.validate(Axis::X)?;
        self.y.validate(Axis::Y)?;

        let positive = [
            ("homing.fine_step", self.fine_step),
            ("homing.fine_feed", self.fine_feed),
            ("homing.fine_max_travel", self.fine_max_travel),
            ("homing.travel_feed", self.travel_feed),
            ("homing.outline_feed", self.outline_feed),
        ];
        for (key, value) in positive {
            if !is_positive(value) {
                return Err(ConfigError::out_of_range(key, value));
            }
        }

        let non_negative = [
            ("homing.safety_margin", self.safety_margin),
            ("homing.origin_offset", self.origin_offset),
            ("homing.outline_margin", self.outline_margin),
        ];
        for (key, value) in non_negative {
            if !is_non_negative(value) {
                return Err(ConfigError::out_of_range(key, value));
            }
        }

        for (key, value) in [
            ("homing.lock_idle_delay", self.lock_idle_delay),
            ("homing.release_idle_delay", self.release_idle_delay),
        ] {
            if !(0.0..=255.0).contains(&value) {
                return Err(ConfigError::out_of_range(key, value));
            }
        }

        if self.fine_step > self.fine_max_travel {
            return Err(ConfigError::Conflict(
                "homing.fine_step exceeds homing.fine_max_travel".to_string(),
            ));
        }
        if self.rough_poll_ms == 0 || self.switch_check_timeout_ms == 0 {
            return Err(ConfigError::Conflict(
                "telemetry windows must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Jog and toolpath replay parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionSettings {
    /// Added to the computed duration of a jog
    pub settle_ms: u64,
    /// Added to the computed duration of each replayed move
    pub replay_settle_ms: u64,
    pub jog_feed: f64,
    /// G1 feed when a line carries none
    pub cut_feed: f64,
    /// Feed used for G0 lines
    pub rapid_feed: f64,
    /// Retry budget for M-commands and G92/G28/G30 during replay
    pub command_retries: u32,
    pub command_timeout_ms: u64,
}

impl Default for MotionSettings {
    fn default() -> Self {
        Self {
            settle_ms: 500,
            replay_settle_ms: 100,
            jog_feed: 5000.0,
            cut_feed: 5000.0,
            rapid_feed: 10000.0,
            command_retries: 3,
            command_timeout_ms: 1000,
        }
    }
}

impl MotionSettings {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn replay_settle(&self) -> Duration {
        Duration::from_millis(self.replay_settle_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    fn validate(&self) -> ConfigResult<()> {
        for (key, value) in [
            ("motion.jog_feed", self.jog_feed),
            ("motion.cut_feed", self.cut_feed),
            ("motion.rapid_feed", self.rapid_feed),
        ] {
            if !is_positive(value) {
                return Err(ConfigError::out_of_range(key, value));
            }
        }
        if self.command_retries == 0 {
            return Err(ConfigError::out_of_range("motion.command_retries", 0));
        }
        if self.command_timeout_ms == 0 {
            return Err(ConfigError::out_of_range("motion.command_timeout_ms", 0));
        }
        Ok(())
    }
}

/// Complete application configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub grbl: GrblSettings,
    pub limits: LimitSettings,
    pub homing: HomingSettings,
    pub motion: MotionSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Json,
    Toml,
}

impl Format {
    fn of(path: &Path) -> ConfigResult<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Ok(Self::Json),
            Some("toml") => Ok(Self::Toml),
            other => Err(ConfigError::UnsupportedFormat(
                other.unwrap_or("<none>").to_string(),
            )),
        }
    }
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// `<config dir>/lasergantry/config.toml`
    pub fn default_path() -> SettingsResult<PathBuf> {
        let dir = dirs::config_dir().ok_or(SettingsError::NoConfigDirectory)?;
        Ok(dir.join("lasergantry").join(CONFIG_FILE_NAME))
    }

    /// Load config from file (JSON or TOML)
    pub fn load_from_file(path: &Path) -> SettingsResult<Self> {
        let format = Format::of(path)?;
        let content = std::fs::read_to_string(path)
            .map_err(|source| SettingsError::Read {
                path: path.to_path_buf(),
                source,
            })?;

        let config: Self = match format {
            Format::Json => serde_json::from_str(&content)?,
            Format::Toml => toml::from_str(&content)?,
        };

        config.validate()?;
        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load from `path`, or defaults when the file does not exist
    pub fn load_or_default(path: &Path) -> SettingsResult<Self> {
        if path.exists() {
            Self::load_from_file(path)
        } else {
            tracing::info!("No configuration at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Save config to file (JSON or TOML), creating parent directories
    pub fn save_to_file(&self, path: &Path) -> SettingsResult<()> {
        self.validate()?;
        let format = Format::of(path)?;

        let content = match format {
            Format::Json => serde_json::to_string_pretty(self)?,
            Format::Toml => toml::to_string_pretty(self)?,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)
            .map_err(|source| SettingsError::Write {
                path: path.to_path_buf(),
                source,
            })?;

        tracing::debug!("Saved configuration to {}", path.display());
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.grbl.port.trim().is_empty() {
            return Err(ConfigError::out_of_range("grbl.port", "\"\""));
        }
        if self.grbl.baud_rate == 0 {
            return Err(ConfigError::out_of_range("grbl.baud_rate", 0));
        }
        if self.grbl.read_timeout_ms == 0 {
            return Err(ConfigError::out_of_range("grbl.read_timeout_ms", 0));
        }
        if self.limits.baud_rate == 0 {
            return Err(ConfigError::out_of_range("limits.baud_rate", 0));
        }
        if self.limits.device_id.is_empty() {
            return Err(ConfigError::out_of_range("limits.device_id", "\"\""));
        }
        if self.limits.read_timeout_ms == 0 {
            return Err(ConfigError::out_of_range("limits.read_timeout_ms", 0));
        }

        self.homing.validate()?;
        self.motion.validate()
    }
}

/// Finite and above zero
fn is_positive(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

fn is_non_negative(value: f64) -> bool {
    value.is_finite() && value >= 0.0
}
