//! GRBL settings table and cache
//!
//! GRBL exposes its configuration as numbered `$n=value` parameters. The
//! driver speaks in named keys and translates through a fixed table that is
//! wire-compatible with GRBL 1.1.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use lasergantry_core::{Axis, ControllerError};

/// Named GRBL setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettingKey {
    StepPulseTime,
    StepIdleDelay,
    StepPortInvert,
    DirectionPortInvert,
    StepEnableInvert,
    LimitPinsInvert,
    ProbePinInvert,
    StatusReport,
    JunctionDeviation,
    ArcTolerance,
    ReportInches,
    SoftLimits,
    HardLimits,
    HomingCycle,
    HomingDirInvert,
    HomingFeed,
    HomingSeek,
    HomingDebounce,
    HomingPullOff,
    MaxSpindleSpeed,
    MinSpindleSpeed,
    LaserMode,
    XStepsPerMm,
    YStepsPerMm,
    ZStepsPerMm,
    XMaxRate,
    YMaxRate,
    ZMaxRate,
    XAcceleration,
    YAcceleration,
    ZAcceleration,
    XMaxTravel,
    YMaxTravel,
    ZMaxTravel,
}

impl SettingKey {
    /// Every key, in index order
    pub const ALL: [SettingKey; 34] = [
        Self::StepPulseTime,
        Self::StepIdleDelay,
        Self::StepPortInvert,
        Self::DirectionPortInvert,
        Self::StepEnableInvert,
        Self::LimitPinsInvert,
        Self::ProbePinInvert,
        Self::StatusReport,
        Self::JunctionDeviation,
        Self::ArcTolerance,
        Self::ReportInches,
        Self::SoftLimits,
        Self::HardLimits,
        Self::HomingCycle,
        Self::HomingDirInvert,
        Self::HomingFeed,
        Self::HomingSeek,
        Self::HomingDebounce,
        Self::HomingPullOff,
        Self::MaxSpindleSpeed,
        Self::MinSpindleSpeed,
        Self::LaserMode,
        Self::XStepsPerMm,
        Self::YStepsPerMm,
        Self::ZStepsPerMm,
        Self::XMaxRate,
        Self::YMaxRate,
        Self::ZMaxRate,
        Self::XAcceleration,
        Self::YAcceleration,
        Self::ZAcceleration,
        Self::XMaxTravel,
        Self::YMaxTravel,
        Self::ZMaxTravel,
    ];

    /// `$n` index on the wire
    pub fn index(self) -> u16 {
        match self {
            Self::StepPulseTime => 0,
            Self::StepIdleDelay => 1,
            Self::StepPortInvert => 2,
            Self::DirectionPortInvert => 3,
            Self::StepEnableInvert => 4,
            Self::LimitPinsInvert => 5,
            Self::ProbePinInvert => 6,
            Self::StatusReport => 10,
            Self::JunctionDeviation => 11,
            Self::ArcTolerance => 12,
            Self::ReportInches => 13,
            Self::SoftLimits => 20,
            Self::HardLimits => 21,
            Self::HomingCycle => 22,
            Self::HomingDirInvert => 23,
            Self::HomingFeed => 24,
            Self::HomingSeek => 25,
            Self::HomingDebounce => 26,
            Self::HomingPullOff => 27,
            Self::MaxSpindleSpeed => 30,
            Self::MinSpindleSpeed => 31,
            Self::LaserMode => 32,
            Self::XStepsPerMm => 100,
            Self::YStepsPerMm => 101,
            Self::ZStepsPerMm => 102,
            Self::XMaxRate => 110,
            Self::YMaxRate => 111,
            Self::ZMaxRate => 112,
            Self::XAcceleration => 120,
            Self::YAcceleration => 121,
            Self::ZAcceleration => 122,
            Self::XMaxTravel => 130,
            Self::YMaxTravel => 131,
            Self::ZMaxTravel => 132,
        }
    }

    /// Key for a `$n` index, if the table knows it
    pub fn from_index(index: u16) -> Option<Self> {
        Self::ALL.iter().copied().find(|key| key.index() == index)
    }

    /// Snake-case name used by callers and config files
    pub fn name(self) -> &'static str {
        match self {
            Self::StepPulseTime => "step_pulse_time",
            Self::StepIdleDelay => "step_idle_delay",
            Self::StepPortInvert => "step_port_invert",
            Self::DirectionPortInvert => "direction_port_invert",
            Self::StepEnableInvert => "step_enable_invert",
            Self::LimitPinsInvert => "limit_pins_invert",
            Self::ProbePinInvert => "probe_pin_invert",
            Self::StatusReport => "status_report",
            Self::JunctionDeviation => "junction_deviation",
            Self::ArcTolerance => "arc_tolerance",
            Self::ReportInches => "report_inches",
            Self::SoftLimits => "soft_limits",
            Self::HardLimits => "hard_limits",
            Self::HomingCycle => "homing_cycle",
            Self::HomingDirInvert => "homing_dir_invert",
            Self::HomingFeed => "homing_feed",
            Self::HomingSeek => "homing_seek",
            Self::HomingDebounce => "homing_debounce",
            Self::HomingPullOff => "homing_pull_off",
            Self::MaxSpindleSpeed => "max_spindle_speed",
            Self::MinSpindleSpeed => "min_spindle_speed",
            Self::LaserMode => "laser_mode",
            Self::XStepsPerMm => "x_steps_per_mm",
            Self::YStepsPerMm => "y_steps_per_mm",
            Self::ZStepsPerMm => "z_steps_per_mm",
            Self::XMaxRate => "x_max_rate",
            Self::YMaxRate => "y_max_rate",
            Self::ZMaxRate => "z_max_rate",
            Self::XAcceleration => "x_acceleration",
            Self::YAcceleration => "y_acceleration",
            Self::ZAcceleration => "z_acceleration",
            Self::XMaxTravel => "x_max_travel",
            Self::YMaxTravel => "y_max_travel",
            Self::ZMaxTravel => "z_max_travel",
        }
    }

    /// Steps-per-mm keys a physical axis drives
    ///
    /// The Y axis is two motors: the firmware's Y and Z.
    pub fn steps_per_mm(axis: Axis) -> &'static [SettingKey] {
        match axis {
            Axis::X => &[Self::XStepsPerMm],
            Axis::Y => &[Self::YStepsPerMm, Self::ZStepsPerMm],
        }
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SettingKey {
    type Err = ControllerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|key| key.name() == s)
            .ok_or_else(|| ControllerError::UnknownSetting { key: s.to_string() })
    }
}

/// Parse a `$$` dump into index → value
///
/// Accepts `$<int>=<float>` with an optional trailing `(comment)`. Anything
/// else, including lines whose value is not a number, is skipped.
pub fn parse_settings(text: &str) -> BTreeMap<u16, f64> {
    let mut settings = BTreeMap::new();

    for line in text.lines() {
        let line = line.trim();
        let Some(body) = line.strip_prefix('$') else {
            continue;
        };
        let Some((index, value)) = body.split_once('=') else {
            continue;
        };
        let value = value.split('(').next().unwrap_or_default().trim();

        if let (Ok(index), Ok(value)) = (index.trim().parse::<u16>(), value.parse::<f64>()) {
            settings.insert(index, value);
        }
    }

    settings
}

/// Cached controller settings
///
/// Populated from `$$` at connect time and updated after every write. Keys
/// never written and never reported are absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AxisSettings {
    values: BTreeMap<SettingKey, f64>,
}

impl AxisSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a parsed `$$` dump, keeping only indices in the table
    pub fn from_raw(raw: &BTreeMap<u16, f64>) -> Self {
        let values = raw
            .iter()
            .filter_map(|(index, value)| SettingKey::from_index(*index).map(|key| (key, *value)))
            .collect();
        Self { values }
    }

    pub fn get(&self, key: SettingKey) -> Option<f64> {
        self.values.get(&key).copied()
    }

    pub fn set(&mut self, key: SettingKey, value: f64) {
        self.values.insert(key, value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SettingKey, f64)> + '_ {
        self.values.iter().map(|(key, value)| (*key, *value))
    }
}
