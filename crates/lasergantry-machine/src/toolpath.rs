//! Toolpath replay
//!
//! Replays a G-code program produced elsewhere (typically an SVG converter)
//! on the gantry. The program is re-centred: its bounding-box centre is
//! moved onto a target centre near the current carriage position, and every
//! move runs as a coupled absolute move. All coordinates here are work
//! coordinates.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use lasergantry_communication::{CommandRequest, GrblConnection};
use lasergantry_core::{MotionError, Position, Result};
use lasergantry_settings::MotionSettings;

use crate::motion::{move_duration, path_length, validate_feed};

/// Highest accepted laser power (`S` word of `M3`)
pub const MAX_LASER_POWER: u32 = 1000;

/// One parsed program line
#[derive(Debug, Clone, PartialEq)]
pub enum GcodeLine {
    /// `G0` (rapid) or `G1`
    Motion {
        rapid: bool,
        x: Option<f64>,
        y: Option<f64>,
        z: Option<f64>,
        feed: Option<f64>,
    },
    /// `G90`
    AbsoluteMode,
    /// `G91`; never executed
    RelativeMode,
    /// `M`-command, sent through the retrying path
    MCommand { code: String, text: String },
    /// `G92`, `G28`, `G30`, sent through the retrying path
    Passthrough { code: String, text: String },
    /// Anything else; recorded but not sent
    Ignored { code: String, text: String },
}

impl GcodeLine {
    /// Leading command word, e.g. `G1` or `M3`
    pub fn code(&self) -> &str {
        match self {
            Self::Motion { rapid: true, .. } => "G0",
            Self::Motion { rapid: false, .. } => "G1",
            Self::AbsoluteMode => "G90",
            Self::RelativeMode => "G91",
            Self::MCommand { code, .. }
            | Self::Passthrough { code, .. }
            | Self::Ignored { code, .. } => code,
        }
    }

    fn has_xy(&self) -> bool {
        matches!(self, Self::Motion { x, y, .. } if x.is_some() || y.is_some())
    }
}

/// Normalise a command word: uppercase, leading zeros dropped (`G01` → `G1`)
fn normalize_code(word: &str) -> String {
    let upper = word.to_ascii_uppercase();
    let Some(digits) = upper.get(1..) else {
        return upper;
    };
    if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
        if let Ok(n) = digits.parse::<u32>() {
            return format!("{}{}", &upper[..1], n);
        }
    }
    upper
}

fn parse_value(word: &str, line_number: usize) -> Result<f64> {
    word[1..]
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| {
            MotionError::InvalidCoordinate {
                line_number,
                word: word.to_string(),
            }
            .into()
        })
}

/// Parse a program
///
/// Blank lines and lines starting with `;` or `(` are skipped, as is anything
/// after a `;` on a line. Coordinate words on motion lines must be numbers.
/// `invert_y` negates every Y value (SVG space grows downward).
pub fn parse_program(text: &str, invert_y: bool) -> Result<Vec<GcodeLine>> {
    let mut lines = Vec::new();

    for (index, raw) in text.lines().enumerate() {
        let line_number = index + 1;
        let line = raw.split(';').next().unwrap_or_default().trim();
        if line.is_empty() || line.starts_with('(') {
            continue;
        }

        let mut words = line.split_whitespace();
        let Some(first) = words.next() else {
            continue;
        };
        let code = normalize_code(first);

        let parsed = match code.as_str() {
            "G0" | "G1" => {
                let (mut x, mut y, mut z, mut feed) = (None, None, None, None);
                for word in words {
                    let Some(letter) = word.chars().next() else {
                        continue;
                    };
                    match letter.to_ascii_uppercase() {
                        'X' => x = Some(parse_value(word, line_number)?),
                        'Y' => {
                            let value = parse_value(word, line_number)?;
                            y = Some(if invert_y { -value } else { value });
                        }
                        'Z' => z = Some(parse_value(word, line_number)?),
                        'F' => feed = Some(parse_value(word, line_number)?),
                        _ => {}
                    }
                }
                GcodeLine::Motion {
                    rapid: code == "G0",
                    x,
                    y,
                    z,
                    feed,
                }
            }
            "G90" => GcodeLine::AbsoluteMode,
            "G91" => GcodeLine::RelativeMode,
            "G92" | "G28" | "G30" => GcodeLine::Passthrough {
                code,
                text: line.to_string(),
            },
            _ if code.starts_with('M') => GcodeLine::MCommand {
                code,
                text: line.to_string(),
            },
            _ => GcodeLine::Ignored {
                code,
                text: line.to_string(),
            },
        };
        lines.push(parsed);
    }

    Ok(lines)
}

/// Rewrite or inject the `S` word on every `M3` line
pub fn apply_laser_power(lines: &mut [GcodeLine], power: u32) {
    for line in lines.iter_mut() {
        let GcodeLine::MCommand { code, text } = line else {
            continue;
        };
        if code.as_str() != "M3" {
            continue;
        }
        let mut words: Vec<String> = text
            .split_whitespace()
            .filter(|w| !w.starts_with(['S', 's']))
            .map(str::to_string)
            .collect();
        words.insert(1, format!("S{}", power));
        *text = words.join(" ");
    }
}

/// Extent of the coordinate-bearing motion lines
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

impl BoundingBox {
    /// `None` unless both an X and a Y value appear
    pub fn of(lines: &[GcodeLine]) -> Option<Self> {
        let mut min_x = f64::INFINITY;
        let mut max_x = f64::NEG_INFINITY;
        let mut min_y = f64::INFINITY;
        let mut max_y = f64::NEG_INFINITY;

        for line in lines {
            let GcodeLine::Motion { x, y, .. } = line else {
                continue;
            };
            if let Some(x) = *x {
                min_x = min_x.min(x);
                max_x = max_x.max(x);
            }
            if let Some(y) = *y {
                min_y = min_y.min(y);
                max_y = max_y.max(y);
            }
        }

        (min_x.is_finite() && min_y.is_finite()).then_some(Self {
            min_x,
            max_x,
            min_y,
            max_y,
        })
    }

    pub fn center(&self) -> (f64, f64) {
        (
            (self.min_x + self.max_x) / 2.0,
            (self.min_y + self.max_y) / 2.0,
        )
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }
}

/// Caller parameters of a replay
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReplayRequest {
    /// Default G1 feed, mm/min
    pub feed: f64,
    /// G0 feed and travel to and from the toolpath, mm/min
    pub movement_feed: f64,
    /// Target centre offset from the current position, mm
    pub origin_x: f64,
    pub origin_y: f64,
    /// 0–1000, written into every `M3`
    pub laser_power: u32,
    pub invert_y: bool,
}

impl ReplayRequest {
    /// Defaults from the motion settings, full power, no offset
    pub fn from_settings(settings: &MotionSettings) -> Self {
        Self {
            feed: settings.cut_feed,
            movement_feed: settings.rapid_feed,
            origin_x: 0.0,
            origin_y: 0.0,
            laser_power: MAX_LASER_POWER,
            invert_y: false,
        }
    }
}

/// Command words seen during a replay
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolpathSummary {
    pub g_commands: BTreeSet<String>,
    pub m_commands: BTreeSet<String>,
    /// Full `M3`/`M4`/`M5` lines in program order
    pub laser_commands: Vec<String>,
}

impl ToolpathSummary {
    fn record(&mut self, line: &GcodeLine) {
        let code = line.code().to_string();
        match line {
            GcodeLine::MCommand { text, .. } => {
                if matches!(code.as_str(), "M3" | "M4" | "M5") {
                    self.laser_commands.push(text.clone());
                }
                self.m_commands.insert(code);
            }
            _ if code.starts_with('G') => {
                self.g_commands.insert(code);
            }
            _ => {}
        }
    }
}

/// Outcome of a replay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayReport {
    pub message: String,
    pub commands_sent: usize,
    pub bounds: BoundingBox,
    /// Work coordinates the toolpath centre was placed on
    pub target_center: (f64, f64),
    pub summary: ToolpathSummary,
    pub final_position: Position,
}

/// Replays a parsed program on a borrowed GRBL connection
pub struct ToolpathReplay<'a> {
    grbl: &'a mut GrblConnection,
    settings: &'a MotionSettings,
}

impl<'a> ToolpathReplay<'a> {
    pub fn new(grbl: &'a mut GrblConnection, settings: &'a MotionSettings) -> Self {
        Self { grbl, settings }
    }

    fn wait_for_move(&mut self, length: f64, feed: f64, settle: std::time::Duration) -> Result<()> {
        if length > 0.0 {
            self.grbl.clock().sleep(move_duration(length, feed) + settle);
            self.grbl.drain()?;
        }
        Ok(())
    }

    fn send_retrying(&mut self, text: &str, label: &str) -> Result<()> {
        let request = CommandRequest::new(text)
            .with_label(label)
            .with_retries(self.settings.command_retries)
            .with_timeout(self.settings.command_timeout());
        let response = self.grbl.send_command(&request)?;
        if response.success {
            debug!("{} executed", text);
        } else {
            warn!("{} failed: {}", text, response.response);
        }
        Ok(())
    }

    /// Validate, parse, and run `program`
    ///
    /// Everything that can be rejected is rejected before the first byte is
    /// written: laser power, feeds, coordinate words, and an empty toolpath.
    pub fn run(&mut self, program: &str, request: &ReplayRequest) -> Result<ReplayReport> {
        if request.laser_power > MAX_LASER_POWER {
            return Err(MotionError::LaserPowerOutOfRange {
                power: request.laser_power,
            }
            .into());
        }
        validate_feed(request.feed)?;
        validate_feed(request.movement_feed)?;

        let mut lines = parse_program(program, request.invert_y)?;
        apply_laser_power(&mut lines, request.laser_power);
        let bounds = BoundingBox::of(&lines).ok_or(MotionError::EmptyToolpath)?;
        info!(
            "Replaying {} lines, toolpath {:.1} x {:.1}mm, laser power {}",
            lines.len(),
            bounds.width(),
            bounds.height(),
            request.laser_power
        );

        let (start_x, start_y) = self
            .grbl
            .query_position()?
            .work_xy()
            .ok_or(MotionError::PositionUnavailable)?;
        self.grbl.set_mode_absolute()?;

        let (raw_cx, raw_cy) = bounds.center();
        let target = (start_x + request.origin_x, start_y + request.origin_y);
        let (dx, dy) = (target.0 - raw_cx, target.1 - raw_cy);
        debug!(
            "Toolpath centre ({:.3}, {:.3}) -> ({:.3}, {:.3})",
            raw_cx, raw_cy, target.0, target.1
        );

        let movement_feed = request.movement_feed;
        self.grbl
            .move_absolute(Some(target.0), Some(target.1), None, Some(movement_feed))?;
        self.wait_for_move(
            path_length(target.0 - start_x, target.1 - start_y),
            movement_feed,
            self.settings.settle(),
        )?;

        let mut current = target;
        let mut commands_sent = 0;
        let mut summary = ToolpathSummary::default();

        for line in &lines {
            summary.record(line);
            match line {
                GcodeLine::AbsoluteMode => {
                    self.grbl.set_mode_absolute()?;
                    commands_sent += 1;
                }
                GcodeLine::RelativeMode => {
                    warn!("Relative mode (G91) in program, absolute mode is required; skipping");
                }
                GcodeLine::MCommand { text, .. } => {
                    self.send_retrying(text, "G-code M-command")?;
                    commands_sent += 1;
                }
                GcodeLine::Passthrough { text, .. } => {
                    self.send_retrying(text, "G-code command")?;
                    commands_sent += 1;
                }
                GcodeLine::Motion { rapid, x, y, feed, .. } => {
                    if !line.has_xy() {
                        debug!("Skipping motion line without X/Y");
                        continue;
                    }
                    let next = (
                        x.map_or(current.0, |x| x + dx),
                        y.map_or(current.1, |y| y + dy),
                    );
                    let feed = if *rapid {
                        movement_feed
                    } else {
                        feed.filter(|f| *f > 0.0).unwrap_or(request.feed)
                    };

                    self.grbl
                        .move_absolute(Some(next.0), Some(next.1), None, Some(feed))?;
                    self.wait_for_move(
                        path_length(next.0 - current.0, next.1 - current.1),
                        feed,
                        self.settings.replay_settle(),
                    )?;
                    current = next;
                    commands_sent += 1;
                }
                GcodeLine::Ignored { text, .. } => {
                    debug!("Not sending {}", text);
                }
            }
        }

        info!(
            "G-commands seen: {:?}, M-commands seen: {:?}",
            summary.g_commands, summary.m_commands
        );
        if summary.laser_commands.is_empty() {
            warn!("No laser on/off commands (M3/M4/M5) in program");
        } else {
            info!("Laser commands: {:?}", summary.laser_commands);
        }

        self.grbl
            .move_absolute(Some(0.0), Some(0.0), None, Some(movement_feed))?;
        self.wait_for_move(
            path_length(current.0, current.1),
            movement_feed,
            self.settings.settle(),
        )?;

        let final_position = self.grbl.query_position()?;
        Ok(ReplayReport {
            message: format!("Toolpath replayed, {} commands sent", commands_sent),
            commands_sent,
            bounds,
            target_center: target,
            summary,
            final_position,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SQUARE: &str = "\
; generated
G21
G90
G0 X10 Y10;
M3 S255
G1 X30 Y10 F3000;
G1 X30 Y30
G1 X10 Y30
G1 X10 Y10
M5
";

    #[test]
    fn test_parse_program() {
        let lines = parse_program(SQUARE, false).unwrap();
        assert_eq!(lines.len(), 9);
        assert_eq!(lines[0].code(), "G21");
        assert_eq!(lines[1], GcodeLine::AbsoluteMode);
        assert_eq!(
            lines[4],
            GcodeLine::Motion {
                rapid: false,
                x: Some(30.0),
                y: Some(10.0),
                z: None,
                feed: Some(3000.0),
            }
        );
    }

    #[test]
    fn test_parse_normalizes_codes() {
        let lines = parse_program("g01 x1 y2\nM03\n(comment)\n\n", false).unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].code(), "G1");
        assert_eq!(lines[1].code(), "M3");
    }

    #[test]
    fn test_invalid_coordinate_is_rejected() {
        let err = parse_program("G0 X1\nG1 X2 Yabc\n", false).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid coordinate 'Yabc' at line 2"
        );
    }

    #[test]
    fn test_invert_y() {
        let lines = parse_program("G1 X1 Y5", true).unwrap();
        assert!(matches!(lines[0], GcodeLine::Motion { y: Some(y), .. } if y == -5.0));
    }

    #[test]
    fn test_laser_power_rewrite_and_inject() {
        let mut lines = parse_program("M3 S255\nM3\nM4 S10\nM5", false).unwrap();
        apply_laser_power(&mut lines, 600);
        let texts: Vec<_> = lines
            .iter()
            .map(|l| match l {
                GcodeLine::MCommand { text, .. } => text.as_str(),
                _ => "",
            })
            .collect();
        assert_eq!(texts, vec!["M3 S600", "M3 S600", "M4 S10", "M5"]);
    }

    #[test]
    fn test_bounding_box() {
        let lines = parse_program(SQUARE, false).unwrap();
        let bounds = BoundingBox::of(&lines).unwrap();
        assert_eq!(bounds.center(), (20.0, 20.0));
        assert_eq!(bounds.width(), 20.0);

        let only_x = parse_program("G0 X5\nM5", false).unwrap();
        assert!(BoundingBox::of(&only_x).is_none());
    }

    #[test]
    fn test_summary_records_codes() {
        let lines = parse_program(SQUARE, false).unwrap();
        let mut summary = ToolpathSummary::default();
        lines.iter().for_each(|l| summary.record(l));
        assert!(summary.g_commands.contains("G21"));
        assert!(summary.g_commands.contains("G0"));
        assert_eq!(summary.laser_commands, vec!["M3 S255", "M5"]);
    }
}
