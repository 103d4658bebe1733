//! Gantry state behind the simulated ports
//!
//! Positions are tracked in motor steps, as GRBL does. The firmware turns
//! steps into millimetres with its `$10x` scale; the carriage turns them into
//! physical travel with the true scale. A wrong firmware scale therefore shows
//! up as a wrong measured length, exactly like on the real machine.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use super::SimConfig;
use crate::firmware::grbl::command::format_coordinate;

/// Transcript marker for the soft-reset byte
pub const TRANSCRIPT_RESET: &str = "^X";

const ALARM_RESET_IN_MOTION: u8 = 3;

/// Coarse firmware state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimMode {
    Idle,
    Run,
    Hold,
    Alarm,
}

impl SimMode {
    fn label(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Run => "Run",
            Self::Hold => "Hold:0",
            Self::Alarm => "Alarm",
        }
    }
}

/// Scripted switch behaviour
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SwitchOverride {
    /// Reports pressed from this simulated time on, wherever the carriage is
    PressedAfter(Duration),
    /// Never reports pressed
    Disconnected,
}

#[derive(Debug, Clone, Copy)]
struct Segment {
    target: [f64; 3],
    feed: f64,
}

#[derive(Debug, Clone, Copy)]
struct Active {
    from: [f64; 3],
    to: [f64; 3],
    feed: f64,
    started: Duration,
    duration: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Motion {
    Rapid,
    Linear,
}

/// Firmware and carriage state
#[derive(Debug)]
pub struct SimState {
    config: SimConfig,
    /// Current motor positions in steps (X, Y, Z)
    steps: [f64; 3],
    /// Position after every queued move, in steps
    planned: [f64; 3],
    /// G92 offset in firmware millimetres
    wco: [f64; 3],
    /// Next status report carries `WCO:`
    report_wco: bool,
    settings: BTreeMap<u16, f64>,
    queue: VecDeque<Segment>,
    active: Option<Active>,
    /// Simulated time the model has been advanced to
    time: Duration,
    mode: SimMode,
    held: bool,
    relative: bool,
    motion: Motion,
    feed: f64,
    line_buffer: Vec<u8>,
    output: VecDeque<u8>,
    transcript: Vec<String>,
    overrides: BTreeMap<u32, SwitchOverride>,
    frames_emitted: u64,
}

impl SimState {
    pub fn new(config: SimConfig) -> Self {
        let settings = config.firmware_settings.clone();
        Self {
            config,
            steps: [0.0; 3],
            planned: [0.0; 3],
            wco: [0.0; 3],
            report_wco: false,
            settings,
            queue: VecDeque::new(),
            active: None,
            time: Duration::ZERO,
            mode: SimMode::Idle,
            held: false,
            relative: false,
            motion: Motion::Rapid,
            feed: 0.0,
            line_buffer: Vec::new(),
            output: VecDeque::new(),
            transcript: Vec::new(),
            overrides: BTreeMap::new(),
            frames_emitted: 0,
        }
    }

    pub fn mode(&self) -> SimMode {
        self.mode
    }

    pub fn transcript(&self) -> &[String] {
        &self.transcript
    }

    pub fn clear_transcript(&mut self) {
        self.transcript.clear();
    }

    pub fn setting(&self, index: u16) -> Option<f64> {
        self.settings.get(&index).copied()
    }

    pub fn set_override(&mut self, switch_id: u32, value: SwitchOverride) {
        self.overrides.insert(switch_id, value);
    }

    /// Firmware steps-per-mm of motor `i`
    fn firmware_scale(&self, i: usize) -> f64 {
        self.settings
            .get(&(100 + i as u16))
            .copied()
            .filter(|v| *v > 0.0)
            .unwrap_or(1.0)
    }

    /// True steps-per-mm of motor `i`; both long-axis motors share the Y scale
    fn true_scale(&self, i: usize) -> f64 {
        match i {
            0 => self.config.x.true_steps_per_mm,
            _ => self.config.y.true_steps_per_mm,
        }
    }

    fn origin(&self, i: usize) -> f64 {
        match i {
            0 => self.config.x.start,
            _ => self.config.y.start,
        }
    }

    fn travel(&self, i: usize) -> f64 {
        match i {
            0 => self.config.x.travel,
            _ => self.config.y.travel,
        }
    }

    /// Physical carriage position of motor `i` in true millimetres
    fn physical_of(&self, i: usize, steps: f64) -> f64 {
        self.origin(i) + steps / self.true_scale(i)
    }

    pub fn physical(&self) -> [f64; 3] {
        [0, 1, 2].map(|i| self.physical_of(i, self.steps[i]))
    }

    /// Reported machine position in firmware millimetres
    pub fn mpos(&self) -> [f64; 3] {
        [0, 1, 2].map(|i| self.steps[i] / self.firmware_scale(i))
    }

    fn planned_mm(&self) -> [f64; 3] {
        [0, 1, 2].map(|i| self.planned[i] / self.firmware_scale(i))
    }

    /// Limit the steps of every motor to the hard stops
    fn clamp(&self, mut steps: [f64; 3]) -> [f64; 3] {
        for (i, value) in steps.iter_mut().enumerate() {
            let min = -self.config.overtravel;
            let max = self.travel(i) + self.config.overtravel;
            let physical = self.physical_of(i, *value);
            if physical < min || physical > max {
                *value = (physical.clamp(min, max) - self.origin(i)) * self.true_scale(i);
            }
        }
        steps
    }

    fn is_moving(&self) -> bool {
        self.active.is_some() || !self.queue.is_empty()
    }

    /// Advance the carriage to simulated time `now`
    pub fn sync(&mut self, now: Duration) {
        if now < self.time {
            return;
        }

        while !self.held {
            if self.active.is_none() {
                let Some(segment) = self.queue.pop_front() else {
                    break;
                };
                self.active = Some(self.activate(segment, self.time));
            }
            let Some(active) = self.active else {
                break;
            };

            let end = active.started + active.duration;
            if now >= end {
                self.steps = self.clamp(active.to);
                self.time = end;
                self.active = None;
            } else {
                let elapsed = (now - active.started).as_secs_f64();
                let t = elapsed / active.duration.as_secs_f64();
                let interpolated = [0, 1, 2].map(|i| active.from[i] + (active.to[i] - active.from[i]) * t);
                self.steps = self.clamp(interpolated);
                break;
            }
        }

        self.time = now;
        if self.mode == SimMode::Run && !self.is_moving() {
            self.mode = SimMode::Idle;
        }
    }

    fn activate(&self, segment: Segment, started: Duration) -> Active {
        let distance = (0..3)
            .map(|i| {
                let delta = (segment.target[i] - self.steps[i]) / self.firmware_scale(i);
                delta * delta
            })
            .sum::<f64>()
            .sqrt();
        let seconds = if segment.feed > 0.0 {
            distance / segment.feed * 60.0
        } else {
            0.0
        };
        Active {
            from: self.steps,
            to: segment.target,
            feed: segment.feed,
            started,
            duration: Duration::from_secs_f64(seconds),
        }
    }

    /// Feed bytes received from the host
    pub fn receive(&mut self, data: &[u8]) {
        for &byte in data {
            match byte {
                b'?' => self.report_status(),
                b'!' => self.feed_hold(),
                b'~' => self.cycle_start(),
                0x18 => self.soft_reset(),
                b'\r' | b'\n' => {
                    let line = String::from_utf8_lossy(&self.line_buffer).trim().to_string();
                    self.line_buffer.clear();
                    self.execute_line(&line);
                }
                _ => self.line_buffer.push(byte),
            }
        }
    }

    fn reply(&mut self, line: &str) {
        self.output.extend(line.as_bytes());
        self.output.extend(b"\r\n");
    }

    fn report_status(&mut self) {
        let mpos = self.mpos();
        let feed = self.active.map(|a| a.feed).unwrap_or(0.0);
        let mut status = format!(
            "<{}|MPos:{},{},{}|FS:{:.0},0",
            self.mode.label(),
            format_coordinate(mpos[0]),
            format_coordinate(mpos[1]),
            format_coordinate(mpos[2]),
            feed
        );
        if std::mem::take(&mut self.report_wco) {
            status.push_str(&format!(
                "|WCO:{},{},{}",
                format_coordinate(self.wco[0]),
                format_coordinate(self.wco[1]),
                format_coordinate(self.wco[2])
            ));
        }
        status.push('>');
        self.reply(&status);
    }

    fn feed_hold(&mut self) {
        self.transcript.push("!".to_string());
        if self.held || !self.is_moving() {
            return;
        }
        if let Some(active) = self.active.take() {
            self.queue.push_front(Segment {
                target: active.to,
                feed: active.feed,
            });
        }
        self.held = true;
        self.mode = SimMode::Hold;
    }

    fn cycle_start(&mut self) {
        self.transcript.push("~".to_string());
        if self.held {
            self.held = false;
            self.mode = SimMode::Run;
        }
    }

    fn soft_reset(&mut self) {
        self.transcript.push(TRANSCRIPT_RESET.to_string());
        let interrupted = self.held || self.is_moving();

        self.queue.clear();
        self.active = None;
        self.held = false;
        self.planned = self.steps;
        self.wco = [0.0; 3];
        self.report_wco = true;
        self.relative = false;
        self.motion = Motion::Rapid;
        self.feed = 0.0;
        self.line_buffer.clear();

        if interrupted {
            self.mode = SimMode::Alarm;
            self.reply(&format!("ALARM:{}", ALARM_RESET_IN_MOTION));
        } else if self.mode != SimMode::Alarm {
            self.mode = SimMode::Idle;
        }
        self.reply("");
        self.reply("Grbl 1.1h ['$' for help]");
        if self.mode == SimMode::Alarm {
            self.reply("[MSG:'$H'|'$X' to unlock]");
        }
    }

    fn execute_line(&mut self, line: &str) {
        if line.is_empty() {
            self.reply("ok");
            return;
        }
        self.transcript.push(line.to_string());

        let result = if line.starts_with('$') {
            self.execute_system(line)
        } else if self.mode == SimMode::Alarm {
            Err(9)
        } else {
            self.execute_gcode(line)
        };

        match result {
            Ok(()) => self.reply("ok"),
            Err(code) => self.reply(&format!("error:{}", code)),
        }
    }

    fn execute_system(&mut self, line: &str) -> Result<(), u8> {
        let body = &line[1..];
        match body {
            "$" => {
                let dump: Vec<String> = self
                    .settings
                    .iter()
                    .map(|(index, value)| format!("${}={}", index, value))
                    .collect();
                for entry in dump {
                    self.reply(&entry);
                }
                Ok(())
            }
            "X" | "x" => {
                if self.mode == SimMode::Alarm {
                    self.mode = SimMode::Idle;
                }
                self.reply("[MSG:Caution: Unlocked]");
                Ok(())
            }
            "H" | "h" => Err(5),
            _ => {
                let (index, value) = body.split_once('=').ok_or(3u8)?;
                let index: u16 = index.trim().parse().map_err(|_| 3u8)?;
                let value: f64 = value.trim().parse().map_err(|_| 2u8)?;
                if self.is_moving() {
                    return Err(8);
                }
                self.settings.insert(index, value);
                Ok(())
            }
        }
    }

    fn execute_gcode(&mut self, line: &str) -> Result<(), u8> {
        let words = tokenize(line)?;

        let mut axes: [Option<f64>; 3] = [None; 3];
        let mut feed = None;
        let mut motion = None;
        let mut offset = false;

        for (letter, value) in words {
            match letter {
                'G' => match value as i64 {
                    0 => motion = Some(Motion::Rapid),
                    1 => motion = Some(Motion::Linear),
                    90 => self.relative = false,
                    91 => self.relative = true,
                    92 => offset = true,
                    17 | 20 | 21 | 28 | 30 | 54 | 94 => {}
                    _ => return Err(20),
                },
                'M' => match value as i64 {
                    2..=5 | 8 | 9 | 30 => {}
                    _ => return Err(20),
                },
                'X' => axes[0] = Some(value),
                'Y' => axes[1] = Some(value),
                'Z' => axes[2] = Some(value),
                'F' => feed = Some(value),
                'S' | 'N' => {}
                _ => return Err(20),
            }
        }

        if let Some(feed) = feed {
            if feed < 0.0 {
                return Err(4);
            }
            self.feed = feed;
        }
        if let Some(motion) = motion {
            self.motion = motion;
        }

        if axes.iter().all(Option::is_none) {
            return Ok(());
        }

        let planned = self.planned_mm();
        if offset {
            for (i, value) in axes.iter().enumerate() {
                if let Some(value) = *value {
                    self.wco[i] = planned[i] - value;
                }
            }
            self.report_wco = true;
            return Ok(());
        }

        let feed = match self.motion {
            Motion::Rapid => self.setting(110).unwrap_or(10_000.0),
            Motion::Linear if self.feed > 0.0 => self.feed,
            Motion::Linear => return Err(22),
        };

        let mut target = self.planned;
        for (i, value) in axes.iter().enumerate() {
            if let Some(value) = *value {
                let mm = if self.relative {
                    planned[i] + value
                } else {
                    value + self.wco[i]
                };
                target[i] = mm * self.firmware_scale(i);
            }
        }

        self.planned = target;
        self.queue.push_back(Segment { target, feed });
        if !self.held {
            self.mode = SimMode::Run;
        }
        Ok(())
    }

    pub fn take_line(&mut self) -> Option<String> {
        let end = self.output.iter().position(|b| *b == b'\n')?;
        let bytes: Vec<u8> = self.output.drain(..=end).collect();
        Some(String::from_utf8_lossy(&bytes).trim().to_string())
    }

    pub fn take_output(&mut self) -> Vec<u8> {
        self.output.drain(..).collect()
    }

    pub fn clear_output(&mut self) {
        self.output.clear();
    }

    fn switch_pressed(&self, id: u32) -> bool {
        match self.overrides.get(&id) {
            Some(SwitchOverride::Disconnected) => return false,
            Some(SwitchOverride::PressedAfter(at)) if self.time >= *at => return true,
            _ => {}
        }

        let physical = self.physical();
        let x = &self.config.x;
        let y = &self.config.y;
        if x.plus_switches.contains(&id) {
            return physical[0] >= x.travel;
        }
        if x.minus_switches.contains(&id) {
            return physical[0] <= 0.0;
        }
        // One switch per long-axis motor: index 0 on the Y side, 1 on the Z side
        if let Some(side) = y.plus_switches.iter().position(|s| *s == id) {
            return physical[1 + side.min(1)] >= y.travel;
        }
        if let Some(side) = y.minus_switches.iter().position(|s| *s == id) {
            return physical[1 + side.min(1)] <= 0.0;
        }
        false
    }

    /// One telemetry line from the limit controller
    pub fn limit_line(&mut self) -> String {
        self.frames_emitted += 1;
        if let Some(every) = self.config.limit_noise_every {
            if every > 0 && self.frames_emitted % every == 0 {
                return "{\"device\": \"limit-controller\", \"switch".to_string();
            }
        }

        let mut ids: Vec<u32> = self
            .config
            .x
            .plus_switches
            .iter()
            .chain(&self.config.x.minus_switches)
            .chain(&self.config.y.plus_switches)
            .chain(&self.config.y.minus_switches)
            .copied()
            .collect();
        ids.sort_unstable();
        ids.dedup();

        let switches: Vec<String> = ids
            .iter()
            .map(|id| format!("{{\"id\": {}, \"state\": {}}}", id, u8::from(self.switch_pressed(*id))))
            .collect();
        format!(
            "{{\"device\": \"{}\", \"switches\": [{}]}}",
            self.config.device_id,
            switches.join(", ")
        )
    }
}

/// Split a G-code line into (letter, value) words; comments are dropped
fn tokenize(line: &str) -> Result<Vec<(char, f64)>, u8> {
    let mut words = Vec::new();
    let upper = line.to_ascii_uppercase();
    let code = upper.split(';').next().unwrap_or_default();
    let mut chars = code.chars().peekable();

    while let Some(c) = chars.next() {
        if c.is_whitespace() {
            continue;
        }
        if c == '(' {
            for skipped in chars.by_ref() {
                if skipped == ')' {
                    break;
                }
            }
            continue;
        }
        if !c.is_ascii_alphabetic() {
            return Err(1);
        }
        let mut number = String::new();
        while let Some(&next) = chars.peek() {
            if next.is_ascii_digit() || next == '.' || next == '-' || next == '+' {
                number.push(next);
                chars.next();
            } else {
                break;
            }
        }
        let value = number.parse::<f64>().map_err(|_| 2u8)?;
        words.push((c, value));
    }

    Ok(words)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize() {
        let words = tokenize("G1 X10.5 Y-2 F800 ; move").unwrap();
        assert_eq!(words, vec![('G', 1.0), ('X', 10.5), ('Y', -2.0), ('F', 800.0)]);
        assert_eq!(tokenize("G1 X").unwrap_err(), 2);
        assert!(tokenize("(comment) G90").unwrap() == vec![('G', 90.0)]);
    }
}
