//! GRBL command types and G-code line building
//!
//! The gantry's long axis is driven by two motors that GRBL sees as Y and Z.
//! Every line built here that moves Y also moves Z by the identical value, so
//! the two sides of the gantry can never be commanded apart.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One command to execute with retries
#[derive(Debug, Clone, PartialEq)]
pub struct CommandRequest {
    /// Command text without the trailing newline
    pub command: String,
    /// Human-readable label for logs
    pub label: String,
    /// Attempts before giving up
    pub retries: u32,
    /// Per-attempt wait for a terminal line
    pub timeout: Duration,
}

impl CommandRequest {
    /// Request with the default budget of 3 attempts and 2 s per attempt
    pub fn new(command: impl Into<String>) -> Self {
        let command = command.into();
        Self {
            label: command.clone(),
            command,
            retries: 3,
            timeout: Duration::from_secs(2),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Outcome of a [`CommandRequest`]
///
/// A rejected or unanswered command is `success == false`, not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub success: bool,
    /// Lines received during the final attempt, newline-joined
    pub response: String,
    /// Attempts consumed
    pub attempts: u32,
}

/// Terminal classification of one response line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseLine {
    Ok,
    Error,
    Alarm,
    /// Informational line, keep reading
    Other,
}

impl ResponseLine {
    pub fn classify(line: &str) -> Self {
        let lower = line.trim().to_ascii_lowercase();
        if lower == "ok" {
            Self::Ok
        } else if lower.starts_with("error:") {
            Self::Error
        } else if lower.starts_with("alarm:") {
            Self::Alarm
        } else {
            Self::Other
        }
    }

    /// `ok`, `error:` or `alarm:`
    pub fn is_terminal(self) -> bool {
        self != Self::Other
    }
}

/// Builder for a single coupled G-code line
///
/// ```
/// use lasergantry_communication::firmware::grbl::MoveCommand;
///
/// let line = MoveCommand::linear().x(10.0).y(-5.0).feed(800.0).to_line();
/// assert_eq!(line, "G1 X10.000 Y-5.000 Z-5.000 F800");
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveCommand {
    word: &'static str,
    x: Option<f64>,
    y: Option<f64>,
    z: Option<f64>,
    feed: Option<f64>,
}

impl MoveCommand {
    fn with_word(word: &'static str) -> Self {
        Self {
            word,
            x: None,
            y: None,
            z: None,
            feed: None,
        }
    }

    /// `G1` linear move
    pub fn linear() -> Self {
        Self::with_word("G1")
    }

    /// `G92` work-coordinate offset
    pub fn work_offset() -> Self {
        Self::with_word("G92")
    }

    pub fn x(mut self, x: f64) -> Self {
        self.x = Some(x);
        self
    }

    pub fn y(mut self, y: f64) -> Self {
        self.y = Some(y);
        self
    }

    /// Independent Z; ignored when Y is present
    pub fn z(mut self, z: f64) -> Self {
        self.z = Some(z);
        self
    }

    pub fn feed(mut self, feed: f64) -> Self {
        self.feed = Some(feed);
        self
    }

    /// Set whichever coordinates are present
    pub fn maybe(mut self, x: Option<f64>, y: Option<f64>, z: Option<f64>, feed: Option<f64>) -> Self {
        self.x = x.or(self.x);
        self.y = y.or(self.y);
        self.z = z.or(self.z);
        self.feed = feed.or(self.feed);
        self
    }

    /// Z value actually emitted
    pub fn effective_z(&self) -> Option<f64> {
        self.y.or(self.z)
    }

    /// X, Y and Z words as emitted
    pub fn coordinates(&self) -> [Option<f64>; 3] {
        [self.x, self.y, self.effective_z()]
    }

    /// The command line, without a newline
    pub fn to_line(&self) -> String {
        let mut parts = vec![self.word.to_string()];
        if let Some(x) = self.x {
            parts.push(format!("X{}", format_coordinate(x)));
        }
        if let Some(y) = self.y {
            parts.push(format!("Y{}", format_coordinate(y)));
        }
        if let Some(z) = self.effective_z() {
            parts.push(format!("Z{}", format_coordinate(z)));
        }
        if let Some(feed) = self.feed {
            parts.push(format!("F{:.0}", feed));
        }
        parts.join(" ")
    }
}

/// Millimetre value with three decimals
pub fn format_coordinate(value: f64) -> String {
    let value = if value == 0.0 { 0.0 } else { value };
    format!("{:.3}", value)
}
