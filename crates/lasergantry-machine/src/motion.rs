//! Jogging and return-to-origin
//!
//! Every move here is one coupled G-code line followed by a sleep for the
//! time the firmware needs to run it. GRBL has no "distance since command"
//! query, so the executor waits out the estimate and then reads back the
//! position. Distances to absolute targets are taken in work coordinates,
//! the frame `G90` moves address after a `G92`.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use lasergantry_communication::GrblConnection;
use lasergantry_core::{MotionError, Position, Result};
use lasergantry_settings::MotionSettings;

/// Length of a planar move as the firmware plans it
///
/// Y moves drive the coupled Z motor by the same amount, so the planner sees
/// a three-axis vector `(dx, dy, dy)`.
pub fn path_length(dx: f64, dy: f64) -> f64 {
    (dx * dx + 2.0 * dy * dy).sqrt()
}

/// Time to cover `length` millimetres at `feed` mm/min
pub fn move_duration(length: f64, feed: f64) -> Duration {
    Duration::try_from_secs_f64(length.abs() / feed * 60.0).unwrap_or(Duration::ZERO)
}

pub(crate) fn validate_feed(feed: f64) -> Result<()> {
    if feed.is_finite() && feed > 0.0 {
        Ok(())
    } else {
        Err(MotionError::InvalidFeed { feed }.into())
    }
}

/// Relative jog
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JogRequest {
    /// mm, negative moves toward the minus limit
    pub x: Option<f64>,
    pub y: Option<f64>,
    /// mm/min
    pub feed: f64,
}

impl JogRequest {
    pub fn new(x: Option<f64>, y: Option<f64>, feed: f64) -> Self {
        Self { x, y, feed }
    }
}

/// Position after a jog or return-to-origin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JogReport {
    pub message: String,
    pub position: Position,
}

/// Executes jogs on a borrowed GRBL connection
pub struct MotionExecutor<'a> {
    grbl: &'a mut GrblConnection,
    settings: &'a MotionSettings,
}

impl<'a> MotionExecutor<'a> {
    pub fn new(grbl: &'a mut GrblConnection, settings: &'a MotionSettings) -> Self {
        Self { grbl, settings }
    }

    /// Carriage position in work coordinates
    fn current_xy(&mut self) -> Result<(f64, f64)> {
        self.grbl
            .query_position()?
            .work_xy()
            .ok_or_else(|| MotionError::PositionUnavailable.into())
    }

    fn wait_for_move(&mut self, length: f64, feed: f64) -> Result<()> {
        let wait = move_duration(length, feed) + self.settings.settle();
        debug!("Waiting {:?} for {:.3}mm at F{:.0}", wait, length, feed);
        self.grbl.clock().sleep(wait);
        self.grbl.drain()?;
        Ok(())
    }

    /// Move by the given offsets in relative mode
    pub fn jog(&mut self, request: &JogRequest) -> Result<JogReport> {
        if request.x.is_none() && request.y.is_none() {
            return Err(MotionError::NoAxisSpecified.into());
        }
        validate_feed(request.feed)?;

        self.current_xy()?;
        self.grbl.set_mode_relative()?;
        self.grbl
            .move_relative(request.x, request.y, None, Some(request.feed))?;

        let length = path_length(request.x.unwrap_or(0.0), request.y.unwrap_or(0.0));
        self.wait_for_move(length, request.feed)?;

        let position = self.grbl.query_position()?;
        info!("Jog complete: x={:?} y={:?}", position.x, position.y);
        Ok(JogReport {
            message: "Jog completed successfully".to_string(),
            position,
        })
    }

    /// Absolute move to work coordinate (0, 0)
    pub fn return_to_home(&mut self, feed: f64) -> Result<JogReport> {
        validate_feed(feed)?;

        let (x, y) = self.current_xy()?;
        self.grbl.set_mode_absolute()?;
        self.grbl
            .move_absolute(Some(0.0), Some(0.0), None, Some(feed))?;
        self.wait_for_move(path_length(x, y), feed)?;

        let position = self.grbl.query_position()?;
        info!("Returned to origin: x={:?} y={:?}", position.x, position.y);
        Ok(JogReport {
            message: "Returned to home successfully".to_string(),
            position,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_length_counts_coupled_motor() {
        assert_eq!(path_length(3.0, 0.0), 3.0);
        assert!((path_length(10.0, 20.0) - 30.0).abs() < 1e-12);
    }

    #[test]
    fn test_move_duration() {
        assert_eq!(move_duration(30.0, 60.0), Duration::from_secs(30));
        assert_eq!(move_duration(-30.0, 60.0), Duration::from_secs(30));
        assert_eq!(move_duration(0.0, 6000.0), Duration::ZERO);
    }

    #[test]
    fn test_validate_feed() {
        assert!(validate_feed(500.0).is_ok());
        assert!(validate_feed(0.0).is_err());
        assert!(validate_feed(f64::NAN).is_err());
    }
}
