//! Two-pass homing and steps-per-mm calibration
//!
//! Each axis runs the same sequence:
//!
//! ```text
//! ROUGH_SEEK_FORWARD → ROUGH_SEEK_BACKWARD → CENTER → FAST_APPROACH →
//! FINE_SEEK_FORWARD → RETREAT → FINE_SEEK_BACKWARD → CALIBRATE → RECENTER → DONE
//! ```
//!
//! The rough pass runs into each limit at speed and recovers with a feed hold
//! and soft reset; its elapsed-time distance estimate is advisory. The fine
//! pass steps onto each limit in small increments and never resets, so any
//! controller fault during it aborts the sequence. Only fine-pass figures feed
//! the calibration.

use std::time::Duration;
use tracing::{debug, info, info_span, warn};

use lasergantry_communication::firmware::grbl::ResponseLine;
use lasergantry_communication::{CommandRequest, GrblConnection, LimitController, MoveCommand, SettingKey};
use lasergantry_core::{Axis, HomingError, HomingStage, Result, SharedClock};
use lasergantry_settings::HomingSettings;

use crate::calibration::{
    correction_factor, corrected_steps_per_mm, CalibrationResult, HomeAllResult, HomingStatus,
};
use crate::motion::{move_duration, path_length};

/// Direction of travel along an axis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Plus,
    Minus,
}

impl Direction {
    pub fn sign(self) -> f64 {
        match self {
            Self::Plus => 1.0,
            Self::Minus => -1.0,
        }
    }

    fn rough_stage(self) -> HomingStage {
        match self {
            Self::Plus => HomingStage::RoughSeekForward,
            Self::Minus => HomingStage::RoughSeekBackward,
        }
    }

    fn fine_stage(self) -> HomingStage {
        match self {
            Self::Plus => HomingStage::FineSeekForward,
            Self::Minus => HomingStage::FineSeekBackward,
        }
    }
}

/// Where a rough seek stopped
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoughSeek {
    /// Switch that reported pressed
    pub switch_id: u32,
    pub elapsed: Duration,
    /// `elapsed × feed`, advisory only
    pub estimated_distance: f64,
}

/// One relative move of a single physical axis
fn axis_move(axis: Axis, distance: f64, feed: f64) -> MoveCommand {
    let command = MoveCommand::linear().feed(feed);
    match axis {
        Axis::X => command.x(distance),
        Axis::Y => command.y(distance),
    }
}

/// Length the firmware plans for an axis move (Y drags the coupled Z along)
fn axis_path_length(axis: Axis, distance: f64) -> f64 {
    match axis {
        Axis::X => path_length(distance, 0.0),
        Axis::Y => path_length(0.0, distance),
    }
}

/// Homing sequence over borrowed connections
///
/// Holds the GRBL and limit channels for the duration of one sequence.
pub struct Homing<'a> {
    grbl: &'a mut GrblConnection,
    limits: &'a mut LimitController,
    settings: &'a HomingSettings,
    clock: SharedClock,
}

impl<'a> Homing<'a> {
    pub fn new(
        grbl: &'a mut GrblConnection,
        limits: &'a mut LimitController,
        settings: &'a HomingSettings,
    ) -> Self {
        let clock = grbl.clock().clone();
        Self {
            grbl,
            limits,
            settings,
            clock,
        }
    }

    fn pause_and_drain(&mut self) -> Result<()> {
        self.clock.sleep(self.settings.command_pause());
        self.grbl.drain()?;
        Ok(())
    }

    fn relative_mode(&mut self) -> Result<()> {
        self.grbl.set_mode_relative()?;
        self.pause_and_drain()
    }

    fn absolute_mode(&mut self) -> Result<()> {
        self.grbl.set_mode_absolute()?;
        self.pause_and_drain()
    }

    fn set_idle_delay(&mut self, value: f64) -> Result<()> {
        self.grbl.update_setting(SettingKey::StepIdleDelay, value)?;
        self.pause_and_drain()
    }

    fn axis_position(&mut self, axis: Axis) -> Result<Option<f64>> {
        Ok(self.grbl.query_position()?.axis(axis))
    }

    /// Sleep out a move of `length` at `feed`, then discard the replies
    fn wait_for_move(&mut self, length: f64, feed: f64) -> Result<()> {
        self.clock
            .sleep(move_duration(length, feed) + self.settings.move_settle());
        self.grbl.drain()?;
        Ok(())
    }

    /// Relative move at travel feed, waited out
    fn travel(&mut self, axis: Axis, distance: f64) -> Result<()> {
        let feed = self.settings.travel_feed;
        debug!("{} travel {:.3}mm at F{:.0}", axis, distance, feed);
        self.grbl.write_move(&axis_move(axis, distance, feed))?;
        self.wait_for_move(axis_path_length(axis, distance), feed)
    }

    /// Recover after running into a limit: hold, reset, unlock, re-lock motors
    fn recover_from_hit(&mut self) -> Result<()> {
        let pause = self.settings.stop_pause();
        self.grbl.feed_hold()?;
        self.clock.sleep(pause);
        self.grbl.soft_reset()?;
        self.grbl.clear_input()?;
        self.grbl.unlock_alarm()?;
        self.clock.sleep(pause);
        self.grbl
            .update_setting(SettingKey::StepIdleDelay, self.settings.lock_idle_delay)?;
        self.clock.sleep(pause);
        self.grbl.drain()?;
        Ok(())
    }

    /// Fast seek toward a limit, tolerant of running into the hard stop
    ///
    /// Commands one long relative move and polls telemetry until one of
    /// `switches` reports pressed, then stops the controller with a feed hold
    /// and soft reset and unlocks it again. Expects relative mode. Fails if no
    /// switch reports within the nominal move time plus the grace period.
    pub fn move_until_limit_fast(
        &mut self,
        axis: Axis,
        direction: Direction,
        switches: &[u32],
        feed: f64,
    ) -> Result<RoughSeek> {
        let max_distance = self.settings.profile(axis).rough_max_distance;
        let stage = direction.rough_stage();
        info!(
            "{}: seeking {} limit {:?} at F{:.0}",
            stage,
            if direction == Direction::Plus { "+" } else { "-" },
            switches,
            feed
        );

        self.grbl
            .write_move(&axis_move(axis, direction.sign() * max_distance, feed))?;
        let started = self.clock.now();
        let budget =
            move_duration(axis_path_length(axis, max_distance), feed) + self.settings.rough_grace();
        let deadline = started + budget;
        let poll = self.settings.rough_poll();

        while self.clock.before(deadline) {
            let Some(switch_id) = self.limits.first_pressed(switches, poll)? else {
                continue;
            };

            let elapsed = self.clock.now().saturating_sub(started);
            let estimated_distance = elapsed.as_secs_f64() * feed / 60.0;
            info!(
                "Switch {} pressed after {:.2}s (~{:.1}mm, estimate)",
                switch_id,
                elapsed.as_secs_f64(),
                estimated_distance
            );
            self.recover_from_hit()?;
            return Ok(RoughSeek {
                switch_id,
                elapsed,
                estimated_distance,
            });
        }

        warn!("{}: no switch of {:?} within {:?}", stage, switches, budget);
        Err(HomingError::LimitNotReached {
            axis,
            stage,
            switches: switches.to_vec(),
        }
        .into())
    }

    fn switch_pressed(&mut self, switches: &[u32]) -> Result<bool> {
        let window = self.settings.switch_check_timeout();
        match self.limits.read_frame(window)? {
            Some(frame) => Ok(frame.first_pressed(switches).is_some()),
            None => {
                debug!("No telemetry within {:?}", window);
                Ok(false)
            }
        }
    }

    /// Step onto a limit in fine increments; returns the distance stepped
    ///
    /// Checks the switch before every step and waits for the controller's
    /// reply to each one. An `error:` or `alarm:` reply aborts with
    /// [`HomingError::ControllerFault`]; no reset is attempted. Expects
    /// relative mode.
    pub fn move_until_limit_fine(
        &mut self,
        axis: Axis,
        direction: Direction,
        switches: &[u32],
    ) -> Result<f64> {
        let stage = direction.fine_stage();
        let step = self.settings.fine_step;
        let feed = self.settings.fine_feed;
        let line = axis_move(axis, direction.sign() * step, feed).to_line();
        let request = CommandRequest::new(line)
            .with_label(format!("{} step", stage))
            .with_retries(1)
            .with_timeout(self.settings.fine_reply_timeout());

        let mut traveled = 0.0;
        loop {
            if self.switch_pressed(switches)? {
                info!("{}: switch pressed after {:.2}mm", stage, traveled);
                return Ok(traveled);
            }
            if traveled >= self.settings.fine_max_travel {
                break;
            }

            let response = self.grbl.send_command(&request)?;
            if !response.success {
                let last = response.response.lines().last().unwrap_or_default();
                if ResponseLine::classify(last).is_terminal() {
                    return Err(HomingError::ControllerFault {
                        axis,
                        stage,
                        response: last.trim().to_string(),
                    }
                    .into());
                }
                warn!("{}: no reply to step, continuing", stage);
            }
            traveled += step;

            self.clock.sleep(
                move_duration(axis_path_length(axis, step), feed) + self.settings.stop_pause(),
            );
        }

        warn!("{}: gave up after {:.2}mm", stage, traveled);
        Err(HomingError::LimitNotReached {
            axis,
            stage,
            switches: switches.to_vec(),
        }
        .into())
    }

    /// Home and calibrate one axis, parking it at the measured centre
    pub fn home_axis(&mut self, axis: Axis) -> Result<CalibrationResult> {
        let span = info_span!("home_axis", axis = %axis);
        let _enter = span.enter();

        let profile = self.settings.profile(axis).clone();
        let margin = self.settings.safety_margin;
        info!("Homing {} axis (known length {:.1}mm)", axis, profile.known_length);

        self.set_idle_delay(self.settings.lock_idle_delay)?;

        // Rough pass
        self.relative_mode()?;
        self.move_until_limit_fast(axis, Direction::Plus, &profile.plus_switches, profile.rough_feed)?;
        let plus_rough = self.axis_position(axis)?;

        self.relative_mode()?;
        let second = self.move_until_limit_fast(
            axis,
            Direction::Minus,
            &profile.minus_switches,
            profile.rough_feed,
        )?;
        let minus_rough = self.axis_position(axis)?;

        let rough_length = match (plus_rough, minus_rough) {
            (Some(plus), Some(minus)) => (plus - minus).abs(),
            _ => second.estimated_distance,
        };
        info!("Rough axis length ~{:.1}mm (advisory)", rough_length);

        // Centre
        debug!("{}", HomingStage::Center);
        self.relative_mode()?;
        let here = self.axis_position(axis)?;
        let to_center = match (plus_rough, minus_rough, here) {
            (Some(plus), Some(minus), Some(here)) => (plus + minus) / 2.0 - here,
            _ => rough_length / 2.0,
        };
        self.travel(axis, to_center)?;
        self.clock.sleep(profile.center_pause());

        // Fast approach
        debug!("{}", HomingStage::FastApproach);
        let at_center = self.axis_position(axis)?;
        let fast_approach = match (plus_rough, at_center) {
            (Some(plus), Some(center)) => (plus - center).abs() - margin,
            _ => to_center - margin,
        };
        if fast_approach > 0.0 {
            self.travel(axis, fast_approach)?;
        }

        let fine_plus = self.move_until_limit_fine(axis, Direction::Plus, &profile.plus_switches)?;
        let plus_fine = self.axis_position(axis)?;
        let center_to_plus = match (at_center, plus_fine) {
            (Some(center), Some(plus)) => (plus - center).abs(),
            _ => fast_approach.max(0.0) + fine_plus,
        };

        // Retreat toward the minus limit, stopping short by the margin
        debug!("{}", HomingStage::Retreat);
        let retreat = match (plus_fine, minus_rough) {
            (Some(plus), Some(minus)) => (plus - minus).abs() - margin,
            _ => 2.0 * center_to_plus - margin,
        };
        self.travel(axis, -retreat)?;

        let fine_minus =
            self.move_until_limit_fine(axis, Direction::Minus, &profile.minus_switches)?;
        let minus_fine = self.axis_position(axis)?;

        let measured = match (plus_fine, minus_fine) {
            (Some(plus), Some(minus)) => (plus - minus).abs(),
            _ => retreat + fine_minus,
        };
        info!(
            "Measured {} axis length {:.3}mm (known {:.1}mm)",
            axis, measured, profile.known_length
        );

        // Calibrate
        if !measured.is_finite() || measured <= 0.0 {
            return Err(HomingError::InvalidMeasurement { axis, measured }.into());
        }
        let factor = correction_factor(measured, profile.known_length);
        info!("{}: correction factor {:.4}", HomingStage::Calibrate, factor);

        let mut steps_per_mm = profile.default_steps_per_mm;
        for (i, key) in SettingKey::steps_per_mm(axis).iter().copied().enumerate() {
            let current = self
                .grbl
                .get_setting(key)
                .unwrap_or(profile.default_steps_per_mm);
            let updated = corrected_steps_per_mm(current, factor);
            info!("{}: {:.3} -> {:.3}", key, current, updated);
            self.grbl.update_setting(key, updated)?;
            self.clock.sleep(self.settings.command_pause());
            if i == 0 {
                steps_per_mm = updated;
            }
        }
        self.grbl.drain()?;

        // Recenter; machine coordinates shrink by the factor once the scale changes
        debug!("{}", HomingStage::Recenter);
        let plus_limit = plus_fine.map(|p| p / factor);
        let minus_limit = minus_fine.map(|m| m / factor);
        let here = self.axis_position(axis)?;
        let to_center = match (plus_limit, minus_limit, here) {
            (Some(plus), Some(minus), Some(here)) => (plus + minus) / 2.0 - here,
            _ => profile.known_length / 2.0,
        };
        self.relative_mode()?;
        self.travel(axis, to_center)?;

        self.set_idle_delay(self.settings.release_idle_delay)?;
        self.absolute_mode()?;

        info!("{} axis homing {}", axis, HomingStage::Done);
        Ok(CalibrationResult {
            axis,
            measured_length: measured,
            known_length: profile.known_length,
            correction_factor: factor,
            steps_per_mm,
            minus_limit,
            plus_limit,
            status: HomingStatus::Complete,
        })
    }

    /// Declared coordinate of the parked position for one axis
    ///
    /// The origin sits `origin_offset` inward from the minus limit.
    fn origin_coordinate(&self, result: &CalibrationResult, current: Option<f64>) -> f64 {
        let offset = self.settings.origin_offset;
        match (current, result.minus_limit) {
            (Some(current), Some(minus)) => current - (minus + offset),
            _ => result.known_length / 2.0 - offset,
        }
    }

    /// Calibrate Y then X, set the origin, optionally trace the perimeter
    pub fn home_all(&mut self, outline: bool) -> Result<HomeAllResult> {
        info!("Starting full calibration sequence");
        let y = self.home_axis(Axis::Y)?;
        let x = self.home_axis(Axis::X)?;

        self.grbl.wake()?;
        self.absolute_mode()?;

        let position = self.grbl.query_position()?;
        let origin_x = self.origin_coordinate(&x, position.x);
        let origin_y = self.origin_coordinate(&y, position.y);
        info!(
            "Declaring parked position X{:.3} Y{:.3} (origin {:.1}mm inside the front-left corner)",
            origin_x, origin_y, self.settings.origin_offset
        );
        self.grbl
            .set_work_offset(Some(origin_x), Some(origin_y), None)?;
        self.pause_and_drain()?;

        if outline {
            self.outline_workspace(x.known_length, y.known_length, (origin_x, origin_y))?;
        }

        info!("Full calibration complete");
        Ok(HomeAllResult {
            status: HomingStatus::Complete,
            message: "Full calibration completed successfully".to_string(),
            y,
            x,
            origin_offset_x: origin_x,
            origin_offset_y: origin_y,
            outlined: outline,
        })
    }

    /// Trace the workspace inset by the outline margin, then return to origin
    ///
    /// `from` is the current position in work coordinates.
    pub fn outline_workspace(&mut self, x_length: f64, y_length: f64, from: (f64, f64)) -> Result<()> {
        let margin = self.settings.outline_margin;
        let offset = self.settings.origin_offset;
        let feed = self.settings.outline_feed;

        let (left, right) = (margin - offset, x_length - margin - offset);
        let (front, back) = (margin - offset, y_length - margin - offset);
        info!(
            "Outlining workspace X[{:.1}, {:.1}] Y[{:.1}, {:.1}]",
            left, right, front, back
        );

        self.absolute_mode()?;
        let corners = [
            (left, front),
            (right, front),
            (right, back),
            (left, back),
            (left, front),
            (0.0, 0.0),
        ];

        let mut current = from;
        for (x, y) in corners {
            self.grbl.move_absolute(Some(x), Some(y), None, Some(feed))?;
            self.wait_for_move(path_length(x - current.0, y - current.1), feed)?;
            current = (x, y);
        }
        Ok(())
    }
}
