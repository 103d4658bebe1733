//! GRBL protocol driver
//!
//! [`GrblConnection`] owns one serial channel to the motion controller plus
//! the cached settings snapshot read at connect time, and tracks the `G92`
//! work offset so positions can be read in either frame. All calls block; the
//! caller borrows the connection mutably for the whole of an operation, so
//! two commands are never in flight at once.

use std::time::Duration;

use lasergantry_core::{ConnectionError, Error, Position, Result, SharedClock};

use super::command::{CommandRequest, CommandResponse, MoveCommand, ResponseLine};
use super::error_decoder::describe_response;
use super::settings::{parse_settings, AxisSettings, SettingKey};
use super::status_parser::parse_position;
use crate::communication::{RealSerialPort, SerialPort, DEFAULT_BAUD_RATE};

/// Soft-reset byte (Ctrl-X)
pub const SOFT_RESET: u8 = 0x18;

/// Timing of the GRBL startup and command exchange
#[derive(Debug, Clone, PartialEq)]
pub struct GrblOptions {
    pub baud_rate: u32,
    /// Serial read timeout for a single line
    pub read_timeout: Duration,
    /// Wait after opening the port while the board reboots
    pub boot_delay: Duration,
    /// Wait after the wake sequence before discarding input
    pub wake_delay: Duration,
    /// Wait after `$$` before reading the dump
    pub settings_wait: Duration,
    /// Wait after a `$n=v` write before the value counts as applied
    pub setting_apply_delay: Duration,
    /// Wait after a soft reset
    pub reset_delay: Duration,
    /// Wait after `?` before reading the status reply
    pub status_wait: Duration,
}

impl Default for GrblOptions {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout: Duration::from_millis(100),
            boot_delay: Duration::from_secs(2),
            wake_delay: Duration::from_secs(1),
            settings_wait: Duration::from_millis(300),
            setting_apply_delay: Duration::from_millis(200),
            reset_delay: Duration::from_secs(1),
            status_wait: Duration::from_millis(200),
        }
    }
}

/// Connection to a GRBL controller
pub struct GrblConnection {
    port: Box<dyn SerialPort>,
    clock: SharedClock,
    settings: AxisSettings,
    options: GrblOptions,
    /// Last known `WCO`, machine minus work coordinates
    work_offset: [f64; 3],
}

impl std::fmt::Debug for GrblConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrblConnection")
            .field("port", &self.port.name())
            .field("settings", &self.settings.len())
            .field("work_offset", &self.work_offset)
            .finish()
    }
}

impl GrblConnection {
    /// Open a hardware port and run the startup exchange
    pub fn open(path: &str, clock: SharedClock, options: GrblOptions) -> Result<Self> {
        let port = RealSerialPort::open(path, options.baud_rate, options.read_timeout)?;
        Self::connect(Box::new(port), clock, options)
    }

    /// Run the startup exchange on an already open channel
    ///
    /// Waits for the board to boot, wakes it, then loads the settings cache
    /// from `$$`. On failure the channel is closed before the error returns.
    pub fn connect(port: Box<dyn SerialPort>, clock: SharedClock, options: GrblOptions) -> Result<Self> {
        let name = port.name();
        tracing::info!("Loading settings from GRBL controller at {}", name);

        let mut connection = Self {
            port,
            clock,
            settings: AxisSettings::new(),
            options,
            work_offset: [0.0; 3],
        };

        match connection.handshake() {
            Ok(()) => {
                tracing::info!(
                    "Settings loaded from GRBL controller at {} ({} values)",
                    name,
                    connection.settings.len()
                );
                Ok(connection)
            }
            Err(e) => {
                tracing::error!("Failed to connect to GRBL controller at {}: {}", name, e);
                if let Err(close_err) = connection.close() {
                    tracing::debug!("Close after failed handshake: {}", close_err);
                }
                Err(Error::from(ConnectionError::Handshake {
                    port: name,
                    reason: e.to_string(),
                }))
            }
        }
    }

    fn handshake(&mut self) -> Result<()> {
        self.clock.sleep(self.options.boot_delay);
        self.wake()?;
        let dump = self.query_settings()?;
        self.settings = AxisSettings::from_raw(&parse_settings(&dump));
        Ok(())
    }

    pub fn port_name(&self) -> String {
        self.port.name()
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn options(&self) -> &GrblOptions {
        &self.options
    }

    pub fn settings(&self) -> &AxisSettings {
        &self.settings
    }

    /// Offset between machine and work coordinates
    pub fn work_offset(&self) -> [f64; 3] {
        self.work_offset
    }

    /// Cached value of a setting
    pub fn get_setting(&self, key: SettingKey) -> Option<f64> {
        self.settings.get(key)
    }

    pub fn close(&mut self) -> Result<()> {
        tracing::debug!("Closing GRBL port {}", self.port.name());
        self.port.close()?;
        Ok(())
    }

    /// Wake sequence: blank lines, wait, discard whatever the board printed
    pub fn wake(&mut self) -> Result<()> {
        self.port.write(b"\r\n\r\n")?;
        self.clock.sleep(self.options.wake_delay);
        self.drain()?;
        Ok(())
    }

    /// Read and return everything currently buffered
    pub fn drain(&mut self) -> Result<String> {
        let data = self.port.read_available()?;
        let text = String::from_utf8_lossy(&data).trim().to_string();
        if !text.is_empty() {
            tracing::debug!("Drained: {}", text.replace('\n', " | "));
        }
        Ok(text)
    }

    pub fn clear_input(&mut self) -> Result<()> {
        self.port.clear_input()?;
        Ok(())
    }

    /// Query the full `$$` dump
    pub fn query_settings(&mut self) -> Result<String> {
        self.port.write(b"$$\n")?;
        self.clock.sleep(self.options.settings_wait);
        let data = self.port.read_available()?;
        Ok(String::from_utf8_lossy(&data).into_owned())
    }

    /// Send a command and wait for its terminal line, retrying on failure
    ///
    /// Each attempt clears the input buffer, writes the command, and reads
    /// lines until `ok`, `error:`/`alarm:`, or the attempt deadline. Only an
    /// I/O failure on the channel is an `Err`.
    pub fn send_command(&mut self, request: &CommandRequest) -> Result<CommandResponse> {
        let mut last_response = String::new();

        for attempt in 1..=request.retries {
            self.port.clear_input()?;
            self.port.write(format!("{}\n", request.command).as_bytes())?;

            let deadline = self.clock.deadline(request.timeout);
            let mut lines = Vec::new();
            let mut outcome = ResponseLine::Other;

            while outcome == ResponseLine::Other && self.clock.before(deadline) {
                let Some(line) = self.port.read_line()? else {
                    continue;
                };
                if line.is_empty() {
                    continue;
                }
                outcome = ResponseLine::classify(&line);
                lines.push(line);
            }

            last_response = lines.join("\n");
            if !last_response.is_empty() {
                tracing::debug!("{}: {}", request.label, last_response);
            }

            match outcome {
                ResponseLine::Ok => {
                    return Ok(CommandResponse {
                        success: true,
                        response: last_response,
                        attempts: attempt,
                    });
                }
                ResponseLine::Error | ResponseLine::Alarm => {
                    let last = lines.last().map(String::as_str).unwrap_or_default();
                    tracing::warn!(
                        "{} rejected (attempt {}/{}): {}",
                        request.label,
                        attempt,
                        request.retries,
                        describe_response(last)
                    );
                }
                ResponseLine::Other => {
                    tracing::warn!(
                        "{} timed out (attempt {}/{})",
                        request.label,
                        attempt,
                        request.retries
                    );
                }
            }
        }

        Ok(CommandResponse {
            success: false,
            response: last_response,
            attempts: request.retries,
        })
    }

    /// Write raw bytes with no framing, then wait
    pub fn send_raw(&mut self, data: &[u8], wait: Duration) -> Result<()> {
        self.port.write(data)?;
        if !wait.is_zero() {
            self.clock.sleep(wait);
        }
        Ok(())
    }

    /// Wait, then return everything received as text
    pub fn read_response(&mut self, wait: Duration) -> Result<String> {
        self.clock.sleep(wait);
        self.drain()
    }

    /// Query `?` and parse the status block
    ///
    /// An unparseable reply yields a [`Position`] with empty coordinates. A
    /// `WCO:` field replaces the tracked work offset; otherwise the tracked
    /// offset is attached to the result.
    pub fn query_position(&mut self) -> Result<Position> {
        self.port.clear_input()?;
        let wait = self.options.status_wait;
        self.send_raw(b"?", wait)?;
        let raw = self.read_response(wait)?;
        let mut position = parse_position(&raw);
        match position.work_offset {
            Some(offset) => self.work_offset = offset,
            None => position.work_offset = Some(self.work_offset),
        }
        tracing::debug!(
            "Position: x={:?} y={:?} z={:?} state={:?}",
            position.x,
            position.y,
            position.z,
            position.state
        );
        Ok(position)
    }

    fn write_line(&mut self, line: &str) -> Result<()> {
        tracing::debug!("> {}", line);
        self.port.write(format!("{}\n", line).as_bytes())?;
        Ok(())
    }

    /// Write a movement line without waiting for a reply
    pub fn write_move(&mut self, command: &MoveCommand) -> Result<()> {
        self.write_line(&command.to_line())
    }

    /// `G1` move by the given offsets; Y also moves Z
    pub fn move_relative(
        &mut self,
        x: Option<f64>,
        y: Option<f64>,
        z: Option<f64>,
        feed: Option<f64>,
    ) -> Result<()> {
        self.write_move(&MoveCommand::linear().maybe(x, y, z, feed))
    }

    /// `G1` move to the given coordinates; Y also moves Z
    pub fn move_absolute(
        &mut self,
        x: Option<f64>,
        y: Option<f64>,
        z: Option<f64>,
        feed: Option<f64>,
    ) -> Result<()> {
        self.write_move(&MoveCommand::linear().maybe(x, y, z, feed))
    }

    pub fn set_mode_relative(&mut self) -> Result<()> {
        self.write_line("G91")
    }

    pub fn set_mode_absolute(&mut self) -> Result<()> {
        self.write_line("G90")
    }

    /// `G92`: declare the current position to be the given coordinates
    ///
    /// Reads the machine position first so the new offset is known without
    /// waiting for the controller to report `WCO`. The carriage must be at
    /// rest.
    pub fn set_work_offset(&mut self, x: Option<f64>, y: Option<f64>, z: Option<f64>) -> Result<()> {
        let command = MoveCommand::work_offset().maybe(x, y, z, None);
        let here = self.query_position()?;
        self.write_move(&command)?;

        let machine = [here.x, here.y, here.z];
        for (i, declared) in command.coordinates().into_iter().enumerate() {
            let Some(declared) = declared else {
                continue;
            };
            match machine[i] {
                Some(current) => self.work_offset[i] = current - declared,
                None => tracing::warn!(
                    "Position unavailable, {} work offset not updated",
                    ["X", "Y", "Z"][i]
                ),
            }
        }
        tracing::debug!("Work offset now {:?}", self.work_offset);
        Ok(())
    }

    /// Write a setting, wait for it to apply, then cache it
    pub fn update_setting(&mut self, key: SettingKey, value: f64) -> Result<()> {
        let line = format!("${}={}", key.index(), format_setting_value(value));
        tracing::info!("Setting {} ({}) = {}", key, key.index(), value);
        self.write_line(&line)?;
        self.clock.sleep(self.options.setting_apply_delay);
        self.settings.set(key, value);
        Ok(())
    }

    /// [`Self::update_setting`] by name; unknown names never reach the wire
    pub fn update_setting_named(&mut self, name: &str, value: f64) -> Result<()> {
        let key: SettingKey = name.parse()?;
        self.update_setting(key, value)
    }

    /// `$X`
    pub fn unlock_alarm(&mut self) -> Result<()> {
        self.write_line("$X")
    }

    /// Ctrl-X, then wait for the controller to come back
    ///
    /// GRBL 1.1 forgets `G92` offsets on reset.
    pub fn soft_reset(&mut self) -> Result<()> {
        tracing::debug!("> <soft reset>");
        let wait = self.options.reset_delay;
        self.send_raw(&[SOFT_RESET], wait)?;
        self.work_offset = [0.0; 3];
        Ok(())
    }

    /// `!`
    pub fn feed_hold(&mut self) -> Result<()> {
        tracing::debug!("> !");
        self.send_raw(b"!", Duration::ZERO)
    }
}

/// `$n=` value text: integers without a fraction, otherwise three decimals
fn format_setting_value(value: f64) -> String {
    let text = format!("{:.3}", value);
    let text = text.trim_end_matches('0').trim_end_matches('.');
    if text == "-0" {
        "0".to_string()
    } else {
        text.to_string()
    }
}
