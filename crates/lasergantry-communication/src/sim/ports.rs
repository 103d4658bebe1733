//! Serial ports onto the simulated gantry

use parking_lot::Mutex;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use lasergantry_core::SharedClock;

use super::model::SimState;
use crate::communication::SerialPort;

/// GRBL side of the model
pub struct SimGrblPort {
    state: Arc<Mutex<SimState>>,
    clock: SharedClock,
    timeout: Duration,
    closed: bool,
}

impl SimGrblPort {
    pub(crate) fn new(state: Arc<Mutex<SimState>>, clock: SharedClock, timeout: Duration) -> Self {
        Self {
            state,
            clock,
            timeout,
            closed: false,
        }
    }

    fn synced(&self) -> io::Result<parking_lot::MutexGuard<'_, SimState>> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "port closed"));
        }
        let mut state = self.state.lock();
        state.sync(self.clock.now());
        Ok(state)
    }
}

impl SerialPort for SimGrblPort {
    fn name(&self) -> String {
        "sim://grbl".to_string()
    }

    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.synced()?.receive(data);
        Ok(())
    }

    fn read_line(&mut self) -> io::Result<Option<String>> {
        if let Some(line) = self.synced()?.take_line() {
            return Ok(Some(line));
        }
        self.clock.sleep(self.timeout);
        Ok(self.synced()?.take_line())
    }

    fn read_available(&mut self) -> io::Result<Vec<u8>> {
        Ok(self.synced()?.take_output())
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.synced()?.clear_output();
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        self.closed = true;
        Ok(())
    }
}

/// Limit-controller side of the model
///
/// Emits one frame per read, `frame_interval` apart in simulated time.
pub struct SimLimitPort {
    state: Arc<Mutex<SimState>>,
    clock: SharedClock,
    frame_interval: Duration,
    closed: bool,
}

impl SimLimitPort {
    pub(crate) fn new(state: Arc<Mutex<SimState>>, clock: SharedClock, frame_interval: Duration) -> Self {
        Self {
            state,
            clock,
            frame_interval,
            closed: false,
        }
    }

    fn ensure_open(&self) -> io::Result<()> {
        if self.closed {
            Err(io::Error::new(io::ErrorKind::NotConnected, "port closed"))
        } else {
            Ok(())
        }
    }
}

impl SerialPort for SimLimitPort {
    fn name(&self) -> String {
        "sim://limits".to_string()
    }

    fn write(&mut self, _data: &[u8]) -> io::Result<()> {
        self.ensure_open()
    }

    fn read_line(&mut self) -> io::Result<Option<String>> {
        self.ensure_open()?;
        self.clock.sleep(self.frame_interval);
        let mut state = self.state.lock();
        state.sync(self.clock.now());
        Ok(Some(state.limit_line()))
    }

    fn read_available(&mut self) -> io::Result<Vec<u8>> {
        self.ensure_open()?;
        Ok(Vec::new())
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.ensure_open()
    }

    fn close(&mut self) -> io::Result<()> {
        self.closed = true;
        Ok(())
    }
}
