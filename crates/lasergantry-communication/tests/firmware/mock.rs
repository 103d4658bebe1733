use lasergantry_communication::SerialPort;
use lasergantry_core::SharedClock;
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Responder = Box<dyn FnMut(&str) -> Vec<String> + Send>;

/// Port that answers every written line through a closure
pub struct MockPort {
    responder: Responder,
    clock: SharedClock,
    pending: Vec<u8>,
    incoming: VecDeque<String>,
    stream: Vec<String>,
    stream_pos: usize,
    read_error: Option<io::ErrorKind>,
    pub written: Arc<Mutex<Vec<String>>>,
    pub closed: Arc<AtomicBool>,
}

impl MockPort {
    pub fn new(clock: SharedClock, responder: impl FnMut(&str) -> Vec<String> + Send + 'static) -> Self {
        Self {
            responder: Box::new(responder),
            clock,
            pending: Vec::new(),
            incoming: VecDeque::new(),
            stream: Vec::new(),
            stream_pos: 0,
            read_error: None,
            written: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Port whose reads all fail with `kind`
    pub fn failing_reads(clock: SharedClock, kind: io::ErrorKind) -> Self {
        let mut port = Self::new(clock, |_| Vec::new());
        port.read_error = Some(kind);
        port
    }

    fn check_read(&self) -> io::Result<()> {
        match self.read_error {
            Some(kind) => Err(io::Error::new(kind, "mock read failure")),
            None => Ok(()),
        }
    }

    /// Port that emits `lines` in a loop, one every 5 ms
    pub fn streaming(clock: SharedClock, lines: Vec<String>) -> Self {
        let mut port = Self::new(clock, |_| Vec::new());
        port.stream = lines;
        port
    }
}

impl SerialPort for MockPort {
    fn name(&self) -> String {
        "mock".to_string()
    }

    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        for &byte in data {
            match byte {
                b'\n' => {
                    let line = String::from_utf8_lossy(&self.pending).trim().to_string();
                    self.pending.clear();
                    if line.is_empty() {
                        continue;
                    }
                    self.written.lock().unwrap().push(line.clone());
                    let replies = (self.responder)(&line);
                    self.incoming.extend(replies);
                }
                b'?' | b'!' | 0x18 => {
                    let raw = String::from_utf8_lossy(&[byte]).to_string();
                    self.written.lock().unwrap().push(raw.clone());
                    let replies = (self.responder)(&raw);
                    self.incoming.extend(replies);
                }
                _ => self.pending.push(byte),
            }
        }
        Ok(())
    }

    fn read_line(&mut self) -> io::Result<Option<String>> {
        self.check_read()?;
        if !self.stream.is_empty() {
            self.clock.sleep(Duration::from_millis(5));
            let line = self.stream[self.stream_pos % self.stream.len()].clone();
            self.stream_pos += 1;
            return Ok(Some(line));
        }
        match self.incoming.pop_front() {
            Some(line) => Ok(Some(line)),
            None => {
                self.clock.sleep(Duration::from_millis(10));
                Ok(None)
            }
        }
    }

    fn read_available(&mut self) -> io::Result<Vec<u8>> {
        self.check_read()?;
        let mut data = Vec::new();
        while let Some(line) = self.incoming.pop_front() {
            data.extend_from_slice(line.as_bytes());
            data.extend_from_slice(b"\r\n");
        }
        Ok(data)
    }

    fn clear_input(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
