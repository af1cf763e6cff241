//! Mock serial backend for unit testing.
//!
//! Simulates a fixed set of ports.  Each port records what was written to it
//! and which settings were applied, and answers every write with a canned
//! reply.  Tests can switch on write failures or settings rejection, and
//! slow reads down to widen the window in which two requests could overlap.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use webprint_core::{LineSettings, ResponseFrame};

use crate::application::devices::DeviceError;
use crate::application::serial_session::{SerialBackend, SerialLink};

#[derive(Default)]
struct PortRecord {
    open: bool,
    open_count: usize,
    opened_with: Option<LineSettings>,
    applied: Vec<LineSettings>,
    written: Vec<u8>,
    reply: Vec<u8>,
    frames: Vec<ResponseFrame>,
}

#[derive(Default)]
struct MockState {
    ports: HashMap<String, PortRecord>,
    fail_writes: bool,
    reject_settings: bool,
    read_delay: Duration,
    open_now: usize,
    peak_open: usize,
}

/// A mock implementation of [`SerialBackend`].
#[derive(Clone, Default)]
pub struct MockSerialBackend {
    state: Arc<Mutex<MockState>>,
}

impl MockSerialBackend {
    /// Creates a backend exposing `ports`.
    pub fn with_ports(ports: &[&str]) -> Self {
        let backend = Self::default();
        {
            let mut state = backend.lock();
            for port in ports {
                state.ports.insert((*port).to_string(), PortRecord::default());
            }
        }
        backend
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sets the bytes `port` answers with after each write.
    pub fn set_reply(&self, port: &str, reply: &[u8]) {
        if let Some(record) = self.lock().ports.get_mut(port) {
            record.reply = reply.to_vec();
        }
    }

    pub fn fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    pub fn reject_settings(&self, reject: bool) {
        self.lock().reject_settings = reject;
    }

    /// Makes every read wait `delay` before answering.
    pub fn set_read_delay(&self, delay: Duration) {
        self.lock().read_delay = delay;
    }

    /// Most ports that were ever open at the same time.
    pub fn peak_open(&self) -> usize {
        self.lock().peak_open
    }

    pub fn is_open(&self, port: &str) -> bool {
        self.lock().ports.get(port).is_some_and(|r| r.open)
    }

    pub fn open_count(&self, port: &str) -> usize {
        self.lock().ports.get(port).map_or(0, |r| r.open_count)
    }

    /// Settings passed when `port` was last opened.
    pub fn opened_with(&self, port: &str) -> Option<LineSettings> {
        self.lock().ports.get(port).and_then(|r| r.opened_with)
    }

    /// Settings applied to `port` after opening, in order.
    pub fn applied(&self, port: &str) -> Vec<LineSettings> {
        self.lock().ports.get(port).map(|r| r.applied.clone()).unwrap_or_default()
    }

    /// Response frames passed to each read on `port`, in order.
    pub fn read_frames(&self, port: &str) -> Vec<ResponseFrame> {
        self.lock().ports.get(port).map(|r| r.frames.clone()).unwrap_or_default()
    }

    /// Every byte written to `port`.
    pub fn written(&self, port: &str) -> Vec<u8> {
        self.lock().ports.get(port).map(|r| r.written.clone()).unwrap_or_default()
    }
}

impl SerialBackend for MockSerialBackend {
    fn list_ports(&self) -> Result<Vec<String>, DeviceError> {
        let mut ports: Vec<String> = self.lock().ports.keys().cloned().collect();
        ports.sort();
        Ok(ports)
    }

    fn open(&self, port: &str, settings: &LineSettings) -> Result<Box<dyn SerialLink>, DeviceError> {
        let mut state = self.lock();
        let record = state
            .ports
            .get_mut(port)
            .ok_or_else(|| DeviceError::Serial(format!("{port}: no such port")))?;
        if record.open {
            return Err(DeviceError::Serial(format!("{port}: port busy")));
        }
        record.open = true;
        record.open_count += 1;
        record.opened_with = Some(*settings);
        state.open_now += 1;
        state.peak_open = state.peak_open.max(state.open_now);
        Ok(Box::new(MockLink {
            port: port.to_string(),
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockLink {
    port: String,
    state: Arc<Mutex<MockState>>,
}

impl MockLink {
    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SerialLink for MockLink {
    fn apply(&mut self, settings: &LineSettings) -> Result<(), DeviceError> {
        let mut state = self.lock();
        if state.reject_settings {
            return Err(DeviceError::Serial(format!("{}: settings rejected", self.port)));
        }
        if let Some(record) = state.ports.get_mut(&self.port) {
            record.applied.push(*settings);
        }
        Ok(())
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), DeviceError> {
        let mut state = self.lock();
        if state.fail_writes {
            return Err(DeviceError::Serial(format!("{}: write failed", self.port)));
        }
        if let Some(record) = state.ports.get_mut(&self.port) {
            record.written.extend_from_slice(bytes);
        }
        Ok(())
    }

    fn read_available(&mut self, _timeout: Duration, frame: &ResponseFrame) -> Result<Vec<u8>, DeviceError> {
        let delay = self.lock().read_delay;
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        let mut state = self.lock();
        let Some(record) = state.ports.get_mut(&self.port) else {
            return Ok(Vec::new());
        };
        record.frames.push(frame.clone());
        Ok(record.reply.clone())
    }
}

impl Drop for MockLink {
    fn drop(&mut self) {
        let port = self.port.clone();
        let mut state = self.lock();
        if let Some(record) = state.ports.get_mut(&port) {
            record.open = false;
        }
        state.open_now = state.open_now.saturating_sub(1);
    }
}
