//! Recording print sinks for unit testing.
//!
//! [`RecordingSpooler`] and [`RecordingSocketSink`] keep every job they
//! receive so tests can assert on exactly what would have been printed.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::application::devices::{DeviceError, JobOptions, PrintSpooler, SocketSink};

/// One job captured by a recording sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedJob {
    /// Printer name or socket address.
    pub target: String,
    pub data: Vec<u8>,
    /// Spooler settings; `None` for socket jobs.
    pub options: Option<JobOptions>,
}

#[derive(Default)]
struct SpoolerState {
    printers: Vec<String>,
    raw: Vec<RecordedJob>,
    html: Vec<RecordedJob>,
    fail: bool,
}

/// A mock implementation of [`PrintSpooler`].
#[derive(Clone, Default)]
pub struct RecordingSpooler {
    state: Arc<Mutex<SpoolerState>>,
}

impl RecordingSpooler {
    pub fn with_printers(printers: &[&str]) -> Self {
        let spooler = Self::default();
        spooler.lock().printers = printers.iter().map(|p| (*p).to_string()).collect();
        spooler
    }

    fn lock(&self) -> MutexGuard<'_, SpoolerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes every later job fail with a spooler error.
    pub fn fail_jobs(&self, fail: bool) {
        self.lock().fail = fail;
    }

    pub fn raw_jobs(&self) -> Vec<RecordedJob> {
        self.lock().raw.clone()
    }

    pub fn html_jobs(&self) -> Vec<RecordedJob> {
        self.lock().html.clone()
    }
}

impl PrintSpooler for RecordingSpooler {
    fn list_printers(&self) -> Result<Vec<String>, DeviceError> {
        Ok(self.lock().printers.clone())
    }

    fn print_raw(&self, printer: &str, job: &JobOptions, data: &[u8]) -> Result<(), DeviceError> {
        let mut state = self.lock();
        if state.fail {
            return Err(DeviceError::Spooler("printer on fire".to_string()));
        }
        state.raw.push(RecordedJob {
            target: printer.to_string(),
            data: data.to_vec(),
            options: Some(job.clone()),
        });
        Ok(())
    }

    fn print_html(&self, printer: &str, job: &JobOptions, html: &str) -> Result<(), DeviceError> {
        let mut state = self.lock();
        if state.fail {
            return Err(DeviceError::Spooler("printer on fire".to_string()));
        }
        state.html.push(RecordedJob {
            target: printer.to_string(),
            data: html.as_bytes().to_vec(),
            options: Some(job.clone()),
        });
        Ok(())
    }
}

/// A mock implementation of [`SocketSink`].
#[derive(Clone, Default)]
pub struct RecordingSocketSink {
    jobs: Arc<Mutex<Vec<RecordedJob>>>,
}

impl RecordingSocketSink {
    pub fn jobs(&self) -> Vec<RecordedJob> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl SocketSink for RecordingSocketSink {
    async fn send(&self, addr: &str, data: &[u8]) -> Result<(), DeviceError> {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedJob {
                target: addr.to_string(),
                data: data.to_vec(),
                options: None,
            });
        Ok(())
    }
}
