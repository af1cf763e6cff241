//! Device collaborator seams.
//!
//! The dispatcher never talks to the OS spooler or the network directly; it
//! goes through these traits so tests can substitute recording mocks.  All
//! [`PrintSpooler`] methods block and are called from the blocking pool.

use async_trait::async_trait;
use thiserror::Error;

/// Errors raised by printers, serial ports and socket sinks.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// No printer matched the requested name.
    #[error("no printer matching '{0}'")]
    PrinterNotFound(String),

    /// The OS spooler rejected or failed a job.
    #[error("spooler error: {0}")]
    Spooler(String),

    /// A serial port could not be opened, configured, written or read.
    #[error("{0}")]
    Serial(String),

    /// A serial operation needs an open port.
    #[error("no serial port is open")]
    PortNotOpen,

    /// A raw socket printer could not be reached or written.
    #[error("{0}")]
    Socket(String),

    /// Connecting or writing took longer than the configured timeout.
    #[error("timed out: {0}")]
    Timeout(String),

    /// The backend does not implement the operation on this platform.
    #[error("{0} is not supported on this platform")]
    Unsupported(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Job title shown in the OS print queue when the client names none.
pub const DEFAULT_JOB_NAME: &str = "WebPrint";

/// Per-job spooler settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOptions {
    /// Title shown in the print queue.
    pub name: String,
    /// Number of copies, never below one.
    pub copies: u32,
}

impl JobOptions {
    pub fn new(name: Option<&str>, copies: u32) -> Self {
        Self {
            name: name.unwrap_or(DEFAULT_JOB_NAME).to_string(),
            copies: copies.max(1),
        }
    }
}

impl Default for JobOptions {
    fn default() -> Self {
        Self::new(None, 1)
    }
}

/// Printer enumeration and job submission through the OS spooler.
pub trait PrintSpooler: Send + Sync {
    /// Names of the printers currently known to the OS.
    fn list_printers(&self) -> Result<Vec<String>, DeviceError>;

    /// Submits `data` unmodified as one raw job.
    fn print_raw(&self, printer: &str, job: &JobOptions, data: &[u8]) -> Result<(), DeviceError>;

    /// Submits an HTML document for rendering and printing.
    fn print_html(&self, printer: &str, job: &JobOptions, html: &str) -> Result<(), DeviceError>;
}

/// Sends raw bytes to a network printer (`host:port`, usually port 9100).
#[async_trait]
pub trait SocketSink: Send + Sync {
    async fn send(&self, addr: &str, data: &[u8]) -> Result<(), DeviceError>;
}

/// Picks the printer a client meant from the OS printer list.
///
/// An exact case-insensitive match wins; otherwise the first printer whose
/// name contains `requested` (case-insensitively) is used.
pub fn resolve_printer(printers: &[String], requested: &str) -> Option<String> {
    let wanted = requested.trim().to_lowercase();
    if wanted.is_empty() {
        return None;
    }
    printers
        .iter()
        .find(|name| name.to_lowercase() == wanted)
        .or_else(|| printers.iter().find(|name| name.to_lowercase().contains(&wanted)))
        .cloned()
}
