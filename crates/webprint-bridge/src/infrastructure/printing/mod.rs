//! Printing infrastructure.
//!
//! - `cups` – the OS spooler on Linux and macOS.
//! - `win32` – the Windows print spooler.
//! - `network` – raw TCP printing to `host:port`.
//! - `mock` – recording sinks for tests.
//!
//! On other platforms the bridge still serves serial ports and socket
//! printers; spooler operations report an unsupported error.

use std::sync::Arc;

use crate::application::devices::{DeviceError, JobOptions, PrintSpooler};

pub mod cups;
pub mod mock;
pub mod network;
pub mod win32;

pub use cups::CupsSpooler;
pub use network::NetworkPrinter;
#[cfg(windows)]
pub use win32::WinSpooler;

/// Spooler for platforms with no supported print system.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedSpooler;

impl PrintSpooler for UnsupportedSpooler {
    fn list_printers(&self) -> Result<Vec<String>, DeviceError> {
        Err(DeviceError::Unsupported("printer enumeration"))
    }

    fn print_raw(&self, _printer: &str, _job: &JobOptions, _data: &[u8]) -> Result<(), DeviceError> {
        Err(DeviceError::Unsupported("raw printing"))
    }

    fn print_html(&self, _printer: &str, _job: &JobOptions, _html: &str) -> Result<(), DeviceError> {
        Err(DeviceError::Unsupported("HTML printing"))
    }
}

/// The spooler for the current platform.
#[cfg(unix)]
pub fn system_spooler() -> Arc<dyn PrintSpooler> {
    Arc::new(CupsSpooler::default())
}

/// The spooler for the current platform.
#[cfg(windows)]
pub fn system_spooler() -> Arc<dyn PrintSpooler> {
    Arc::new(WinSpooler)
}

/// The spooler for the current platform.
#[cfg(not(any(unix, windows)))]
pub fn system_spooler() -> Arc<dyn PrintSpooler> {
    Arc::new(UnsupportedSpooler)
}
