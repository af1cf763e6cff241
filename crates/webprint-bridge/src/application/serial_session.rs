//! The serial session state machine.
//!
//! ```text
//!            open(port)                    close()
//!  Closed ───────────────▶ Open{port} ───────────────▶ Closed
//!                             │  ▲
//!                             └──┘ open(other): closes port first
//! ```
//!
//! At most one port is open per bridge.  Any I/O failure drops the port
//! handle, so the session is Closed afterwards and the next request starts
//! from a clean state.
//!
//! The session is a plain struct with `&mut self` methods.  The bridge shares
//! one instance behind a mutex and drives it from the blocking pool.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};
use webprint_core::{LineSettings, ResponseFrame};

use super::devices::DeviceError;

/// An open serial port.
pub trait SerialLink: Send {
    /// Reconfigures the line.
    fn apply(&mut self, settings: &LineSettings) -> Result<(), DeviceError>;

    /// Writes all bytes and flushes.
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), DeviceError>;

    /// Reads whatever the device sends back within `timeout`.  Returns an
    /// empty vector if the device stays silent.
    ///
    /// Reading stops early once `frame` is complete; with no end marker it
    /// stops at the first quiet gap after data arrived.
    fn read_available(&mut self, timeout: Duration, frame: &ResponseFrame) -> Result<Vec<u8>, DeviceError>;
}

/// Port enumeration and opening.
pub trait SerialBackend: Send + Sync {
    fn list_ports(&self) -> Result<Vec<String>, DeviceError>;

    fn open(&self, port: &str, settings: &LineSettings) -> Result<Box<dyn SerialLink>, DeviceError>;

    /// Determines the line settings of the device on `port`.
    ///
    /// Backends that cannot query a device report
    /// [`DeviceError::Unsupported`].
    fn detect_settings(&self, _port: &str) -> Result<LineSettings, DeviceError> {
        Err(DeviceError::Unsupported("serial settings auto-detection"))
    }
}

/// Observable state of a [`SerialSession`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Open { port: String, settings: LineSettings },
}

struct OpenPort {
    name: String,
    settings: LineSettings,
    link: Box<dyn SerialLink>,
}

/// The single serial session of a bridge.
pub struct SerialSession {
    backend: Arc<dyn SerialBackend>,
    port: Option<OpenPort>,
    /// Settings replayed by the next `open` that does not supply its own.
    preset: LineSettings,
    input: Vec<u8>,
    output: Vec<u8>,
    read_timeout: Duration,
    frame: ResponseFrame,
}

impl SerialSession {
    pub fn new(backend: Arc<dyn SerialBackend>, preset: LineSettings, read_timeout: Duration) -> Self {
        Self {
            backend,
            port: None,
            preset,
            input: Vec::new(),
            output: Vec::new(),
            read_timeout,
            frame: ResponseFrame::default(),
        }
    }

    pub fn state(&self) -> SessionState {
        match &self.port {
            None => SessionState::Closed,
            Some(open) => SessionState::Open {
                port: open.name.clone(),
                settings: open.settings,
            },
        }
    }

    /// Name of the open port, if any.
    pub fn open_port(&self) -> Option<&str> {
        self.port.as_ref().map(|open| open.name.as_str())
    }

    pub fn list_ports(&self) -> Result<Vec<String>, DeviceError> {
        self.backend.list_ports()
    }

    /// Settings the next implicit open will use.
    pub fn preset(&self) -> LineSettings {
        self.preset
    }

    /// Pre-configures settings for the next `open`.
    pub fn set_preset(&mut self, settings: LineSettings) {
        self.preset = settings;
    }

    /// Opens `port`, closing any other open port first.
    ///
    /// `settings` become the new preset; `None` replays the current preset.
    /// Re-opening the port that is already open only reapplies settings.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError`] if the port cannot be opened or configured.
    /// The session is Closed afterwards.
    pub fn open(&mut self, port: &str, settings: Option<LineSettings>) -> Result<(), DeviceError> {
        let settings = settings.unwrap_or(self.preset);
        self.preset = settings;

        if self.open_port() == Some(port) {
            return self.set_properties(settings);
        }

        self.close();
        match self.backend.open(port, &settings) {
            Ok(link) => {
                info!(port, %settings, "serial port opened");
                self.port = Some(OpenPort {
                    name: port.to_string(),
                    settings,
                    link,
                });
                Ok(())
            }
            Err(e) => {
                error!(port, error = %e, "could not open serial port");
                Err(e)
            }
        }
    }

    /// Applies new line settings to the open port.
    ///
    /// # Errors
    ///
    /// [`DeviceError::PortNotOpen`] when Closed.  If the device rejects the
    /// settings the port is closed and the error returned.
    pub fn set_properties(&mut self, settings: LineSettings) -> Result<(), DeviceError> {
        let open = self.port.as_mut().ok_or(DeviceError::PortNotOpen)?;
        match open.link.apply(&settings) {
            Ok(()) => {
                open.settings = settings;
                self.preset = settings;
                debug!(port = %open.name, %settings, "serial settings applied");
                Ok(())
            }
            Err(e) => self.fail(e),
        }
    }

    /// Detects the line settings of the open port and applies them.
    ///
    /// # Errors
    ///
    /// [`DeviceError::PortNotOpen`] when Closed; otherwise any backend error,
    /// after which the session is Closed.
    pub fn auto_detect(&mut self) -> Result<LineSettings, DeviceError> {
        let port = self.open_port().ok_or(DeviceError::PortNotOpen)?.to_string();
        match self.backend.detect_settings(&port) {
            Ok(settings) => {
                self.set_properties(settings)?;
                Ok(settings)
            }
            Err(e) => self.fail(e),
        }
    }

    /// Appends bytes to the pending input buffer.
    pub fn append(&mut self, bytes: &[u8]) {
        self.input.extend_from_slice(bytes);
    }

    /// Markers delimiting the useful part of the device's answer.  An empty
    /// frame keeps the whole answer.
    pub fn set_response_frame(&mut self, frame: ResponseFrame) {
        self.frame = frame;
    }

    /// Bytes waiting to be sent.
    pub fn input_buffer(&self) -> &[u8] {
        &self.input
    }

    /// Transmits the pending input and collects the device's answer, cut to
    /// the response frame, into the output buffer.  Returns the number of
    /// bytes sent.
    ///
    /// # Errors
    ///
    /// [`DeviceError::PortNotOpen`] when Closed.  A write or read failure
    /// closes the port; the pending input is discarded either way.
    pub fn send(&mut self) -> Result<usize, DeviceError> {
        let input = std::mem::take(&mut self.input);
        let open = self.port.as_mut().ok_or(DeviceError::PortNotOpen)?;

        if let Err(e) = open.link.write_all(&input) {
            return self.fail(e);
        }
        match open.link.read_available(self.read_timeout, &self.frame) {
            Ok(answer) => {
                debug!(port = %open.name, sent = input.len(), received = answer.len(), "serial exchange");
                self.output.extend_from_slice(self.frame.extract(&answer));
                Ok(input.len())
            }
            Err(e) => self.fail(e),
        }
    }

    /// Bytes received from the device since the last `clear_output`.
    pub fn output(&self) -> &[u8] {
        &self.output
    }

    pub fn clear_output(&mut self) {
        self.output.clear();
    }

    /// Closes the open port.  Closing a Closed session does nothing.
    pub fn close(&mut self) {
        if let Some(open) = self.port.take() {
            info!(port = %open.name, "serial port closed");
        }
    }

    fn fail<T>(&mut self, e: DeviceError) -> Result<T, DeviceError> {
        if let Some(open) = self.port.take() {
            error!(port = %open.name, error = %e, "serial I/O failed, port closed");
        }
        Err(e)
    }
}

impl Drop for SerialSession {
    fn drop(&mut self) {
        self.close();
    }
}
