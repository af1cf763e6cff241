//! Application layer for the bridge.
//!
//! - `access_control` – origin grants and the consent protocol.
//! - `devices` – printer and socket seams plus printer name matching.
//! - `serial_session` – the single serial port state machine.
//! - `dispatcher` – turns one request body into one response.
//!
//! **Dependency rule**: this layer depends on `domain` and `webprint_core`
//! only; OS access goes through the traits declared here.

pub mod access_control;
pub mod devices;
pub mod dispatcher;
pub mod serial_session;

pub use access_control::{AccessControl, AclError, ConsentOutcome, ConsentPrompt, GrantStore};
pub use devices::{DeviceError, JobOptions, PrintSpooler, SocketSink};
pub use dispatcher::{Devices, DispatchError, Dispatcher, ErrorKind};
pub use serial_session::{SerialBackend, SerialLink, SerialSession, SessionState};
