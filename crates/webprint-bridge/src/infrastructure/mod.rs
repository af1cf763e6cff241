//! Infrastructure layer for the bridge.
//!
//! Contains OS-facing adapters: the HTTP server, file storage, the print
//! spooler and socket printers, serial ports and consent prompts.
//!
//! **Dependency rule**: this layer may depend on `application`, `domain`
//! and `webprint_core`, but MUST NOT be imported by the `application` or
//! domain layers outside of tests.

pub mod consent;
pub mod http_server;
pub mod printing;
pub mod serial;
pub mod storage;

pub use http_server::{router, BridgeServer, ServerStatus};
