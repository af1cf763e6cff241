//! Domain layer: pure configuration types for the bridge.

pub mod config;

pub use config::{BridgeConfig, ConsentMode, DEFAULT_BIND_ADDR, DEFAULT_SOCKET_PORT};
