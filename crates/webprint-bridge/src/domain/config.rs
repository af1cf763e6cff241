//! Bridge configuration types.
//!
//! [`BridgeConfig`] is the single source of truth for all runtime settings.
//! It is resolved once at startup from the CLI, the persisted bind address
//! and `settings.toml`, then shared read-only behind an `Arc`.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use webprint_core::{LineSettings, SpoolPolicy};

/// Default loopback address the request server binds to.
pub const DEFAULT_BIND_ADDR: SocketAddr = SocketAddr::new(
    std::net::IpAddr::V4(Ipv4Addr::LOCALHOST),
    8080,
);

/// Port used for raw socket printing when the client names only a host.
pub const DEFAULT_SOCKET_PORT: u16 = 9100;

/// How the bridge asks the user whether a site may use local devices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsentMode {
    /// Ask on the controlling terminal.
    Terminal,
    /// Run an external program with the origin as its last argument; exit
    /// status 0 means yes.
    Command(String),
    /// Never grant access to new sites.
    Deny,
}

/// All runtime configuration for the bridge.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Address of the loopback request server.
    pub bind_addr: SocketAddr,
    /// Directory holding the grant store, bind file and settings.
    pub data_dir: PathBuf,
    /// Largest request body accepted, in bytes.
    pub max_body_bytes: usize,
    /// Charset label applied to every new command buffer.
    pub charset: String,
    /// Default auto-spool policy; clients may override it per request.
    pub spool: SpoolPolicy,
    /// Connect and write timeout for raw socket printing.
    pub socket_timeout: Duration,
    pub default_socket_port: u16,
    /// How long a serial send waits for the device to answer.
    pub serial_read_timeout: Duration,
    /// Line settings used until a client supplies its own.
    pub serial_defaults: LineSettings,
    pub consent: ConsentMode,
}

impl Default for BridgeConfig {
    /// | Field               | Default            |
    /// |---------------------|--------------------|
    /// | bind_addr           | `127.0.0.1:8080`   |
    /// | max_body_bytes      | 16 MiB             |
    /// | charset             | `UTF-8`            |
    /// | spool               | disabled           |
    /// | socket_timeout      | 5 seconds          |
    /// | default_socket_port | 9100               |
    /// | serial_read_timeout | 1 second           |
    /// | serial_defaults     | 9600 8N1           |
    /// | consent             | terminal           |
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR,
            data_dir: PathBuf::from("."),
            max_body_bytes: 16 * 1024 * 1024,
            charset: "UTF-8".to_string(),
            spool: SpoolPolicy::disabled(),
            socket_timeout: Duration::from_secs(5),
            default_socket_port: DEFAULT_SOCKET_PORT,
            serial_read_timeout: Duration::from_secs(1),
            serial_defaults: LineSettings::default(),
            consent: ConsentMode::Terminal,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
