//! `settings.toml`: optional tuning for the bridge.
//!
//! Every field has a default, so a missing file, a missing section and a
//! missing key all mean "use the default".  Example:
//!
//! ```toml
//! [bridge]
//! log_level = "debug"
//!
//! [printing]
//! charset = "windows-1252"
//! documents_per_spool = 10
//! end_of_document = "^XZ"
//!
//! [serial.defaults]
//! baud = 19200
//!
//! [consent]
//! mode = "command"
//! command = "zenity --question --text"
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;
use webprint_core::{resolve_charset, LineSettings, SpoolPolicy};

use super::ConfigError;
use crate::domain::{BridgeConfig, ConsentMode};

/// Root of `settings.toml`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub bridge: BridgeSection,
    pub printing: PrintingSection,
    pub serial: SerialSection,
    pub consent: ConsentSection,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BridgeSection {
    /// `tracing` filter used when `RUST_LOG` is unset.
    pub log_level: String,
    pub max_body_bytes: usize,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PrintingSection {
    pub charset: String,
    pub documents_per_spool: usize,
    pub end_of_document: Option<String>,
    pub socket_timeout_ms: u64,
    pub default_socket_port: u16,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SerialSection {
    pub read_timeout_ms: u64,
    pub defaults: LineSettings,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsentKind {
    #[default]
    Terminal,
    Command,
    Deny,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ConsentSection {
    pub mode: ConsentKind,
    /// Program and arguments for `mode = "command"`.
    pub command: Option<String>,
}

impl Default for BridgeSection {
    fn default() -> Self {
        let defaults = BridgeConfig::default();
        Self {
            log_level: "info".to_string(),
            max_body_bytes: defaults.max_body_bytes,
        }
    }
}

impl Default for PrintingSection {
    fn default() -> Self {
        let defaults = BridgeConfig::default();
        Self {
            charset: defaults.charset,
            documents_per_spool: defaults.spool.documents_per_spool,
            end_of_document: defaults.spool.end_of_document,
            socket_timeout_ms: duration_ms(defaults.socket_timeout),
            default_socket_port: defaults.default_socket_port,
        }
    }
}

impl Default for SerialSection {
    fn default() -> Self {
        let defaults = BridgeConfig::default();
        Self {
            read_timeout_ms: duration_ms(defaults.serial_read_timeout),
            defaults: defaults.serial_defaults,
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl Settings {
    /// Combines these settings with the resolved bind address and data
    /// directory into the runtime configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for an unknown charset, a zero body
    /// limit, or `mode = "command"` without a command.
    pub fn into_config(self, bind_addr: SocketAddr, data_dir: PathBuf) -> Result<BridgeConfig, ConfigError> {
        if resolve_charset(&self.printing.charset).is_none() {
            return Err(ConfigError::Invalid(format!(
                "unknown charset {:?}",
                self.printing.charset
            )));
        }
        if self.bridge.max_body_bytes == 0 {
            return Err(ConfigError::Invalid("max_body_bytes must be positive".to_string()));
        }

        let consent = match self.consent.mode {
            ConsentKind::Terminal => ConsentMode::Terminal,
            ConsentKind::Deny => ConsentMode::Deny,
            ConsentKind::Command => match self.consent.command {
                Some(command) if !command.trim().is_empty() => ConsentMode::Command(command),
                _ => {
                    return Err(ConfigError::Invalid(
                        "consent mode \"command\" needs a command".to_string(),
                    ))
                }
            },
        };

        let spool = SpoolPolicy {
            documents_per_spool: self.printing.documents_per_spool,
            end_of_document: self.printing.end_of_document,
        };

        Ok(BridgeConfig {
            bind_addr,
            data_dir,
            max_body_bytes: self.bridge.max_body_bytes,
            charset: self.printing.charset,
            spool,
            socket_timeout: Duration::from_millis(self.printing.socket_timeout_ms),
            default_socket_port: self.printing.default_socket_port,
            serial_read_timeout: Duration::from_millis(self.serial.read_timeout_ms),
            serial_defaults: self.serial.defaults,
            consent,
        })
    }
}

/// Loads `Settings` from `path`, returning defaults if the file does not
/// exist yet.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not
/// found", and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_settings(path: &Path) -> Result<Settings, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let settings: Settings = toml::from_str(&content)?;
            debug!(path = %path.display(), "loaded settings");
            Ok(settings)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Settings::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
