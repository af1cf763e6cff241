//! Storage infrastructure: everything the bridge keeps on disk.
//!
//! All files live in one data directory, by default the platform config
//! directory:
//! - Windows:  `%APPDATA%\WebPrint`
//! - Linux:    `$XDG_CONFIG_HOME/webprint` or `~/.config/webprint`
//! - macOS:    `~/Library/Application Support/WebPrint`
//!
//! | File               | Module      | Contents                         |
//! |--------------------|-------------|----------------------------------|
//! | `webprint.config`  | `bind_file` | `address:port` of the server     |
//! | `settings.toml`    | `settings`  | tuning knobs, every one optional |
//! | `webprint_acl.json`| `acl_file`  | granted origins and their tokens |

use std::path::{Path, PathBuf};

use thiserror::Error;

pub mod acl_file;
pub mod bind_file;
pub mod settings;

pub use acl_file::JsonGrantStore;
pub use bind_file::{load_bind_addr, parse_bind_addr, save_bind_addr};
pub use settings::{load_settings, Settings};

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse settings TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value parsed but makes no sense.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// The directory holding the bridge's files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Uses `explicit` when given, otherwise the platform config directory.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NoPlatformConfigDir`] when no directory was
    /// given and the platform directory cannot be determined.
    pub fn resolve(explicit: Option<PathBuf>) -> Result<Self, ConfigError> {
        match explicit {
            Some(root) => Ok(Self::new(root)),
            None => platform_config_dir()
                .map(Self::new)
                .ok_or(ConfigError::NoPlatformConfigDir),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn bind_file(&self) -> PathBuf {
        self.root.join("webprint.config")
    }

    pub fn settings_file(&self) -> PathBuf {
        self.root.join("settings.toml")
    }

    pub fn acl_file(&self) -> PathBuf {
        self.root.join("webprint_acl.json")
    }

    /// Creates the directory if it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the directory cannot be created.
    pub fn ensure(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.root).map_err(|source| ConfigError::Io {
            path: self.root.clone(),
            source,
        })
    }
}

/// Resolves the platform config directory including the `WebPrint` part.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("WebPrint"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("webprint"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME")
            .map(|h| PathBuf::from(h).join("Library").join("Application Support").join("WebPrint"))
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
