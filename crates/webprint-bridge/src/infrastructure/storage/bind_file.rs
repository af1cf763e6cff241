//! The persisted bind address (`webprint.config`).
//!
//! The file holds a single `address:port` line, e.g. `127.0.0.1:8080`.
//! `localhost` is accepted as an alias for `127.0.0.1`.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;

use tracing::{debug, info};

use super::ConfigError;
use crate::domain::DEFAULT_BIND_ADDR;

/// Parses `address:port`.
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] if either part is malformed.
pub fn parse_bind_addr(text: &str) -> Result<SocketAddr, ConfigError> {
    let text = text.trim();
    let invalid = || ConfigError::Invalid(format!("bind address {text:?} is not address:port"));

    let (host, port) = text.rsplit_once(':').ok_or_else(invalid)?;
    let port: u16 = port.trim().parse().map_err(|_| invalid())?;
    let host = host.trim().trim_start_matches('[').trim_end_matches(']');
    let ip = if host.eq_ignore_ascii_case("localhost") {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    } else {
        host.parse().map_err(|_| invalid())?
    };
    Ok(SocketAddr::new(ip, port))
}

/// Loads the bind address from `path`, falling back to `127.0.0.1:8080`
/// when the file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not
/// found" and [`ConfigError::Invalid`] if the content is malformed.
pub fn load_bind_addr(path: &Path) -> Result<SocketAddr, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let addr = parse_bind_addr(&content)?;
            debug!(%addr, "loaded bind address");
            Ok(addr)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(DEFAULT_BIND_ADDR),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Writes `addr` to `path`, creating the parent directory if needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures.
pub fn save_bind_addr(path: &Path, addr: SocketAddr) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    std::fs::write(path, format!("{addr}\n")).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    info!(%addr, "saved bind address");
    Ok(())
}
