//! The grant store file (`webprint_acl.json`).
//!
//! A flat JSON object mapping each allowed origin to its token:
//!
//! ```json
//! { "https://shop.example": "6f1c…" }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::debug;

use crate::application::access_control::{AclError, GrantStore};

/// [`GrantStore`] backed by a JSON file.
///
/// Saves go through a sibling temporary file and a rename so a crash never
/// leaves a truncated store behind.
#[derive(Debug, Clone)]
pub struct JsonGrantStore {
    path: PathBuf,
}

impl JsonGrantStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist_error(&self, e: impl std::fmt::Display) -> AclError {
        AclError::Persist(format!("{}: {e}", self.path.display()))
    }
}

impl GrantStore for JsonGrantStore {
    fn load(&self) -> Result<BTreeMap<String, String>, AclError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(AclError::Load(format!("{}: {e}", self.path.display()))),
        };
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&content)
            .map_err(|e| AclError::Load(format!("{}: {e}", self.path.display())))
    }

    fn save(&self, grants: &BTreeMap<String, String>) -> Result<(), AclError> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| self.persist_error(e))?;
        }
        let content = serde_json::to_string_pretty(grants).map_err(|e| self.persist_error(e))?;

        // Per process, so an `acl` command never clobbers the bridge's staging file.
        let staging = self.path.with_extension(format!("json.{}.tmp", std::process::id()));
        std::fs::write(&staging, content).map_err(|e| self.persist_error(e))?;
        std::fs::rename(&staging, &self.path).map_err(|e| self.persist_error(e))?;

        debug!(grants = grants.len(), "grant store saved");
        Ok(())
    }

    fn modified(&self) -> Option<SystemTime> {
        std::fs::metadata(&self.path).and_then(|m| m.modified()).ok()
    }
}
