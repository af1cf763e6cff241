//! Origin access control.
//!
//! A web origin may use local devices only after the user has explicitly
//! agreed.  Agreement is recorded as a grant: the origin mapped to a random
//! token.  The page receives the token once (in the `init` response) and
//! must present it with every later request.
//!
//! # Persistence
//!
//! The [`GrantStore`] is the source of truth; the gate keeps a cached copy
//! guarded by a mutex.  Every change reloads the store, applies the change
//! and flushes it while the lock is still held, so grants written by another
//! process (`acl revoke`) are never overwritten.  A failed flush restores the
//! previous map and reports an error.  Lookups reload the cache whenever the
//! store reports a newer modification time.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Errors raised while loading or persisting grants.
#[derive(Debug, Error)]
pub enum AclError {
    #[error("could not read grant store: {0}")]
    Load(String),

    #[error("could not persist grant store: {0}")]
    Persist(String),
}

/// Durable storage for the origin → token map.
pub trait GrantStore: Send + Sync {
    /// Reads every stored grant.  A store that does not exist yet is empty.
    fn load(&self) -> Result<BTreeMap<String, String>, AclError>;

    /// Replaces the stored grants with `grants`.
    fn save(&self, grants: &BTreeMap<String, String>) -> Result<(), AclError>;

    /// When the stored grants last changed, if the store can tell.
    fn modified(&self) -> Option<SystemTime> {
        None
    }
}

/// Asks the user whether `origin` may use local printers and serial ports.
///
/// Implementations may block for as long as the user takes to answer.
#[cfg_attr(test, mockall::automock)]
pub trait ConsentPrompt: Send + Sync {
    fn ask(&self, origin: &str) -> bool;
}

/// Outcome of the consent protocol run for `init`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsentOutcome {
    /// The presented token is already valid.
    AlreadyAllowed,
    /// The user agreed; the new token must be returned to the page.
    Granted(String),
    /// The user refused.
    Denied,
}

struct CachedGrants {
    map: BTreeMap<String, String>,
    /// Store modification time the map was read at.
    seen: Option<SystemTime>,
}

/// The persisted origin → token gate.
pub struct AccessControl {
    grants: Mutex<CachedGrants>,
    store: Arc<dyn GrantStore>,
    prompt: Arc<dyn ConsentPrompt>,
}

impl AccessControl {
    /// Loads existing grants from `store`.
    ///
    /// # Errors
    ///
    /// Returns [`AclError::Load`] if the store exists but cannot be read.
    pub fn open(store: Arc<dyn GrantStore>, prompt: Arc<dyn ConsentPrompt>) -> Result<Self, AclError> {
        let seen = store.modified();
        let map = store.load()?;
        info!(grants = map.len(), "loaded site grants");
        Ok(Self {
            grants: Mutex::new(CachedGrants { map, seen }),
            store,
            prompt,
        })
    }

    fn lock(&self) -> MutexGuard<'_, CachedGrants> {
        self.grants.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Locks the cache, reloading it first if the store changed underneath.
    /// A store that cannot be read keeps the cached grants.
    fn fresh(&self) -> MutexGuard<'_, CachedGrants> {
        let mut grants = self.lock();
        if let Some(modified) = self.store.modified() {
            if grants.seen != Some(modified) {
                match self.store.load() {
                    Ok(map) => {
                        debug!(grants = map.len(), "grant store changed, reloaded");
                        grants.map = map;
                        grants.seen = Some(modified);
                    }
                    Err(e) => warn!(error = %e, "keeping cached grants"),
                }
            }
        }
        grants
    }

    fn reload(&self, grants: &mut CachedGrants) -> Result<(), AclError> {
        let seen = self.store.modified();
        grants.map = self.store.load()?;
        grants.seen = seen;
        Ok(())
    }

    /// Applies `change` to the freshly loaded grants and flushes them.
    fn update<T>(
        &self,
        change: impl FnOnce(&mut BTreeMap<String, String>) -> Option<T>,
    ) -> Result<Option<T>, AclError> {
        let mut grants = self.lock();
        self.reload(&mut grants)?;

        let before = grants.map.clone();
        let Some(outcome) = change(&mut grants.map) else {
            return Ok(None);
        };

        if let Err(e) = self.store.save(&grants.map) {
            grants.map = before;
            return Err(e);
        }
        grants.seen = self.store.modified();
        Ok(Some(outcome))
    }

    /// Returns `true` iff `origin` holds a grant whose token equals `token`.
    pub fn is_allowed(&self, origin: &str, token: &str) -> bool {
        !token.is_empty() && self.fresh().map.get(origin).is_some_and(|t| t == token)
    }

    /// Issues a fresh token for `origin`, replacing any previous grant.
    ///
    /// # Errors
    ///
    /// Returns [`AclError::Load`] if the store cannot be re-read, or
    /// [`AclError::Persist`] if it rejects the change; the previous grant
    /// (if any) stays in effect.
    pub fn grant(&self, origin: &str) -> Result<String, AclError> {
        let token = Uuid::new_v4().to_string();
        self.update(|map| {
            map.insert(origin.to_string(), token.clone());
            Some(())
        })?;

        info!(origin, "granted device access");
        Ok(token)
    }

    /// Removes the grant for `origin`.  Returns `false` if there was none.
    ///
    /// # Errors
    ///
    /// Returns [`AclError::Load`] if the store cannot be re-read, or
    /// [`AclError::Persist`] if it rejects the change; the grant then stays
    /// in effect.
    pub fn revoke(&self, origin: &str) -> Result<bool, AclError> {
        let removed = self.update(|map| map.remove(origin))?.is_some();
        if removed {
            info!(origin, "revoked device access");
        }
        Ok(removed)
    }

    /// Origins that currently hold a grant, sorted.
    pub fn list(&self) -> Vec<String> {
        self.fresh().map.keys().cloned().collect()
    }

    /// Runs the consent protocol for an `init` request.
    ///
    /// Blocks while the prompt is shown; call it from the blocking pool.
    /// The grant lock is not held while waiting for the user.
    ///
    /// # Errors
    ///
    /// Returns an [`AclError`] if the user agreed but the grant could not
    /// be stored.
    pub fn request_access(&self, origin: &str, token: &str) -> Result<ConsentOutcome, AclError> {
        if self.is_allowed(origin, token) {
            return Ok(ConsentOutcome::AlreadyAllowed);
        }

        info!(origin, "asking user for device access");
        if self.prompt.ask(origin) {
            self.grant(origin).map(ConsentOutcome::Granted)
        } else {
            warn!(origin, "user denied device access");
            Ok(ConsentOutcome::Denied)
        }
    }
}
