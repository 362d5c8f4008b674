//! Durable storage for the part of a session that survives restarts.
//!
//! Only the refresh token and the cached user profile are ever written; the
//! access token lives in memory for as long as the process does.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::User;

/// What is persisted between runs, under the stable keys `refresh_token`
/// and `user`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSession {
    /// The long-lived credential used to bootstrap a new access token.
    #[serde(default)]
    pub refresh_token: Option<String>,

    /// The last verified profile; informational only.
    #[serde(default)]
    pub user: Option<User>,
}

impl PersistedSession {
    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.refresh_token.is_none() && self.user.is_none()
    }
}

/// Durable client-side storage for a [`PersistedSession`].
pub trait CredentialStore: Send + Sync {
    /// Read the stored session; an absent store is an empty session.
    fn load(&self) -> Result<PersistedSession>;

    /// Replace the stored session.
    fn save(&self, session: &PersistedSession) -> Result<()>;

    /// Remove everything.
    fn clear(&self) -> Result<()>;
}

/// A store that forgets everything when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    session: Mutex<PersistedSession>,
}

impl MemoryStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// A store pre-populated as if a previous run had saved `session`.
    pub fn with_session(session: PersistedSession) -> Self {
        Self {
            session: Mutex::new(session),
        }
    }

    /// A copy of what is stored.
    pub fn snapshot(&self) -> PersistedSession {
        self.session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl CredentialStore for MemoryStore {
    fn load(&self) -> Result<PersistedSession> {
        Ok(self.snapshot())
    }

    fn save(&self, session: &PersistedSession) -> Result<()> {
        *self
            .session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = session.clone();
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.save(&PersistedSession::default())
    }
}

/// A store backed by a JSON file.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// A store at `path`; the file is created on first save.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Where the session is kept.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for FileStore {
    fn load(&self) -> Result<PersistedSession> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(PersistedSession::default());
            }
            Err(e) => {
                return Err(Error::io(
                    format!("could not read {}: {e}", self.path.display()),
                    e,
                ));
            }
        };
        if content.trim().is_empty() {
            return Ok(PersistedSession::default());
        }
        Ok(serde_json::from_str(&content)?)
    }

    fn save(&self, session: &PersistedSession) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(session)?;
        // Write then rename so a crash never leaves a half-written file.
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
