//! Pluggable persistence for the auth token.
//!
//! The client never talks to disk directly — it writes tokens through a
//! [`TokenStore`] and treats persistence as best-effort. A store that fails
//! to save logs the failure and moves on; the in-memory token remains the
//! source of truth for the current process.

use std::path::PathBuf;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

/// External sink/source for the opaque auth token.
///
/// `save(None)` clears the persisted token (logout).
pub trait TokenStore: Send + Sync {
    /// Load the previously persisted token, if any.
    fn load(&self) -> Option<String>;

    /// Persist the token (or its absence). Must not panic; failures are
    /// the store's problem to log.
    fn save(&self, token: Option<&str>);
}

/// Process-local store with no persistence. Used by tests and by hosts that
/// manage credentials themselves.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    slot: RwLock<Option<String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with a token already present (resume-handshake scenarios).
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            slot: RwLock::new(Some(token.into())),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Option<String> {
        self.slot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn save(&self, token: Option<&str>) {
        *self.slot.write().unwrap_or_else(|e| e.into_inner()) = token.map(str::to_owned);
    }
}

/// On-disk token file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoredCredentials {
    auth_token: Option<String>,
}

/// Stores the token as a single JSON document at a caller-chosen path.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Option<String> {
        let text = std::fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str::<StoredCredentials>(&text) {
            Ok(creds) => creds.auth_token,
            Err(e) => {
                log::warn!("ignoring malformed token file {}: {e}", self.path.display());
                None
            }
        }
    }

    fn save(&self, token: Option<&str>) {
        let creds = StoredCredentials {
            auth_token: token.map(str::to_owned),
        };
        let text = match serde_json::to_string_pretty(&creds) {
            Ok(text) => text,
            Err(e) => {
                log::error!("failed to serialize credentials: {e}");
                return;
            }
        };
        if let Some(parent) = self.path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        // Write-then-rename keeps the previous token intact if the write dies.
        let tmp = self.path.with_extension("json.tmp");
        let result =
            std::fs::write(&tmp, text).and_then(|()| std::fs::rename(&tmp, &self.path));
        if let Err(e) = result {
            log::error!("failed to persist auth token to {}: {e}", self.path.display());
        }
    }
}
