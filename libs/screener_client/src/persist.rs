//! Durable storage for the session credential.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use common::{Credential, Error, Identity};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// What survives a restart: the token plus the last known identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSession {
    pub token: Credential,
    #[serde(default)]
    pub user: Option<Identity>,
}

/// Storage capability injected into `SessionStore`.
pub trait PersistenceAdapter: Send + Sync {
    fn load(&self) -> Result<Option<PersistedSession>, Error>;
    fn save(&self, session: &PersistedSession) -> Result<(), Error>;
    fn clear(&self) -> Result<(), Error>;
}

/// JSON file at `<dir>/<namespace>.json`.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl AsRef<Path>, namespace: &str) -> Self {
        Self {
            path: dir.as_ref().join(format!("{namespace}.json")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Create `path` readable and writable by the owner only; it holds a
/// bearer token.
fn open_private(path: &Path) -> std::io::Result<fs::File> {
    // A temp file left by a crash keeps its mode on reopen.
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}

impl PersistenceAdapter for FileStore {
    fn load(&self) -> Result<Option<PersistedSession>, Error> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::Persistence(format!(
                    "Failed to read {}: {e}",
                    self.path.display()
                )))
            }
        };

        let session = serde_json::from_slice(&raw).map_err(|e| {
            Error::Persistence(format!("Corrupt session file {}: {e}", self.path.display()))
        })?;
        Ok(Some(session))
    }

    fn save(&self, session: &PersistedSession) -> Result<(), Error> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }

        // Write-then-rename so a crash never leaves a half-written file.
        let tmp = self.path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(session)?;
        {
            let mut file = open_private(&tmp)?;
            file.write_all(&body)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;

        debug!("Persisted session to {}", self.path.display());
        Ok(())
    }

    fn clear(&self) -> Result<(), Error> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Process-local storage; nothing outlives the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    slot: Mutex<Option<PersistedSession>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with an already-persisted session.
    pub fn with_session(session: PersistedSession) -> Self {
        Self {
            slot: Mutex::new(Some(session)),
        }
    }

    pub fn snapshot(&self) -> Option<PersistedSession> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl PersistenceAdapter for MemoryStore {
    fn load(&self) -> Result<Option<PersistedSession>, Error> {
        Ok(self.snapshot())
    }

    fn save(&self, session: &PersistedSession) -> Result<(), Error> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(session.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), Error> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}
