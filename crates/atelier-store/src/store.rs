use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, instrument, warn};

use atelier_core::ids::SessionId;

use crate::error::StoreError;
use crate::session::{GenerationEntry, SessionState};

/// Durable home of the single per-process session.
///
/// The whole state is one JSON document on disk; saves go through a
/// write-to-temp-then-rename so a reader (or a crash) never observes a
/// half-written record. A corrupt or unreadable record is not fatal — the
/// store logs it and starts a fresh session.
pub struct SessionStore {
    inner: Arc<Inner>,
}

struct Inner {
    path: PathBuf,
    state: Mutex<SessionState>,
}

impl SessionStore {
    /// Open the store, loading persisted state if a valid record exists.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Io(format!("create dir: {e}")))?;
        }

        let state = load_or_fresh(path);
        info!(path = %path.display(), session_id = %state.session_id, "session store opened");

        Ok(Self {
            inner: Arc::new(Inner {
                path: path.to_owned(),
                state: Mutex::new(state),
            }),
        })
    }

    /// Execute a closure with read access to the current state.
    pub fn with_state<T>(&self, f: impl FnOnce(&SessionState) -> T) -> T {
        let state = self.inner.state.lock();
        f(&state)
    }

    pub fn session_id(&self) -> SessionId {
        self.with_state(|s| s.session_id.clone())
    }

    pub fn current(&self) -> Option<GenerationEntry> {
        self.with_state(|s| s.current_generation().cloned())
    }

    pub fn history(&self) -> Vec<GenerationEntry> {
        self.with_state(|s| s.generations.clone())
    }

    pub fn snapshot(&self) -> SessionState {
        self.with_state(Clone::clone)
    }

    /// Append an entry and persist. If the write fails the in-memory append
    /// is rolled back, so a failed call never leaves a partial entry behind.
    #[instrument(skip(self, entry), fields(generation_id = %entry.id))]
    pub fn add_generation(&self, entry: GenerationEntry) -> Result<(), StoreError> {
        let mut state = self.inner.state.lock();
        let prior_pointer = state.current_generation_id.clone();
        let prior_updated_at = state.updated_at.clone();

        state.add_generation(entry);

        if let Err(e) = write_atomic(&self.inner.path, &state) {
            let _ = state.generations.pop();
            state.current_generation_id = prior_pointer;
            state.updated_at = prior_updated_at;
            return Err(e);
        }
        Ok(())
    }

    /// Persist the current state as-is.
    #[instrument(skip(self))]
    pub fn save(&self) -> Result<(), StoreError> {
        let state = self.inner.state.lock();
        write_atomic(&self.inner.path, &state)
    }

    /// Discard persisted state and reset to a fresh, empty session.
    /// Returns the new session id.
    #[instrument(skip(self))]
    pub fn clear(&self) -> Result<SessionId, StoreError> {
        let mut state = self.inner.state.lock();
        *state = SessionState::create_new();

        match std::fs::remove_file(&self.inner.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(StoreError::Io(format!("remove session file: {e}"))),
        }

        info!(session_id = %state.session_id, "session cleared");
        Ok(state.session_id.clone())
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }
}

impl Clone for SessionStore {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

fn load_or_fresh(path: &Path) -> SessionState {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return SessionState::create_new();
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "session file unreadable, starting fresh");
            return SessionState::create_new();
        }
    };

    match serde_json::from_str(&raw) {
        Ok(state) => state,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "session file corrupt, starting fresh");
            SessionState::create_new()
        }
    }
}

fn write_atomic(path: &Path, state: &SessionState) -> Result<(), StoreError> {
    let json = serde_json::to_string_pretty(state)?;
    let tmp = tmp_path(path);
    std::fs::write(&tmp, json).map_err(|e| StoreError::Io(format!("write temp: {e}")))?;
    std::fs::rename(&tmp, path).map_err(|e| StoreError::Io(format!("rename: {e}")))?;
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".tmp");
    PathBuf::from(os)
}
