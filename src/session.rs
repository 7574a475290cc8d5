//! Session store: per-session working directories and retention.
//!
//! Every ingestion runs inside a session. A session owns two isolated
//! directories under the storage root, named by the session id:
//!
//! ```text
//! <root>/<session_id>/raw/     uploaded files, as received
//! <root>/<session_id>/index/   persisted vector index
//! ```
//!
//! Generated ids combine a sortable UTC timestamp with 32 bits of
//! randomness (`session_20260102_153000_1a2b3c4d`), so lexicographic order
//! equals creation order and external tooling can list, inspect, or delete
//! sessions without going through the application.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Reserved id for the shared index used when a caller does not
/// supply a session: single-document mode without session bookkeeping.
pub const SHARED_SESSION_ID: &str = "shared";

/// Handle to one session's directories.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub raw_dir: PathBuf,
    pub index_dir: PathBuf,
}

/// Manages session directories under a configurable root and hands out
/// per-session ingestion locks so concurrent ingests into the same session
/// serialize while distinct sessions proceed independently.
pub struct SessionStore {
    root: PathBuf,
    ingest_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create storage root: {}", root.display()))?;
        Ok(Self {
            root,
            ingest_locks: Mutex::new(HashMap::new()),
        })
    }

    /// Resolve a session handle, generating a fresh id when none is given.
    /// Both directories are created if absent; an existing session id
    /// resolves to its existing directories.
    pub fn resolve(&self, explicit_id: Option<&str>) -> Result<Session> {
        let id = match explicit_id {
            Some(id) => {
                validate_session_id(id)?;
                id.to_string()
            }
            None => generate_session_id(),
        };

        let session_dir = self.root.join(&id);
        let raw_dir = session_dir.join("raw");
        let index_dir = session_dir.join("index");
        std::fs::create_dir_all(&raw_dir)
            .with_context(|| format!("Failed to create session dir: {}", raw_dir.display()))?;
        std::fs::create_dir_all(&index_dir)
            .with_context(|| format!("Failed to create session dir: {}", index_dir.display()))?;

        Ok(Session {
            id,
            raw_dir,
            index_dir,
        })
    }

    /// Paths for an existing session id without creating anything.
    pub fn lookup(&self, id: &str) -> Result<Session> {
        validate_session_id(id)?;
        let session_dir = self.root.join(id);
        Ok(Session {
            id: id.to_string(),
            raw_dir: session_dir.join("raw"),
            index_dir: session_dir.join("index"),
        })
    }

    /// The ingestion lock for a session id. Callers hold the guard across
    /// the whole extract-chunk-embed-persist sequence.
    pub async fn ingest_lock(&self, id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.ingest_locks.lock().await;
        locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Delete all but the `keep_latest` most recently created session
    /// directories, ordered by id (ids sort by creation time by
    /// construction). Best-effort: a directory that fails to delete is
    /// reported and skipped. Returns the number of sessions removed.
    pub fn purge(&self, keep_latest: usize) -> Result<usize> {
        let mut sessions: Vec<String> = std::fs::read_dir(&self.root)
            .with_context(|| format!("Failed to list storage root: {}", self.root.display()))?
            .filter_map(|entry| {
                let entry = entry.ok()?;
                if !entry.file_type().ok()?.is_dir() {
                    return None;
                }
                let name = entry.file_name().to_string_lossy().into_owned();
                // The shared index is not a timestamped session; retention
                // never deletes it.
                if name == SHARED_SESSION_ID {
                    return None;
                }
                Some(name)
            })
            .collect();

        sessions.sort();
        sessions.reverse();

        let mut removed = 0usize;
        for id in sessions.iter().skip(keep_latest) {
            let path = self.root.join(id);
            match std::fs::remove_dir_all(&path) {
                Ok(()) => removed += 1,
                Err(e) => {
                    eprintln!(
                        "Warning: failed to delete session {} at {}: {}",
                        id,
                        path.display(),
                        e
                    );
                }
            }
        }
        Ok(removed)
    }
}

/// `session_<UTC yyyymmdd_HHMMSS>_<8 hex chars>`: sortable timestamp plus
/// 32 bits of randomness.
pub fn generate_session_id() -> String {
    let ts = Utc::now().format("%Y%m%d_%H%M%S");
    let suffix = &Uuid::new_v4().simple().to_string()[..8];
    format!("session_{}_{}", ts, suffix)
}

/// Session ids become directory names; restrict them accordingly.
fn validate_session_id(id: &str) -> Result<()> {
    if id.is_empty() {
        bail!("session id must not be empty");
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        bail!("invalid session id: '{}' (allowed: alphanumeric, '_', '-')", id);
    }
    Ok(())
}
