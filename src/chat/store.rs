//! Session persistence.
//!
//! Saves are write-through and de-duplicated: a snapshot whose serialized
//! bytes hash the same as the last one written for that id is skipped.

use super::session::ChatSession;
use crate::error::PersistenceError;
use async_trait::async_trait;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::debug;

/// Canonical file extension for persisted sessions.
const SESSION_FILE_EXT: &str = "json";
/// On-disk schema version for [`PersistedSession`].
const SESSION_FILE_VERSION: u32 = 1;

/// What a save actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Written,
    /// Identical to the last snapshot written; nothing touched.
    Unchanged,
}

/// Listing metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub id: String,
    pub title: String,
    pub owner: String,
    pub interrupted: bool,
    pub updated_at_millis: u64,
}

impl SessionSummary {
    fn of(session: &ChatSession) -> Self {
        Self {
            id: session.id.clone(),
            title: session.title.clone(),
            owner: session.owner.clone(),
            interrupted: session.is_interrupted(),
            updated_at_millis: session.updated_at_millis,
        }
    }
}

/// Durable storage for sessions.
#[async_trait]
pub trait SessionPersistence: Send + Sync {
    async fn save(&self, session: &ChatSession) -> Result<SaveOutcome, PersistenceError>;

    /// Load `id`, refusing sessions owned by anyone but `owner`.
    async fn load(&self, id: &str, owner: &str) -> Result<ChatSession, PersistenceError>;

    /// All sessions, most recently updated first.
    async fn list(&self) -> Result<Vec<SessionSummary>, PersistenceError>;
}

/// Last-written digests keyed by session id.
#[derive(Debug, Default)]
struct DigestCache {
    digests: Mutex<HashMap<String, [u8; 32]>>,
}

impl DigestCache {
    fn is_unchanged(&self, id: &str, digest: &[u8; 32]) -> bool {
        self.digests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .is_some_and(|last| last == digest)
    }

    fn remember(&self, id: &str, digest: [u8; 32]) {
        self.digests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_string(), digest);
    }
}

fn digest_of(bytes: &[u8]) -> [u8; 32] {
    Sha256::digest(bytes).into()
}

fn check_owner(session: &ChatSession, owner: &str) -> Result<(), PersistenceError> {
    if session.owner != owner {
        return Err(PersistenceError::OwnerMismatch {
            session_id: session.id.clone(),
            owner: session.owner.clone(),
            requested_by: owner.to_string(),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// FileSessionStore
// ---------------------------------------------------------------------------

/// On-disk payload shape.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedSession {
    version: u32,
    session: ChatSession,
}

/// One JSON file per session under a directory.
#[derive(Debug)]
pub struct FileSessionStore {
    sessions_dir: PathBuf,
    cache: DigestCache,
    writes: AtomicU64,
}

impl FileSessionStore {
    /// Open/create a store rooted at `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let sessions_dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&sessions_dir)?;
        Ok(Self {
            sessions_dir,
            cache: DigestCache::default(),
            writes: AtomicU64::new(0),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.sessions_dir
    }

    /// Files actually written since this store was opened.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// An id not used by any file in the store.
    pub fn allocate_id(&self) -> Result<String, PersistenceError> {
        for _ in 0..64 {
            let id = generate_session_id();
            if !self.session_path(&id).exists() {
                return Ok(id);
            }
        }
        Err(PersistenceError::InvalidId(
            "failed to allocate a unique session id".into(),
        ))
    }

    fn session_path(&self, id: &str) -> PathBuf {
        self.sessions_dir.join(format!("{id}.{SESSION_FILE_EXT}"))
    }

    async fn read(&self, id: &str) -> Result<ChatSession, PersistenceError> {
        validate_session_id(id)?;
        let path = self.session_path(id);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(PersistenceError::NotFound(id.to_string()))
            }
            Err(err) => return Err(err.into()),
        };
        let payload: PersistedSession = serde_json::from_slice(&raw)?;
        if payload.version != SESSION_FILE_VERSION {
            return Err(PersistenceError::UnsupportedVersion(payload.version));
        }
        Ok(payload.session)
    }
}

#[async_trait]
impl SessionPersistence for FileSessionStore {
    async fn save(&self, session: &ChatSession) -> Result<SaveOutcome, PersistenceError> {
        validate_session_id(&session.id)?;
        let payload = PersistedSession {
            version: SESSION_FILE_VERSION,
            session: session.clone(),
        };
        let json = serde_json::to_vec_pretty(&payload)?;
        let digest = digest_of(&json);
        if self.cache.is_unchanged(&session.id, &digest) {
            debug!(session = %session.id, "session unchanged; skipping write");
            return Ok(SaveOutcome::Unchanged);
        }

        let path = self.session_path(&session.id);
        // Sibling temp file plus rename, so a crash mid-write never clobbers
        // the last good snapshot.
        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &json).await?;
        tokio::fs::rename(&tmp_path, &path).await?;
        self.cache.remember(&session.id, digest);
        self.writes.fetch_add(1, Ordering::SeqCst);
        debug!(session = %session.id, bytes = json.len(), "session written");
        Ok(SaveOutcome::Written)
    }

    async fn load(&self, id: &str, owner: &str) -> Result<ChatSession, PersistenceError> {
        let session = self.read(id).await?;
        check_owner(&session, owner)?;
        Ok(session)
    }

    async fn list(&self) -> Result<Vec<SessionSummary>, PersistenceError> {
        let mut sessions = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.sessions_dir).await?;
        // Unreadable or malformed files are skipped so one bad file does not
        // break listing.
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(SESSION_FILE_EXT) {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Ok(session) = self.read(id).await {
                sessions.push(SessionSummary::of(&session));
            }
        }
        sort_recent_first(&mut sessions);
        Ok(sessions)
    }
}

fn sort_recent_first(sessions: &mut [SessionSummary]) {
    // Id tiebreak keeps output deterministic.
    sessions.sort_by(|a, b| {
        b.updated_at_millis
            .cmp(&a.updated_at_millis)
            .then_with(|| a.id.cmp(&b.id))
    });
}

// ---------------------------------------------------------------------------
// MemorySessionStore
// ---------------------------------------------------------------------------

/// In-process store with the same de-dup and owner rules as the file store.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<String, Vec<u8>>>,
    cache: DigestCache,
    writes: AtomicU64,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Latest stored snapshot, bypassing the owner check.
    pub fn snapshot(&self, id: &str) -> Option<ChatSession> {
        let sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        sessions
            .get(id)
            .and_then(|raw| serde_json::from_slice(raw).ok())
    }
}

#[async_trait]
impl SessionPersistence for MemorySessionStore {
    async fn save(&self, session: &ChatSession) -> Result<SaveOutcome, PersistenceError> {
        validate_session_id(&session.id)?;
        let json = serde_json::to_vec(session)?;
        let digest = digest_of(&json);
        if self.cache.is_unchanged(&session.id, &digest) {
            return Ok(SaveOutcome::Unchanged);
        }
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session.id.clone(), json);
        self.cache.remember(&session.id, digest);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(SaveOutcome::Written)
    }

    async fn load(&self, id: &str, owner: &str) -> Result<ChatSession, PersistenceError> {
        validate_session_id(id)?;
        let session = self
            .snapshot(id)
            .ok_or_else(|| PersistenceError::NotFound(id.to_string()))?;
        check_owner(&session, owner)?;
        Ok(session)
    }

    async fn list(&self) -> Result<Vec<SessionSummary>, PersistenceError> {
        let mut sessions: Vec<SessionSummary> = {
            let stored = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
            stored
                .values()
                .filter_map(|raw| serde_json::from_slice::<ChatSession>(raw).ok())
                .map(|session| SessionSummary::of(&session))
                .collect()
        };
        sort_recent_first(&mut sessions);
        Ok(sessions)
    }
}

// ---------------------------------------------------------------------------
// Ids
// ---------------------------------------------------------------------------

/// Validate session ids before they touch the filesystem.
pub fn validate_session_id(id: &str) -> Result<(), PersistenceError> {
    let trimmed = id.trim();
    if trimmed.is_empty() || trimmed != id {
        return Err(PersistenceError::InvalidId(format!("`{id}`")));
    }
    if trimmed == "." || trimmed == ".." {
        return Err(PersistenceError::InvalidId(format!("`{id}`")));
    }
    if trimmed
        .chars()
        .any(|ch| !(ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' || ch == '.'))
    {
        return Err(PersistenceError::InvalidId(format!(
            "`{id}` may only contain ASCII letters, numbers, '.', '-', '_'"
        )));
    }
    Ok(())
}

/// Random hex session id (`xxxx-xxxx-xxxx-xxxx`).
pub fn generate_session_id() -> String {
    let mut bytes = [0u8; 8];
    OsRng.fill_bytes(&mut bytes);
    let hex = format!("{:016x}", u64::from_be_bytes(bytes));
    format!(
        "{}-{}-{}-{}",
        &hex[0..4],
        &hex[4..8],
        &hex[8..12],
        &hex[12..16]
    )
}
