use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::error::StorageError;

/// Raw string key-value backend. Values are JSON text.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: String) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Durable and session key names.
pub mod keys {
    pub const THREADS: &str = "forum_threads";
    pub const PURGED_THREADS: &str = "forum_purged_threads";

    pub fn comments(thread_id: &str) -> String { format!("thread_comments_data_{thread_id}") }
    pub fn likes(thread_id: &str) -> String { format!("thread_likes_{thread_id}") }
    pub fn views(thread_id: &str) -> String { format!("thread_views_{thread_id}") }
    pub fn liked_threads(user_id: &str) -> String { format!("liked_threads_{user_id}") }
    // session namespace
    pub fn viewed(thread_id: &str) -> String { format!("user_viewed_{thread_id}") }
}

// ---------------- Memory backend ----------------

#[derive(Default)]
pub struct MemoryStore {
    map: DashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }
    pub fn contains(&self, key: &str) -> bool { self.map.contains_key(key) }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.map.get(key).map(|v| v.value().clone()))
    }
    fn set(&self, key: &str, value: String) -> Result<(), StorageError> {
        self.map.insert(key.to_string(), value);
        Ok(())
    }
    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.map.remove(key);
        Ok(())
    }
}

// ---------------- File backend ----------------

/// Durable store kept as one JSON snapshot file, rewritten on every change.
pub struct FileStore {
    path: PathBuf,
    map: Mutex<std::collections::BTreeMap<String, String>>,
}

impl FileStore {
    pub const FILE_NAME: &'static str = "forum_store.json";

    /// Opens `<dir>/forum_store.json`, starting empty if it is missing or unreadable.
    pub fn open(dir: impl AsRef<Path>) -> Self {
        let path = dir.as_ref().join(Self::FILE_NAME);
        let map = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(m) => {
                    info!(path = %path.display(), "loaded durable store");
                    m
                }
                Err(e) => {
                    error!(path = %path.display(), "failed to parse durable store: {e}; starting empty");
                    Default::default()
                }
            },
            Err(e) => {
                debug!(path = %path.display(), "no durable store yet: {e}");
                Default::default()
            }
        };
        Self { path, map: Mutex::new(map) }
    }

    pub fn path(&self) -> &Path { &self.path }

    fn flush(&self, map: &std::collections::BTreeMap<String, String>) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec_pretty(map)
            .map_err(|source| StorageError::Serialize { key: Self::FILE_NAME.into(), source })?;
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(&self.path, bytes)?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let m = self.map.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(m.get(key).cloned())
    }
    fn set(&self, key: &str, value: String) -> Result<(), StorageError> {
        let mut m = self.map.lock().unwrap_or_else(PoisonError::into_inner);
        m.insert(key.to_string(), value);
        self.flush(&m)
    }
    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut m = self.map.lock().unwrap_or_else(PoisonError::into_inner);
        if m.remove(key).is_some() {
            self.flush(&m)?;
        }
        Ok(())
    }
}

// ---------------- Gateway ----------------

/// Typed JSON view over one backend. Never fails outward: errors are logged and
/// reads degrade to `None`, writes to a no-op.
#[derive(Clone)]
pub struct Namespace {
    label: &'static str,
    store: Arc<dyn KeyValueStore>,
}

impl Namespace {
    pub fn new(label: &'static str, store: Arc<dyn KeyValueStore>) -> Self {
        Self { label, store }
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.try_get(key) {
            Ok(v) => v,
            Err(StorageError::Corrupt { key, source }) => {
                warn!(ns = self.label, %key, "discarding corrupt record: {source}");
                if let Err(e) = self.store.remove(&key) {
                    error!(ns = self.label, %key, "failed to discard corrupt record: {e}");
                }
                None
            }
            Err(e) => {
                error!(ns = self.label, %key, "read failed: {e}");
                None
            }
        }
    }

    /// Like `get`, but reports whether the read failed so callers can keep
    /// their last known value instead of treating the key as empty.
    pub fn try_get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        let Some(raw) = self.store.get(key)? else { return Ok(None) };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| StorageError::Corrupt { key: key.to_string(), source })
    }

    /// Returns true when the write reached the backend.
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> bool {
        let raw = match serde_json::to_string(value) {
            Ok(r) => r,
            Err(source) => {
                error!(ns = self.label, %key, "{}", StorageError::Serialize { key: key.to_string(), source });
                return false;
            }
        };
        match self.store.set(key, raw) {
            Ok(()) => true,
            Err(e) => {
                error!(ns = self.label, %key, "write failed: {e}");
                false
            }
        }
    }

    pub fn remove(&self, key: &str) {
        if let Err(e) = self.store.remove(key) {
            error!(ns = self.label, %key, "remove failed: {e}");
        }
    }
}

type SessionFactory = dyn Fn() -> Arc<dyn KeyValueStore> + Send + Sync;

/// Durable namespace plus one session namespace per session id.
#[derive(Clone)]
pub struct PersistenceGateway {
    durable: Namespace,
    sessions: Arc<DashMap<String, Namespace>>,
    session_factory: Arc<SessionFactory>,
}

impl PersistenceGateway {
    /// Session namespaces default to fresh `MemoryStore`s.
    pub fn new(durable: Arc<dyn KeyValueStore>) -> Self {
        Self::with_session_factory(durable, Arc::new(|| Arc::new(MemoryStore::new()) as Arc<dyn KeyValueStore>))
    }

    pub fn with_session_factory(durable: Arc<dyn KeyValueStore>, factory: Arc<SessionFactory>) -> Self {
        Self {
            durable: Namespace::new("durable", durable),
            sessions: Arc::new(DashMap::new()),
            session_factory: factory,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub fn durable(&self) -> &Namespace { &self.durable }

    pub fn session(&self, session_id: &str) -> Namespace {
        self.sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Namespace::new("session", (self.session_factory)()))
            .clone()
    }

    /// Removes `key` from every open session namespace.
    pub fn remove_from_sessions(&self, key: &str) {
        for entry in self.sessions.iter() {
            entry.value().remove(key);
        }
    }

    /// Drops every session-scoped key of `session_id`.
    pub fn end_session(&self, session_id: &str) {
        if self.sessions.remove(session_id).is_some() {
            debug!(session_id, "session ended");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corrupt_record_is_discarded_without_touching_others() {
        let backend = Arc::new(MemoryStore::new());
        backend.set("good", "[1,2,3]".into()).unwrap();
        backend.set("bad", "{not json".into()).unwrap();
        let ns = Namespace::new("durable", backend.clone());

        assert_eq!(ns.get::<Vec<u32>>("bad"), None);
        assert!(!backend.contains("bad"));
        assert_eq!(ns.get::<Vec<u32>>("good"), Some(vec![1, 2, 3]));
    }

    #[test]
    fn sessions_are_isolated_and_cleared() {
        let gw = PersistenceGateway::in_memory();
        gw.session("s1").set("k", &true);
        assert_eq!(gw.session("s1").get::<bool>("k"), Some(true));
        assert_eq!(gw.session("s2").get::<bool>("k"), None);
        gw.end_session("s1");
        assert_eq!(gw.session("s1").get::<bool>("k"), None);
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let fs = FileStore::open(dir.path());
            fs.set("a", "\"x\"".into()).unwrap();
            fs.set("b", "1".into()).unwrap();
            fs.remove("b").unwrap();
        }
        let fs = FileStore::open(dir.path());
        assert_eq!(fs.get("a").unwrap().as_deref(), Some("\"x\""));
        assert_eq!(fs.get("b").unwrap(), None);
    }

    #[test]
    fn file_store_with_garbage_snapshot_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(FileStore::FILE_NAME), b"garbage").unwrap();
        let fs = FileStore::open(dir.path());
        assert_eq!(fs.get("anything").unwrap(), None);
    }
}
