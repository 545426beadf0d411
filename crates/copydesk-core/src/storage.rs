//! Durable key-value storage for session bookkeeping.
//!
//! Values are plain strings, same as browser local storage: structured
//! entries (`client.accounts`, `account_info`) are JSON encoded by the
//! caller. [`FileStore`] persists the whole map as one JSON object and
//! rewrites it on every mutation.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::errors::StoreError;

/// Well-known storage keys.
pub mod keys {
    /// Login id of the account currently in use.
    pub const ACTIVE_LOGINID: &str = "active_loginid";
    /// JSON map of login id to account record (`{ "token": ... }`).
    pub const CLIENT_ACCOUNTS: &str = "client.accounts";
    /// Token of the active account, duplicated for quick access.
    pub const AUTH_TOKEN: &str = "auth_token";
    /// JSON account snapshot.
    pub const ACCOUNT_INFO: &str = "account_info";
    /// Last known balance.
    pub const BALANCE: &str = "balance";
    /// Last known currency.
    pub const CURRENCY: &str = "currency";
    /// Last known account type.
    pub const ACCOUNT_TYPE: &str = "account_type";
    /// Custom server override; non-empty selects the custom environment.
    pub const SERVER_URL: &str = "config.server_url";
    /// UI language used for the `l=` query parameter.
    pub const LANGUAGE: &str = "i18n_language";
}

/// String key-value store.
pub trait KeyValueStore: Send + Sync {
    /// Read a value.
    fn get(&self, key: &str) -> Option<String>;

    /// Write a value, replacing any previous one.
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Delete a value. Missing keys are not an error.
    fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Re-read external changes, if the backend has any.
    fn refresh(&self) -> Result<(), StoreError> {
        Ok(())
    }

    /// Read a non-empty value; empty strings count as absent.
    fn get_non_empty(&self, key: &str) -> Option<String> {
        self.get(key).filter(|v| !v.is_empty())
    }
}

/// Read and decode a JSON value.
pub fn get_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>, StoreError> {
    store
        .get(key)
        .map(|raw| serde_json::from_str(&raw))
        .transpose()
        .map_err(StoreError::from)
}

/// Encode and write a JSON value.
pub fn set_json<T: Serialize>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> Result<(), StoreError> {
    let raw = serde_json::to_string(value)?;
    store.set(key, &raw)
}

/// Process-local store, used by tests and embedders that need no persistence.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: seed a value.
    #[must_use]
    pub fn with(self, key: &str, value: &str) -> Self {
        let _ = self.entries.write().insert(key.into(), value.into());
        self
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let _ = self.entries.write().insert(key.into(), value.into());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let _ = self.entries.write().remove(key);
        Ok(())
    }
}

/// Store persisted as a single JSON object on disk.
///
/// Every write re-reads the file first, so keys written by other processes
/// since the last read survive.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open the store at `path`, loading existing entries if the file exists.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let entries = read_entries(&path)?;
        tracing::debug!(path = %path.display(), entries = entries.len(), "opened store");
        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    /// Backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: self.path.display().to_string(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let body = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, body).map_err(io_err)?;
        std::fs::rename(&tmp, &self.path).map_err(io_err)
    }
}

fn read_entries(path: &Path) -> Result<BTreeMap<String, String>, StoreError> {
    match std::fs::read_to_string(path) {
        Ok(raw) if raw.trim().is_empty() => Ok(BTreeMap::new()),
        Ok(raw) => Ok(serde_json::from_str(&raw)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
        Err(source) => Err(StoreError::Io {
            path: path.display().to_string(),
            source,
        }),
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.write();
        let mut fresh = read_entries(&self.path)?;
        let _ = fresh.insert(key.into(), value.into());
        self.persist(&fresh)?;
        *entries = fresh;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.write();
        let mut fresh = read_entries(&self.path)?;
        if fresh.remove(key).is_some() {
            self.persist(&fresh)?;
        }
        *entries = fresh;
        Ok(())
    }

    fn refresh(&self) -> Result<(), StoreError> {
        let fresh = read_entries(&self.path)?;
        *self.entries.write() = fresh;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn memory_store_set_get_remove() {
        let store = MemoryStore::new();
        assert!(store.get("a").is_none());
        store.set("a", "1").unwrap();
        assert_eq!(store.get("a").as_deref(), Some("1"));
        store.remove("a").unwrap();
        assert!(store.get("a").is_none());
        // Removing again is fine
        store.remove("a").unwrap();
    }

    #[test]
    fn get_non_empty_treats_empty_as_absent() {
        let store = MemoryStore::new().with(keys::SERVER_URL, "");
        assert!(store.get(keys::SERVER_URL).is_some());
        assert!(store.get_non_empty(keys::SERVER_URL).is_none());
    }

    #[test]
    fn json_helpers_roundtrip_map() {
        let store = MemoryStore::new();
        let mut map = BTreeMap::new();
        let _ = map.insert("CR1".to_string(), 5_u32);
        set_json(&store, "m", &map).unwrap();
        let back: Option<BTreeMap<String, u32>> = get_json(&store, "m").unwrap();
        assert_eq!(back.unwrap()["CR1"], 5);
    }

    #[test]
    fn get_json_reports_malformed_value() {
        let store = MemoryStore::new().with("m", "{not json");
        let result: Result<Option<serde_json::Value>, _> = get_json(&store, "m");
        assert_matches!(result, Err(StoreError::Json(_)));
    }

    #[test]
    fn file_store_persists_across_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.json");

        let store = FileStore::open(&path).unwrap();
        store.set(keys::ACTIVE_LOGINID, "CR90000").unwrap();
        store.set(keys::CURRENCY, "USD").unwrap();
        store.remove(keys::CURRENCY).unwrap();
        drop(store);

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.get(keys::ACTIVE_LOGINID).as_deref(), Some("CR90000"));
        assert!(reopened.get(keys::CURRENCY).is_none());
    }

    #[test]
    fn file_store_refresh_sees_external_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let store = FileStore::open(&path).unwrap();
        store.set(keys::ACTIVE_LOGINID, "CR1").unwrap();

        std::fs::write(&path, r#"{"active_loginid": "VRTC2"}"#).unwrap();
        assert_eq!(store.get(keys::ACTIVE_LOGINID).as_deref(), Some("CR1"));
        store.refresh().unwrap();
        assert_eq!(store.get(keys::ACTIVE_LOGINID).as_deref(), Some("VRTC2"));
    }

    #[test]
    fn file_store_write_keeps_other_writers_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let ours = FileStore::open(&path).unwrap();
        ours.set(keys::ACTIVE_LOGINID, "CR1").unwrap();

        let theirs = FileStore::open(&path).unwrap();
        theirs.set(keys::ACTIVE_LOGINID, "VRTC2").unwrap();

        // Our view is stale but the write must not clobber theirs
        ours.set(keys::ACCOUNT_INFO, "{}").unwrap();
        ours.refresh().unwrap();
        assert_eq!(ours.get(keys::ACTIVE_LOGINID).as_deref(), Some("VRTC2"));
        assert_eq!(ours.get(keys::ACCOUNT_INFO).as_deref(), Some("{}"));

        theirs.set(keys::CURRENCY, "USD").unwrap();
        ours.remove(keys::ACCOUNT_INFO).unwrap();
        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.get(keys::CURRENCY).as_deref(), Some("USD"));
        assert!(reopened.get(keys::ACCOUNT_INFO).is_none());
    }

    #[test]
    fn file_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, "[1, 2").unwrap();
        assert_matches!(FileStore::open(&path), Err(StoreError::Json(_)));
    }

    #[test]
    fn file_store_empty_file_is_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, "  \n").unwrap();
        let store = FileStore::open(&path).unwrap();
        assert!(store.get("anything").is_none());
        assert_eq!(store.path(), path.as_path());
    }
}
