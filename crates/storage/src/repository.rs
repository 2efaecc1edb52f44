use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::debug;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("storage quota exceeded ({needed} of {limit} bytes)")]
    QuotaExceeded { needed: usize, limit: usize },
}

/// Flat string key-value contract, modelled on browser local storage.
///
/// Values are opaque strings; callers use [`load_json`] and [`save_json`]
/// for typed access.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be read.
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Insert or replace a value.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::QuotaExceeded` when the backend is full, or
    /// other storage errors.
    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Remove a key. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be written.
    async fn remove(&self, key: &str) -> Result<bool, StorageError>;

    /// All keys starting with `prefix`, sorted.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be read.
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

/// Read and decode a JSON value. Missing keys yield `Ok(None)`.
///
/// # Errors
///
/// Returns `StorageError::Serialization` when the stored value does not decode
/// as `T`, or backend errors.
pub async fn load_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>, StorageError> {
    let Some(raw) = store.get(key).await? else {
        return Ok(None);
    };
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|err| StorageError::Serialization(format!("{key}: {err}")))
}

/// Encode a value as JSON and store it under `key`.
///
/// # Errors
///
/// Returns `StorageError::Serialization` if encoding fails, or backend errors.
pub async fn save_json<T: Serialize + Sync + ?Sized>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> Result<(), StorageError> {
    let raw =
        serde_json::to_string(value).map_err(|err| StorageError::Serialization(err.to_string()))?;
    store.set(key, &raw).await
}

/// In-memory store for tests and ephemeral sessions.
///
/// An optional byte quota (keys plus values) emulates a full browser store.
#[derive(Clone, Default)]
pub struct InMemoryKeyValueStore {
    entries: Arc<Mutex<BTreeMap<String, String>>>,
    quota_bytes: Option<usize>,
}

impl InMemoryKeyValueStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(BTreeMap::new())),
            quota_bytes: Some(quota_bytes),
        }
    }

    /// Bytes currently used by keys and values.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the lock is poisoned.
    pub fn used_bytes(&self) -> Result<usize, StorageError> {
        let guard = self
            .entries
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.iter().map(|(k, v)| k.len() + v.len()).sum())
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let guard = self
            .entries
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut guard = self
            .entries
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        if let Some(limit) = self.quota_bytes {
            let others: usize = guard
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            let needed = others + key.len() + value.len();
            if needed > limit {
                return Err(StorageError::QuotaExceeded { needed, limit });
            }
        }
        guard.insert(key.to_owned(), value.to_owned());
        debug!(key, bytes = value.len(), "stored value");
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool, StorageError> {
        let mut guard = self
            .entries
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.remove(key).is_some())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let guard = self
            .entries
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard
            .range(prefix.to_owned()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

/// Aggregate handle passed to the service layer.
#[derive(Clone)]
pub struct Storage {
    pub kv: Arc<dyn KeyValueStore>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        Self::from_store(InMemoryKeyValueStore::new())
    }

    #[must_use]
    pub fn from_store(store: impl KeyValueStore + 'static) -> Self {
        let kv: Arc<dyn KeyValueStore> = Arc::new(store);
        Self { kv }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portal_core::model::CourseId;

    #[tokio::test]
    async fn in_memory_roundtrip_and_remove() {
        let store = InMemoryKeyValueStore::new();
        assert_eq!(store.get("a").await.unwrap(), None);
        store.set("a", "1").await.unwrap();
        store.set("a", "2").await.unwrap();
        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("2"));
        assert!(store.remove("a").await.unwrap());
        assert!(!store.remove("a").await.unwrap());
    }

    #[tokio::test]
    async fn prefix_listing_is_sorted_and_bounded() {
        let store = InMemoryKeyValueStore::new();
        for key in ["p.b", "p.a", "q.a", "p"] {
            store.set(key, "x").await.unwrap();
        }
        assert_eq!(
            store.keys_with_prefix("p.").await.unwrap(),
            vec!["p.a".to_string(), "p.b".to_string()]
        );
    }

    #[tokio::test]
    async fn quota_rejects_oversized_writes() {
        let store = InMemoryKeyValueStore::with_quota(10);
        store.set("k", "12345").await.unwrap();
        let err = store.set("k2", "123456789").await.unwrap_err();
        assert!(matches!(err, StorageError::QuotaExceeded { limit: 10, .. }));
        // Replacing an existing key only counts the new value.
        store.set("k", "123456789").await.unwrap();
        assert_eq!(store.used_bytes().unwrap(), 10);
    }

    #[tokio::test]
    async fn json_helpers_report_bad_payloads() {
        let storage = Storage::in_memory();
        save_json(storage.kv.as_ref(), "ids", &vec![CourseId::new(3)])
            .await
            .unwrap();
        let ids: Option<Vec<CourseId>> = load_json(storage.kv.as_ref(), "ids").await.unwrap();
        assert_eq!(ids, Some(vec![CourseId::new(3)]));

        storage.kv.set("ids", "{not json").await.unwrap();
        let err = load_json::<Vec<CourseId>>(storage.kv.as_ref(), "ids")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Serialization(_)));
        assert!(load_json::<u32>(storage.kv.as_ref(), "missing").await.unwrap().is_none());
    }
}
