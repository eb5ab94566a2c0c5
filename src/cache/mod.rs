//! Time-bounded key-value caching over an injectable string store.
//!
//! The cache is an optimization, never a source of truth: every storage or
//! decoding failure degrades to a miss and every write failure is dropped.

pub mod memory_store;
pub mod sqlite_store;

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::debug;
use serde::de::DeserializeOwned;
use serde::Serialize;

pub use memory_store::MemoryStore;
pub use sqlite_store::SqliteStore;

/// String-keyed persistence used underneath [`TtlCache`].
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, String>;
    fn set(&self, key: &str, value: &str) -> Result<(), String>;
    fn delete(&self, key: &str) -> Result<(), String>;
}

/// Serialized cache record.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry<T> {
    pub value: T,
    pub expires_at_epoch_ms: i64,
}

impl<T> CacheEntry<T> {
    pub fn is_expired_at(&self, now_unix_ms: i64) -> bool {
        now_unix_ms > self.expires_at_epoch_ms
    }
}

pub fn now_unix_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as i64)
        .unwrap_or(0)
}

/// Typed TTL cache storing `CacheEntry<T>` JSON records under a key prefix.
pub struct TtlCache<T> {
    store: Arc<dyn KeyValueStore>,
    namespace: String,
    _value: PhantomData<fn() -> T>,
}

impl<T> Clone for TtlCache<T> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            namespace: self.namespace.clone(),
            _value: PhantomData,
        }
    }
}

impl<T> TtlCache<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(store: Arc<dyn KeyValueStore>, namespace: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            _value: PhantomData,
        }
    }

    fn storage_key(&self, key: &str) -> String {
        format!("{}{}", self.namespace, key)
    }

    pub fn get(&self, key: &str) -> Option<T> {
        self.get_at(key, now_unix_ms())
    }

    /// Reads `key` as of `now_unix_ms`, purging the entry if it has expired.
    pub fn get_at(&self, key: &str, now_unix_ms: i64) -> Option<T> {
        let storage_key = self.storage_key(key);
        let raw = match self.store.get(&storage_key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(error) => {
                debug!("Cache read failed for {}: {}", storage_key, error);
                return None;
            }
        };

        let entry = match serde_json::from_str::<CacheEntry<T>>(&raw) {
            Ok(entry) => entry,
            Err(error) => {
                debug!("Discarding unreadable cache entry {}: {}", storage_key, error);
                let _ = self.store.delete(&storage_key);
                return None;
            }
        };

        if entry.is_expired_at(now_unix_ms) {
            let _ = self.store.delete(&storage_key);
            return None;
        }
        Some(entry.value)
    }

    pub fn set(&self, key: &str, value: T, ttl: Duration) {
        self.set_at(key, value, ttl, now_unix_ms());
    }

    pub fn set_at(&self, key: &str, value: T, ttl: Duration, now_unix_ms: i64) {
        let storage_key = self.storage_key(key);
        let entry = CacheEntry {
            value,
            expires_at_epoch_ms: now_unix_ms.saturating_add(ttl.as_millis() as i64),
        };
        let serialized = match serde_json::to_string(&entry) {
            Ok(serialized) => serialized,
            Err(error) => {
                debug!("Cache entry {} is not serializable: {}", storage_key, error);
                return;
            }
        };
        if let Err(error) = self.store.set(&storage_key, &serialized) {
            debug!("Cache write failed for {}: {}", storage_key, error);
        }
    }

    pub fn delete(&self, key: &str) {
        let _ = self.store.delete(&self.storage_key(key));
    }
}
