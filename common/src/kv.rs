//! Durable key-value interface used to survive restarts.
//!
//! Callers treat every failure here as transient: log it, keep the in-memory
//! state, and re-persist on the next write.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KvError {
    /// Backend refused the write because of its size budget.
    #[error("storage quota exceeded for key {key} ({bytes} bytes)")]
    QuotaExceeded { key: String, bytes: usize },

    #[error("storage backend unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, KvError>;
    async fn save(&self, key: &str, value: &[u8]) -> Result<(), KvError>;
}

/// Process-local store. Optionally enforces a per-value byte quota so the
/// pressure paths can be exercised without a real backend.
#[derive(Default)]
pub struct InMemoryKvStore {
    map: Mutex<HashMap<String, Vec<u8>>>,
    max_value_bytes: Option<usize>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(max_value_bytes: usize) -> Self {
        Self {
            map: Mutex::new(HashMap::new()),
            max_value_bytes: Some(max_value_bytes),
        }
    }

    /// Test convenience
    pub fn insert_raw(&self, key: &str, value: Vec<u8>) {
        self.map.lock().insert(key.to_string(), value);
    }

    pub fn get_raw(&self, key: &str) -> Option<Vec<u8>> {
        self.map.lock().get(key).cloned()
    }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        Ok(self.map.lock().get(key).cloned())
    }

    async fn save(&self, key: &str, value: &[u8]) -> Result<(), KvError> {
        if let Some(max) = self.max_value_bytes {
            if value.len() > max {
                return Err(KvError::QuotaExceeded {
                    key: key.to_string(),
                    bytes: value.len(),
                });
            }
        }

        self.map.lock().insert(key.to_string(), value.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_then_load() {
        let kv = InMemoryKvStore::new();
        kv.save("a", b"hello").await.unwrap();

        assert_eq!(kv.load("a").await.unwrap(), Some(b"hello".to_vec()));
        assert_eq!(kv.load("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn quota_rejects_oversized_values() {
        let kv = InMemoryKvStore::with_quota(4);

        let err = kv.save("a", b"too large").await.unwrap_err();
        assert!(matches!(err, KvError::QuotaExceeded { bytes: 9, .. }));

        kv.save("a", b"ok").await.unwrap();
        assert_eq!(kv.get_raw("a"), Some(b"ok".to_vec()));
    }
}
