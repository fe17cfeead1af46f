//! In-process [`BlobStore`] backed by a moka concurrent cache.
//!
//! Entries are bounded either by count or by a byte budget and expire on a
//! sliding window (time-to-idle), an absolute lifetime (time-to-live), or both.
//! Operations on distinct keys never contend on a global lock.

use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use tokencache_core::{BlobStore, CacheBlob, ExpirationPolicy, StorageResult, validate_key};

/// Settings for [`MemoryBlobStore`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryStoreOptions {
    /// Maximum number of partitions kept. Ignored when `max_bytes` is set.
    #[serde(default = "default_max_entries")]
    pub max_entries: u64,
    /// Byte budget across all partitions (key plus blob length).
    pub max_bytes: Option<u64>,
    #[serde(with = "humantime_serde")]
    pub sliding_expiration: Option<Duration>,
    #[serde(with = "humantime_serde")]
    pub absolute_expiration: Option<Duration>,
}

fn default_max_entries() -> u64 {
    10_000
}

fn default_absolute_expiration() -> Option<Duration> {
    Some(Duration::from_secs(14 * 24 * 60 * 60))
}

impl Default for MemoryStoreOptions {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            max_bytes: None,
            sliding_expiration: None,
            absolute_expiration: default_absolute_expiration(),
        }
    }
}

impl MemoryStoreOptions {
    pub fn expiration(&self) -> ExpirationPolicy {
        ExpirationPolicy {
            sliding: self.sliding_expiration,
            absolute: self.absolute_expiration,
        }
    }

    /// Check the options for values moka cannot honor.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_bytes.is_none() && self.max_entries == 0 {
            return Err("memory.max_entries must be greater than 0".to_string());
        }
        if self.max_bytes == Some(0) {
            return Err("memory.max_bytes must be greater than 0".to_string());
        }
        if self.sliding_expiration == Some(Duration::ZERO)
            || self.absolute_expiration == Some(Duration::ZERO)
        {
            return Err("memory expiration windows must be non-zero".to_string());
        }
        Ok(())
    }
}

/// Token cache partitions held in process memory.
///
/// Contents are lost when the process exits. Cloning is cheap and clones
/// share the same entries.
#[derive(Clone)]
pub struct MemoryBlobStore {
    cache: Cache<String, CacheBlob>,
}

impl MemoryBlobStore {
    pub fn new(options: &MemoryStoreOptions) -> Self {
        let mut builder = Cache::<String, CacheBlob>::builder();
        builder = match options.max_bytes {
            Some(max_bytes) => builder
                .weigher(|key: &String, blob: &CacheBlob| -> u32 {
                    u32::try_from(key.len() + blob.len()).unwrap_or(u32::MAX)
                })
                .max_capacity(max_bytes),
            None => builder.max_capacity(options.max_entries),
        };
        if let Some(window) = options.sliding_expiration {
            builder = builder.time_to_idle(window);
        }
        if let Some(lifetime) = options.absolute_expiration {
            builder = builder.time_to_live(lifetime);
        }

        tracing::debug!(
            max_entries = options.max_entries,
            max_bytes = ?options.max_bytes,
            sliding = ?options.sliding_expiration,
            absolute = ?options.absolute_expiration,
            "created in-memory blob store"
        );

        Self {
            cache: builder.build(),
        }
    }

    /// Approximate number of live entries.
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Approximate total weight (bytes when a byte budget is configured).
    pub fn weighted_size(&self) -> u64 {
        self.cache.weighted_size()
    }

    /// Apply pending evictions and expirations now.
    pub async fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks().await;
    }
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new(&MemoryStoreOptions::default())
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, key: &str) -> StorageResult<Option<CacheBlob>> {
        Ok(self.cache.get(key).await)
    }

    async fn set(&self, key: &str, blob: CacheBlob) -> StorageResult<()> {
        validate_key(key)?;
        self.cache.insert(key.to_owned(), blob).await;
        Ok(())
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        self.cache.invalidate(key).await;
        Ok(())
    }

    async fn refresh(&self, key: &str) -> StorageResult<()> {
        // A read is what resets moka's idle timer.
        let _ = self.cache.get(key).await;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokencache_core::StorageError;

    fn blob(bytes: &[u8]) -> CacheBlob {
        CacheBlob::from(bytes)
    }

    #[tokio::test]
    async fn test_unwritten_key_is_absent() {
        let store = MemoryBlobStore::default();
        assert_eq!(store.get("never-written").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_get_round_trip() {
        let store = MemoryBlobStore::default();
        store.set("uid.utid", blob(b"serialized")).await.unwrap();
        assert_eq!(
            store.get("uid.utid").await.unwrap(),
            Some(blob(b"serialized"))
        );

        store.set("uid.utid", blob(b"newer")).await.unwrap();
        assert_eq!(store.get("uid.utid").await.unwrap(), Some(blob(b"newer")));
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let store = MemoryBlobStore::default();
        store.set("k", blob(b"v")).await.unwrap();
        store.remove("k").await.unwrap();
        store.remove("k").await.unwrap();
        store.remove("never-written").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_empty_key_rejected() {
        let store = MemoryBlobStore::default();
        let err = store.set("", blob(b"v")).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey { .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_distinct_keys() {
        let store = Arc::new(MemoryBlobStore::default());

        let mut handles = Vec::new();
        for i in 0..64u32 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let key = format!("user-{i}");
                store.set(&key, CacheBlob::from(i.to_be_bytes().to_vec())).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        for i in 0..64u32 {
            let got = store.get(&format!("user-{i}")).await.unwrap();
            assert_eq!(got, Some(CacheBlob::from(i.to_be_bytes().to_vec())));
        }
    }

    #[tokio::test]
    async fn test_sliding_expiration_extended_by_reads() {
        let options = MemoryStoreOptions {
            sliding_expiration: Some(Duration::from_millis(300)),
            absolute_expiration: None,
            ..Default::default()
        };
        let store = MemoryBlobStore::new(&options);
        store.set("k", blob(b"v")).await.unwrap();

        for _ in 0..5 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            store.refresh("k").await.unwrap();
        }
        assert!(store.get("k").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_absolute_expiration_caps_sliding() {
        let options = MemoryStoreOptions {
            sliding_expiration: Some(Duration::from_secs(10)),
            absolute_expiration: Some(Duration::from_millis(300)),
            ..Default::default()
        };
        let store = MemoryBlobStore::new(&options);
        store.set("k", blob(b"v")).await.unwrap();

        for _ in 0..3 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            store.refresh("k").await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_entry_bound_enforced() {
        let options = MemoryStoreOptions {
            max_entries: 2,
            ..Default::default()
        };
        let store = MemoryBlobStore::new(&options);
        for i in 0..10 {
            store.set(&format!("k{i}"), blob(b"v")).await.unwrap();
        }
        store.run_pending_tasks().await;
        assert!(store.entry_count() <= 2);
    }

    #[tokio::test]
    async fn test_byte_budget_enforced() {
        let options = MemoryStoreOptions {
            max_bytes: Some(64),
            ..Default::default()
        };
        let store = MemoryBlobStore::new(&options);
        for i in 0..10 {
            store.set(&format!("k{i}"), CacheBlob::from(vec![0u8; 30])).await.unwrap();
        }
        store.run_pending_tasks().await;
        assert!(store.weighted_size() <= 64);
    }

    #[test]
    fn test_options_validation() {
        assert!(MemoryStoreOptions::default().validate().is_ok());

        let zero_entries = MemoryStoreOptions {
            max_entries: 0,
            ..Default::default()
        };
        assert!(zero_entries.validate().is_err());

        let zero_window = MemoryStoreOptions {
            sliding_expiration: Some(Duration::ZERO),
            ..Default::default()
        };
        assert!(zero_window.validate().is_err());
    }
}
