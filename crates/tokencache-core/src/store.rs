//! The backing store boundary.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{StorageError, StorageResult};
use crate::types::CacheBlob;

/// Persistent key-value storage for serialized token caches.
///
/// Implementations must be thread-safe (`Send + Sync`) and let calls for
/// distinct keys proceed in parallel. Concurrent writes to the same key are
/// last-writer-wins.
///
/// # Example
///
/// ```ignore
/// use tokencache_core::{BlobStore, CacheBlob, StorageResult};
///
/// async fn copy_partition(store: &dyn BlobStore, from: &str, to: &str) -> StorageResult<bool> {
///     match store.get(from).await? {
///         Some(blob) => {
///             store.set(to, blob).await?;
///             Ok(true)
///         }
///         None => Ok(false),
///     }
/// }
/// ```
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Reads the blob stored under `key`.
    ///
    /// Returns `None` if the key was never written, was removed or expired.
    /// A successful read restarts the entry's sliding expiration window.
    ///
    /// # Errors
    ///
    /// Returns an error only for infrastructure issues, never for a missing key.
    async fn get(&self, key: &str) -> StorageResult<Option<CacheBlob>>;

    /// Creates or overwrites the entry for `key` and restarts its expiration.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::InvalidKey` for an empty key, or an
    /// infrastructure error if the write could not be performed.
    async fn set(&self, key: &str, blob: CacheBlob) -> StorageResult<()>;

    /// Deletes the entry for `key`. Removing an absent key succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error only for infrastructure issues.
    async fn remove(&self, key: &str) -> StorageResult<()>;

    /// Restarts the sliding expiration window of `key` without returning its value.
    ///
    /// An absent key is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error only for infrastructure issues.
    async fn refresh(&self, key: &str) -> StorageResult<()>;

    /// Length of the blob stored under `key`, for bookkeeping.
    ///
    /// Wrappers forward this without counting it as a read, and backends may
    /// answer it without restarting the sliding window.
    ///
    /// # Errors
    ///
    /// Returns an error only for infrastructure issues.
    async fn peek_len(&self, key: &str) -> StorageResult<Option<usize>> {
        Ok(self.get(key).await?.map(|blob| blob.len()))
    }

    /// Short backend name used as a log field and metrics label.
    fn backend_name(&self) -> &'static str;
}

#[async_trait]
impl<S: BlobStore + ?Sized> BlobStore for Arc<S> {
    async fn get(&self, key: &str) -> StorageResult<Option<CacheBlob>> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, blob: CacheBlob) -> StorageResult<()> {
        (**self).set(key, blob).await
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        (**self).remove(key).await
    }

    async fn refresh(&self, key: &str) -> StorageResult<()> {
        (**self).refresh(key).await
    }

    async fn peek_len(&self, key: &str) -> StorageResult<Option<usize>> {
        (**self).peek_len(key).await
    }

    fn backend_name(&self) -> &'static str {
        (**self).backend_name()
    }
}

#[async_trait]
impl<S: BlobStore + ?Sized> BlobStore for Box<S> {
    async fn get(&self, key: &str) -> StorageResult<Option<CacheBlob>> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, blob: CacheBlob) -> StorageResult<()> {
        (**self).set(key, blob).await
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        (**self).remove(key).await
    }

    async fn refresh(&self, key: &str) -> StorageResult<()> {
        (**self).refresh(key).await
    }

    async fn peek_len(&self, key: &str) -> StorageResult<Option<usize>> {
        (**self).peek_len(key).await
    }

    fn backend_name(&self) -> &'static str {
        (**self).backend_name()
    }
}

/// Rejects keys no backend can store.
///
/// # Errors
///
/// Returns `StorageError::InvalidKey` if `key` is empty.
pub fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty() {
        return Err(StorageError::invalid_key("key must not be empty"));
    }
    Ok(())
}
