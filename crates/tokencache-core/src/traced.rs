//! TracedStore - a store wrapper that opens a `tracing` span per call.

use async_trait::async_trait;
use tracing::{Instrument, debug, debug_span, warn};

use crate::error::StorageResult;
use crate::store::BlobStore;
use crate::types::CacheBlob;

/// Wraps a store and logs every operation with its key and outcome.
///
/// Blob contents are never logged, only their length.
pub struct TracedStore<S: BlobStore> {
    inner: S,
}

impl<S: BlobStore> TracedStore<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    /// Get a reference to the inner store.
    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: BlobStore> BlobStore for TracedStore<S> {
    async fn get(&self, key: &str) -> StorageResult<Option<CacheBlob>> {
        let span = debug_span!("blob_store", op = "get", key = %key, backend = self.inner.backend_name());
        async {
            let result = self.inner.get(key).await;
            match &result {
                Ok(Some(blob)) => debug!(len = blob.len(), "hit"),
                Ok(None) => debug!("miss"),
                Err(e) => warn!(error = %e, "read failed"),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn set(&self, key: &str, blob: CacheBlob) -> StorageResult<()> {
        let span = debug_span!("blob_store", op = "set", key = %key, backend = self.inner.backend_name());
        let len = blob.len();
        async {
            let result = self.inner.set(key, blob).await;
            match &result {
                Ok(()) => debug!(len, "stored"),
                Err(e) => warn!(error = %e, len, "write failed"),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        let span = debug_span!("blob_store", op = "remove", key = %key, backend = self.inner.backend_name());
        async {
            let result = self.inner.remove(key).await;
            match &result {
                Ok(()) => debug!("removed"),
                Err(e) => warn!(error = %e, "remove failed"),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn refresh(&self, key: &str) -> StorageResult<()> {
        let span = debug_span!("blob_store", op = "refresh", key = %key, backend = self.inner.backend_name());
        async {
            let result = self.inner.refresh(key).await;
            if let Err(e) = &result {
                warn!(error = %e, "refresh failed");
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn peek_len(&self, key: &str) -> StorageResult<Option<usize>> {
        self.inner.peek_len(key).await
    }

    fn backend_name(&self) -> &'static str {
        self.inner.backend_name()
    }
}
