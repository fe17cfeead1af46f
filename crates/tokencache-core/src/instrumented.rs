//! InstrumentedStore - a store wrapper that counts operations, bytes and latency.
//!
//! The wrapper delegates every call to an inner [`BlobStore`] and records the
//! outcome in a [`CacheCounters`] instance. Results, including errors, are
//! returned to the caller unchanged.
//!
//! # Example
//!
//! ```ignore
//! use tokencache_core::{CacheCounters, InstrumentedStore};
//!
//! let store = InstrumentedStore::new(memory_store);
//! store.set("uid.utid", blob).await?;
//! println!("{:?}", CacheCounters::global().snapshot());
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::ops::compute::Op;
use moka::sync::Cache;
use tracing::debug;

use crate::counters::CacheCounters;
use crate::error::{StorageError, StorageResult};
use crate::store::BlobStore;
use crate::types::CacheBlob;

/// Keys whose last written length is remembered, unless configured otherwise.
pub const DEFAULT_LEDGER_CAPACITY: u64 = 100_000;

/// A store wrapper that records read/write/remove counters and latency.
///
/// Byte accounting keeps the invariant `bytes_added - bytes_removed` equal to
/// the total length of entries written through this wrapper and still
/// present. To account for overwrites it remembers the length of the last
/// blob it wrote for each key. That ledger is bounded: a key is forgotten
/// when a read misses, and the least used keys are evicted past the ledger
/// capacity. Size it from the backend's limits with
/// [`with_ledger`](Self::with_ledger).
///
/// Removal learns how many bytes it frees through [`BlobStore::peek_len`],
/// which stacked wrappers do not count as a read. That lookup and the
/// removal are not atomic: a concurrent write between them makes the size
/// counter drift.
pub struct InstrumentedStore<S: BlobStore> {
    /// The inner store implementation.
    inner: S,
    counters: Arc<CacheCounters>,
    /// Length of the last blob written per key.
    written: Cache<String, usize>,
}

fn ledger(capacity: u64, time_to_idle: Option<Duration>) -> Cache<String, usize> {
    let mut builder = Cache::<String, usize>::builder().max_capacity(capacity);
    if let Some(idle) = time_to_idle {
        builder = builder.time_to_idle(idle);
    }
    builder.build()
}

impl<S: BlobStore> InstrumentedStore<S> {
    /// Wrap `inner`, recording into the process-wide counters.
    pub fn new(inner: S) -> Self {
        Self::with_counters(inner, CacheCounters::global())
    }

    /// Wrap `inner`, recording into `counters`.
    pub fn with_counters(inner: S, counters: Arc<CacheCounters>) -> Self {
        Self {
            inner,
            counters,
            written: ledger(DEFAULT_LEDGER_CAPACITY, None),
        }
    }

    /// Bound the per-key length ledger to `capacity` keys, forgetting keys
    /// untouched for `time_to_idle`.
    #[must_use]
    pub fn with_ledger(mut self, capacity: u64, time_to_idle: Option<Duration>) -> Self {
        self.written = ledger(capacity, time_to_idle);
        self
    }

    /// Get a reference to the inner store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn counters(&self) -> &Arc<CacheCounters> {
        &self.counters
    }

    fn remember_len(&self, key: &str, len: usize) -> Option<usize> {
        if len == 0 {
            return self.written.remove(key);
        }
        let mut previous = None;
        let _ = self.written.entry(key.to_owned()).and_compute_with(|entry| {
            previous = entry.map(|e| e.into_value());
            Op::Put(len)
        });
        previous
    }

    fn record_failure(&self, operation: &'static str, error: &StorageError, started: Option<Instant>) {
        self.counters.record_error(
            self.inner.backend_name(),
            operation,
            error.category().as_str(),
            started.map(|s| s.elapsed()),
        );
    }
}

#[async_trait]
impl<S: BlobStore> BlobStore for InstrumentedStore<S> {
    async fn get(&self, key: &str) -> StorageResult<Option<CacheBlob>> {
        let started = Instant::now();
        let result = self.inner.get(key).await;
        match &result {
            Ok(blob) => {
                if blob.is_none() {
                    self.written.invalidate(key);
                }
                self.counters
                    .record_read(self.inner.backend_name(), started.elapsed(), blob.is_some());
            }
            Err(e) => self.record_failure("get", e, Some(started)),
        }
        result
    }

    async fn set(&self, key: &str, blob: CacheBlob) -> StorageResult<()> {
        let len = blob.len();
        let started = Instant::now();
        let result = self.inner.set(key, blob).await;
        match &result {
            Ok(()) => {
                let replaced = self.remember_len(key, len);
                self.counters.record_write(
                    self.inner.backend_name(),
                    started.elapsed(),
                    len,
                    replaced.unwrap_or(0),
                );
            }
            Err(e) => self.record_failure("set", e, Some(started)),
        }
        result
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        let current = match self.inner.peek_len(key).await {
            Ok(len) => len,
            Err(e) => {
                debug!(key = %key, error = %e, "size lookup before remove failed");
                None
            }
        };

        let result = self.inner.remove(key).await;
        match &result {
            Ok(()) => {
                let remembered = self.written.remove(key);
                let freed = current.or(remembered).unwrap_or(0);
                self.counters.record_remove(self.inner.backend_name(), freed);
            }
            Err(e) => self.record_failure("remove", e, None),
        }
        result
    }

    async fn refresh(&self, key: &str) -> StorageResult<()> {
        let result = self.inner.refresh(key).await;
        if let Err(e) = &result {
            self.record_failure("refresh", e, None);
        }
        result
    }

    async fn peek_len(&self, key: &str) -> StorageResult<Option<usize>> {
        self.inner.peek_len(key).await
    }

    fn backend_name(&self) -> &'static str {
        self.inner.backend_name()
    }
}
