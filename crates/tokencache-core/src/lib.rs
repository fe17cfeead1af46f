//! Core building blocks for persisting serialized token caches.
//!
//! This crate defines the pieces every backend and consumer share:
//!
//! - [`BlobStore`]: the async storage boundary (get / set / remove / refresh)
//! - [`PartitionKey`] and [`CacheBlob`]: the key and opaque payload types
//! - [`StorageError`]: the error taxonomy of backing stores
//! - [`InstrumentedStore`] and [`TracedStore`]: stackable decorators
//! - [`CacheCounters`]: process-wide operation counters
//!
//! Backends live in their own crates (`tokencache-memory`, `tokencache-redis`).

mod counters;
mod error;
mod instrumented;
pub mod metrics;
mod store;
mod traced;
mod types;

pub use counters::{CacheCounters, CounterSnapshot};
pub use error::{ErrorCategory, StorageError, StorageResult};
pub use instrumented::{DEFAULT_LEDGER_CAPACITY, InstrumentedStore};
pub use store::{BlobStore, validate_key};
pub use traced::TracedStore;
pub use types::{CacheBlob, ExpirationPolicy, PartitionKey};
