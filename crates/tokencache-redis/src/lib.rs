//! Redis-backed [`BlobStore`](tokencache_core::BlobStore).
//!
//! Each partition is stored as a hash holding the blob and its expiration
//! settings, so the sliding window can be re-applied on every read without
//! extending past the absolute deadline:
//!
//! | field    | value                                             |
//! |----------|---------------------------------------------------|
//! | `data`   | the serialized token cache                        |
//! | `absexp` | absolute deadline in epoch milliseconds, or `-1`  |
//! | `sldexp` | sliding window in milliseconds, or `-1`           |
//!
//! Connections come from a `deadpool-redis` pool; no lock is held across a
//! network call.

mod options;
mod store;

pub use options::RedisStoreOptions;
pub use store::RedisBlobStore;
