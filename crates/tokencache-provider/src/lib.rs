//! Persistence hooks for an authentication library's token cache.
//!
//! The library raises a notification before and after every access to its
//! in-memory token cache. [`CacheProvider`] answers those notifications by
//! loading the serialized cache for the current partition from a
//! [`BlobStore`](tokencache_core::BlobStore) and saving it back when the
//! library reports a change.
//!
//! ## Partition keys
//!
//! The key for a notification is, in order of preference:
//!
//! 1. the key suggested by the library,
//! 2. the home account identifier of the account in context,
//! 3. `"{client_id}_AppTokenCache"` for application (client credential) caches.
//!
//! When none applies nothing is read or written.

mod error;
mod key;
mod notification;
mod provider;

pub use error::{LibraryError, ProviderError, ProviderResult};
pub use key::{APP_CACHE_KEY_SUFFIX, app_partition_key, derive_partition_key};
pub use notification::{
    Account, HandleId, TokenCacheAccessor, TokenCacheHandle, TokenCacheNotificationArgs,
    TokenCacheNotificationHook,
};
pub use provider::{AccountKeyListener, CacheProvider, ProviderOptions, StorageFailureMode};
