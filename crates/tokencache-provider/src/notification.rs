//! The notification contract between an authentication library and the provider.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{LibraryError, ProviderResult};

/// A signed-in principal as reported by the library.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Account {
    /// Stable identifier of the account across sessions (`"{oid}.{tid}"`).
    pub home_account_id: String,
    /// Sign-in name, for example `user@contoso.com`.
    pub username: String,
}

impl Account {
    pub fn new(home_account_id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            home_account_id: home_account_id.into(),
            username: username.into(),
        }
    }
}

/// Access to the library's in-memory cache contents.
pub trait TokenCacheAccessor: Send + Sync {
    /// Serialize the whole in-memory cache.
    fn serialize(&self) -> Result<Vec<u8>, LibraryError>;

    /// Replace the in-memory cache. `None` leaves the cache empty.
    fn deserialize(&self, blob: Option<&[u8]>) -> Result<(), LibraryError>;
}

/// Arguments of one before/after access notification.
pub struct TokenCacheNotificationArgs<'a> {
    pub token_cache: &'a dyn TokenCacheAccessor,
    pub client_id: &'a str,
    pub suggested_cache_key: Option<&'a str>,
    pub account: Option<&'a Account>,
    /// Set on after-access notifications when the library modified the cache.
    pub has_state_changed: bool,
    /// `true` for the application (client credential) cache.
    pub is_application_cache: bool,
}

impl<'a> TokenCacheNotificationArgs<'a> {
    pub fn new(token_cache: &'a dyn TokenCacheAccessor, client_id: &'a str) -> Self {
        Self {
            token_cache,
            client_id,
            suggested_cache_key: None,
            account: None,
            has_state_changed: false,
            is_application_cache: false,
        }
    }

    #[must_use]
    pub fn with_suggested_key(mut self, key: &'a str) -> Self {
        self.suggested_cache_key = Some(key);
        self
    }

    #[must_use]
    pub fn with_account(mut self, account: &'a Account) -> Self {
        self.account = Some(account);
        self
    }

    #[must_use]
    pub fn with_state_changed(mut self, changed: bool) -> Self {
        self.has_state_changed = changed;
        self
    }

    #[must_use]
    pub fn application_cache(mut self) -> Self {
        self.is_application_cache = true;
        self
    }
}

impl fmt::Debug for TokenCacheNotificationArgs<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCacheNotificationArgs")
            .field("client_id", &self.client_id)
            .field("suggested_cache_key", &self.suggested_cache_key)
            .field("account", &self.account)
            .field("has_state_changed", &self.has_state_changed)
            .field("is_application_cache", &self.is_application_cache)
            .finish_non_exhaustive()
    }
}

/// Callbacks the library invokes around every cache access.
///
/// An error returned from a hook fails the library operation that triggered it.
#[async_trait]
pub trait TokenCacheNotificationHook: Send + Sync {
    async fn before_access(&self, args: &TokenCacheNotificationArgs<'_>) -> ProviderResult<()>;

    async fn after_access(&self, args: &TokenCacheNotificationArgs<'_>) -> ProviderResult<()>;
}

/// Process-unique identity of a library cache object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(u64);

impl HandleId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A library cache object that accepts a notification hook.
pub trait TokenCacheHandle: Send + Sync {
    fn handle_id(&self) -> HandleId;

    /// Install `hook`, replacing any hook set before.
    fn set_notification_hook(&self, hook: Arc<dyn TokenCacheNotificationHook>);
}
