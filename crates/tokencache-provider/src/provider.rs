//! CacheProvider - loads and saves library token caches around each access.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashSet;
use serde::{Deserialize, Serialize};
use tokencache_core::{BlobStore, CacheBlob, PartitionKey, StorageError};
use tracing::{debug, warn};

use crate::error::{ProviderError, ProviderResult};
use crate::key::derive_partition_key;
use crate::notification::{
    Account, HandleId, TokenCacheHandle, TokenCacheNotificationArgs, TokenCacheNotificationHook,
};

/// What the provider does when the backing store fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageFailureMode {
    /// Return the error to the library, failing the token operation.
    #[default]
    Propagate,
    /// Log the error, treat a failed read as a miss and skip a failed write.
    Degrade,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderOptions {
    pub failure_mode: StorageFailureMode,
}

/// Told which partition key an account's cache was persisted under.
#[async_trait]
pub trait AccountKeyListener: Send + Sync {
    async fn on_account_persisted(&self, account: &Account, key: &PartitionKey);
}

/// Persists library token caches to a [`BlobStore`], one partition per principal.
///
/// The provider is shared across all library cache objects of a process;
/// register it on each with [`initialize`](Self::initialize).
pub struct CacheProvider<S: BlobStore> {
    store: S,
    options: ProviderOptions,
    listener: Option<Arc<dyn AccountKeyListener>>,
    registered: DashSet<HandleId>,
}

impl<S: BlobStore + 'static> CacheProvider<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            options: ProviderOptions::default(),
            listener: None,
            registered: DashSet::new(),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: ProviderOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn with_account_listener(mut self, listener: Arc<dyn AccountKeyListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn options(&self) -> &ProviderOptions {
        &self.options
    }

    /// Register this provider's hooks on `handle`.
    ///
    /// Returns `false` if the handle was already registered, in which case
    /// nothing is changed.
    pub fn initialize(self: &Arc<Self>, handle: &dyn TokenCacheHandle) -> bool {
        let id = handle.handle_id();
        if !self.registered.insert(id) {
            debug!(handle = %id, "token cache handle already initialized");
            return false;
        }
        let hook: Arc<dyn TokenCacheNotificationHook> = Arc::clone(self) as _;
        handle.set_notification_hook(hook);
        debug!(handle = %id, backend = self.store.backend_name(), "token cache handle initialized");
        true
    }

    /// Forget `handle` once the library cache object is dropped.
    pub fn release(&self, handle: HandleId) {
        self.registered.remove(&handle);
    }

    pub fn registered_handles(&self) -> usize {
        self.registered.len()
    }

    /// Evict one partition, for example on sign-out.
    ///
    /// # Errors
    ///
    /// Storage errors are always returned, whatever the failure mode.
    pub async fn remove_key(&self, key: &PartitionKey) -> ProviderResult<()> {
        self.store.remove(key.as_str()).await?;
        debug!(key = %key, "token cache partition removed");
        Ok(())
    }

    /// Evict the partition of `account`. Returns `false` if the account has
    /// no usable home id.
    ///
    /// # Errors
    ///
    /// Storage errors are always returned, whatever the failure mode.
    pub async fn remove_account(&self, account: &Account) -> ProviderResult<bool> {
        let Some(key) = PartitionKey::new(account.home_account_id.as_str()) else {
            debug!(username = %account.username, "account has no home id, nothing to remove");
            return Ok(false);
        };
        self.remove_key(&key).await?;
        Ok(true)
    }

    async fn load(&self, key: &PartitionKey) -> ProviderResult<Option<CacheBlob>> {
        match self.store.get(key.as_str()).await {
            Ok(blob) => Ok(blob),
            Err(e) => self.on_storage_failure("read", key, e).map(|()| None),
        }
    }

    async fn save(&self, key: &PartitionKey, blob: CacheBlob) -> ProviderResult<bool> {
        match self.store.set(key.as_str(), blob).await {
            Ok(()) => Ok(true),
            Err(e) => self.on_storage_failure("write", key, e).map(|()| false),
        }
    }

    fn on_storage_failure(
        &self,
        operation: &'static str,
        key: &PartitionKey,
        error: StorageError,
    ) -> ProviderResult<()> {
        match self.options.failure_mode {
            StorageFailureMode::Propagate => Err(error.into()),
            StorageFailureMode::Degrade => {
                warn!(key = %key, operation, error = %error, "token cache store failed, continuing without it");
                Ok(())
            }
        }
    }
}

#[async_trait]
impl<S: BlobStore + 'static> TokenCacheNotificationHook for CacheProvider<S> {
    async fn before_access(&self, args: &TokenCacheNotificationArgs<'_>) -> ProviderResult<()> {
        let Some(key) = derive_partition_key(args) else {
            debug!(client_id = %args.client_id, "no partition key before access, skipping load");
            return Ok(());
        };

        match self.load(&key).await? {
            Some(blob) => {
                args.token_cache
                    .deserialize(Some(blob.as_bytes()))
                    .map_err(|source| ProviderError::library(key.clone(), source))?;
                debug!(key = %key, len = blob.len(), "token cache loaded");
            }
            None => {
                args.token_cache
                    .deserialize(None)
                    .map_err(|source| ProviderError::library(key.clone(), source))?;
                debug!(key = %key, "no persisted token cache");
            }
        }
        Ok(())
    }

    async fn after_access(&self, args: &TokenCacheNotificationArgs<'_>) -> ProviderResult<()> {
        if !args.has_state_changed {
            return Ok(());
        }
        let Some(key) = derive_partition_key(args) else {
            warn!(
                client_id = %args.client_id,
                "token cache changed but no partition key could be derived, not persisting"
            );
            return Ok(());
        };

        let bytes = args
            .token_cache
            .serialize()
            .map_err(|source| ProviderError::library(key.clone(), source))?;
        let len = bytes.len();
        if !self.save(&key, CacheBlob::from(bytes)).await? {
            return Ok(());
        }
        debug!(key = %key, len, "token cache persisted");

        if let (Some(account), Some(listener)) = (args.account, &self.listener) {
            listener.on_account_persisted(account, &key).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LibraryError;
    use crate::notification::TokenCacheAccessor;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokencache_core::StorageResult;
    use tokencache_memory::MemoryBlobStore;

    /// Library cache double holding raw bytes.
    #[derive(Default)]
    struct FakeCache {
        id: Option<HandleId>,
        state: Mutex<Option<Vec<u8>>>,
        hooks_set: AtomicUsize,
    }

    impl FakeCache {
        fn with_state(bytes: &[u8]) -> Self {
            Self {
                state: Mutex::new(Some(bytes.to_vec())),
                ..Default::default()
            }
        }

        fn with_id() -> Self {
            Self {
                id: Some(HandleId::next()),
                ..Default::default()
            }
        }

        fn state(&self) -> Option<Vec<u8>> {
            self.state.lock().clone()
        }
    }

    impl TokenCacheAccessor for FakeCache {
        fn serialize(&self) -> Result<Vec<u8>, LibraryError> {
            Ok(self.state.lock().clone().unwrap_or_default())
        }

        fn deserialize(&self, blob: Option<&[u8]>) -> Result<(), LibraryError> {
            if blob == Some(b"corrupt".as_slice()) {
                return Err("unexpected end of cache document".into());
            }
            *self.state.lock() = blob.map(<[u8]>::to_vec);
            Ok(())
        }
    }

    impl TokenCacheHandle for FakeCache {
        fn handle_id(&self) -> HandleId {
            self.id.unwrap_or_else(HandleId::next)
        }

        fn set_notification_hook(&self, _hook: Arc<dyn TokenCacheNotificationHook>) {
            self.hooks_set.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct UnavailableStore;

    #[async_trait]
    impl BlobStore for UnavailableStore {
        async fn get(&self, _key: &str) -> StorageResult<Option<CacheBlob>> {
            Err(StorageError::unavailable("connection refused"))
        }

        async fn set(&self, _key: &str, _blob: CacheBlob) -> StorageResult<()> {
            Err(StorageError::unavailable("connection refused"))
        }

        async fn remove(&self, _key: &str) -> StorageResult<()> {
            Err(StorageError::unavailable("connection refused"))
        }

        async fn refresh(&self, _key: &str) -> StorageResult<()> {
            Err(StorageError::unavailable("connection refused"))
        }

        fn backend_name(&self) -> &'static str {
            "unavailable"
        }
    }

    #[derive(Default)]
    struct RecordingListener {
        seen: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl AccountKeyListener for RecordingListener {
        async fn on_account_persisted(&self, account: &Account, key: &PartitionKey) {
            self.seen
                .lock()
                .push((account.username.clone(), key.to_string()));
        }
    }

    fn memory_provider() -> CacheProvider<MemoryBlobStore> {
        CacheProvider::new(MemoryBlobStore::default())
    }

    #[tokio::test]
    async fn test_after_access_writes_under_derived_keys() {
        let provider = memory_provider();
        let account = Account::new("acctB", "user1@contoso.com");

        let cache = FakeCache::with_state(b"blob-1");
        let args = TokenCacheNotificationArgs::new(&cache, "client")
            .with_suggested_key("partA")
            .with_account(&account)
            .with_state_changed(true);
        provider.after_access(&args).await.unwrap();

        let cache = FakeCache::with_state(b"blob-2");
        let args = TokenCacheNotificationArgs::new(&cache, "client")
            .with_account(&account)
            .with_state_changed(true);
        provider.after_access(&args).await.unwrap();

        let cache = FakeCache::with_state(b"blob-3");
        let args = TokenCacheNotificationArgs::new(&cache, "client").with_state_changed(true);
        provider.after_access(&args).await.unwrap();

        let store = provider.store();
        assert_eq!(
            store.get("partA").await.unwrap(),
            Some(CacheBlob::from(b"blob-1".to_vec()))
        );
        assert_eq!(
            store.get("acctB").await.unwrap(),
            Some(CacheBlob::from(b"blob-2".to_vec()))
        );
        store.run_pending_tasks().await;
        assert_eq!(store.entry_count(), 2);
    }

    #[tokio::test]
    async fn test_after_access_ignores_unchanged_state() {
        let provider = memory_provider();
        let cache = FakeCache::with_state(b"blob");
        let args = TokenCacheNotificationArgs::new(&cache, "client").with_suggested_key("partA");
        provider.after_access(&args).await.unwrap();
        assert_eq!(provider.store().get("partA").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_before_access_hydrates_library_cache() {
        let provider = memory_provider();
        provider
            .store()
            .set("acctB", CacheBlob::from(b"persisted".to_vec()))
            .await
            .unwrap();
        let account = Account::new("acctB", "user1@contoso.com");

        let cache = FakeCache::default();
        let args = TokenCacheNotificationArgs::new(&cache, "client").with_account(&account);
        provider.before_access(&args).await.unwrap();
        assert_eq!(cache.state(), Some(b"persisted".to_vec()));
    }

    #[tokio::test]
    async fn test_before_access_miss_leaves_cache_empty() {
        let provider = memory_provider();
        let cache = FakeCache::with_state(b"stale");
        let args = TokenCacheNotificationArgs::new(&cache, "client").with_suggested_key("cold");
        provider.before_access(&args).await.unwrap();
        assert_eq!(cache.state(), None);
    }

    #[tokio::test]
    async fn test_before_access_without_key_is_untouched() {
        let provider = memory_provider();
        let cache = FakeCache::with_state(b"in-memory");
        let args = TokenCacheNotificationArgs::new(&cache, "client");
        provider.before_access(&args).await.unwrap();
        assert_eq!(cache.state(), Some(b"in-memory".to_vec()));
    }

    #[tokio::test]
    async fn test_corrupt_blob_returns_library_error() {
        let provider = memory_provider();
        provider
            .store()
            .set("partA", CacheBlob::from(b"corrupt".to_vec()))
            .await
            .unwrap();

        let cache = FakeCache::default();
        let args = TokenCacheNotificationArgs::new(&cache, "client").with_suggested_key("partA");
        let err = provider.before_access(&args).await.unwrap_err();
        assert!(matches!(err, ProviderError::Library { ref key, .. } if key.as_str() == "partA"));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_store_failure_propagates_by_default() {
        let provider = CacheProvider::new(UnavailableStore);
        let cache = FakeCache::with_state(b"blob");
        let args = TokenCacheNotificationArgs::new(&cache, "client")
            .with_suggested_key("partA")
            .with_state_changed(true);

        let err = provider.before_access(&args).await.unwrap_err();
        assert!(matches!(err, ProviderError::Storage(StorageError::Unavailable { .. })));
        assert!(err.is_transient());
        assert!(provider.after_access(&args).await.is_err());
    }

    #[tokio::test]
    async fn test_store_failure_degrades_when_configured() {
        let listener = Arc::new(RecordingListener::default());
        let provider = CacheProvider::new(UnavailableStore)
            .with_options(ProviderOptions {
                failure_mode: StorageFailureMode::Degrade,
            })
            .with_account_listener(listener.clone());
        let account = Account::new("acctB", "user1@contoso.com");
        let cache = FakeCache::with_state(b"blob");
        let args = TokenCacheNotificationArgs::new(&cache, "client")
            .with_account(&account)
            .with_state_changed(true);

        provider.before_access(&args).await.unwrap();
        assert_eq!(cache.state(), None);
        provider.after_access(&args).await.unwrap();
        assert!(listener.seen.lock().is_empty());
        assert!(provider.remove_key(&PartitionKey::new("acctB").unwrap()).await.is_err());
    }

    #[tokio::test]
    async fn test_listener_receives_persisted_accounts() {
        let listener = Arc::new(RecordingListener::default());
        let provider = memory_provider().with_account_listener(listener.clone());
        let account = Account::new("oid.tid", "MIWTestUser3@contoso.com");

        let cache = FakeCache::with_state(b"blob");
        let args = TokenCacheNotificationArgs::new(&cache, "client")
            .with_account(&account)
            .with_state_changed(true);
        provider.after_access(&args).await.unwrap();

        let app_cache = FakeCache::with_state(b"app");
        let args = TokenCacheNotificationArgs::new(&app_cache, "client")
            .application_cache()
            .with_state_changed(true);
        provider.after_access(&args).await.unwrap();

        assert_eq!(
            *listener.seen.lock(),
            vec![("MIWTestUser3@contoso.com".to_string(), "oid.tid".to_string())]
        );
        assert!(
            provider
                .store()
                .get("client_AppTokenCache")
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent_per_handle() {
        let provider = Arc::new(memory_provider());
        let cache = FakeCache::with_id();

        assert!(provider.initialize(&cache));
        assert!(!provider.initialize(&cache));
        assert_eq!(cache.hooks_set.load(Ordering::SeqCst), 1);

        provider.release(cache.handle_id());
        assert_eq!(provider.registered_handles(), 0);
    }

    #[tokio::test]
    async fn test_remove_account_evicts_partition() {
        let provider = memory_provider();
        provider
            .store()
            .set("acctB", CacheBlob::from(b"blob".to_vec()))
            .await
            .unwrap();

        assert!(provider.remove_account(&Account::new("acctB", "u")).await.unwrap());
        assert!(!provider.remove_account(&Account::new("", "u")).await.unwrap());
        assert_eq!(provider.store().get("acctB").await.unwrap(), None);
    }
}
