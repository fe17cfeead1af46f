//! A stand-in for the authentication library, enough to drive the cache hooks.
//!
//! It implements no protocol. Sign-in always succeeds and returns an opaque
//! random token; the only behavior that matters is that it keeps tokens in an
//! in-memory cache object and raises before/after access notifications on it
//! exactly where a real public client library would.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokencache_provider::{
    Account, HandleId, LibraryError, ProviderError, TokenCacheAccessor, TokenCacheHandle,
    TokenCacheNotificationArgs, TokenCacheNotificationHook,
};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum AcquireError {
    /// No usable cached token; the caller must sign the user in.
    #[error("interaction required: {reason}")]
    InteractionRequired { reason: &'static str },

    #[error(transparent)]
    Cache(#[from] ProviderError),
}

/// Where the returned token came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenSource {
    Cache,
    IdentityProvider,
}

#[derive(Debug, Clone)]
pub struct AuthenticationResult {
    pub access_token: String,
    pub account: Account,
    pub expires_at: OffsetDateTime,
    pub source: TokenSource,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct CacheDocument {
    /// Keyed by home account id.
    accounts: BTreeMap<String, CachedAccount>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct CachedAccount {
    username: String,
    access_token: String,
    #[serde(with = "time::serde::timestamp")]
    expires_at: OffsetDateTime,
}

/// The library's in-memory token cache for one client instance.
pub struct SimulatedTokenCache {
    id: HandleId,
    document: Mutex<CacheDocument>,
    hook: RwLock<Option<Arc<dyn TokenCacheNotificationHook>>>,
}

impl SimulatedTokenCache {
    pub fn new() -> Self {
        Self {
            id: HandleId::next(),
            document: Mutex::new(CacheDocument::default()),
            hook: RwLock::new(None),
        }
    }

    fn hook(&self) -> Option<Arc<dyn TokenCacheNotificationHook>> {
        self.hook.read().clone()
    }

    pub fn account_count(&self) -> usize {
        self.document.lock().accounts.len()
    }
}

impl Default for SimulatedTokenCache {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenCacheAccessor for SimulatedTokenCache {
    fn serialize(&self) -> Result<Vec<u8>, LibraryError> {
        Ok(serde_json::to_vec(&*self.document.lock())?)
    }

    fn deserialize(&self, blob: Option<&[u8]>) -> Result<(), LibraryError> {
        let document = match blob {
            Some(bytes) if !bytes.is_empty() => serde_json::from_slice(bytes)?,
            _ => CacheDocument::default(),
        };
        *self.document.lock() = document;
        Ok(())
    }
}

impl TokenCacheHandle for SimulatedTokenCache {
    fn handle_id(&self) -> HandleId {
        self.id
    }

    fn set_notification_hook(&self, hook: Arc<dyn TokenCacheNotificationHook>) {
        *self.hook.write() = Some(hook);
    }
}

/// Issues accounts and tokens for test users.
pub struct SimulatedIdentityProvider {
    tenant_id: Uuid,
    token_lifetime: Duration,
    latency: Duration,
    sign_ins: AtomicU64,
}

impl SimulatedIdentityProvider {
    pub fn new(tenant_domain: &str, token_lifetime: Duration) -> Self {
        Self {
            tenant_id: Uuid::new_v5(&Uuid::NAMESPACE_DNS, tenant_domain.as_bytes()),
            token_lifetime,
            latency: Duration::ZERO,
            sign_ins: AtomicU64::new(0),
        }
    }

    /// Delay every sign-in, to model the cost the cache is saving.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Home account id of `username`, stable across processes.
    pub fn home_account_id(&self, username: &str) -> String {
        let object_id = Uuid::new_v5(&self.tenant_id, username.to_ascii_lowercase().as_bytes());
        format!("{object_id}.{}", self.tenant_id)
    }

    pub fn sign_ins(&self) -> u64 {
        self.sign_ins.load(Ordering::Relaxed)
    }

    async fn sign_in(&self, username: &str) -> (Account, String, OffsetDateTime) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.sign_ins.fetch_add(1, Ordering::Relaxed);
        let account = Account::new(self.home_account_id(username), username);
        let expires_at = OffsetDateTime::now_utc() + self.token_lifetime;
        (account, Uuid::new_v4().simple().to_string(), expires_at)
    }
}

/// A public client application with its own token cache.
pub struct SimulatedPublicClient {
    client_id: String,
    cache: Arc<SimulatedTokenCache>,
    identity_provider: Arc<SimulatedIdentityProvider>,
}

impl SimulatedPublicClient {
    pub fn new(client_id: impl Into<String>, identity_provider: Arc<SimulatedIdentityProvider>) -> Self {
        Self {
            client_id: client_id.into(),
            cache: Arc::new(SimulatedTokenCache::new()),
            identity_provider,
        }
    }

    pub fn user_token_cache(&self) -> &SimulatedTokenCache {
        &self.cache
    }

    /// Look up a cached account by its home id.
    pub async fn get_account(&self, home_account_id: &str) -> Result<Option<Account>, AcquireError> {
        let args = TokenCacheNotificationArgs::new(self.cache.as_ref(), &self.client_id)
            .with_suggested_key(home_account_id);
        self.notify_before(&args).await?;
        let account = self
            .cache
            .document
            .lock()
            .accounts
            .get(home_account_id)
            .map(|cached| Account::new(home_account_id, cached.username.clone()));
        self.notify_after(&args).await?;
        Ok(account)
    }

    /// Return a cached, unexpired token for `account`.
    pub async fn acquire_token_silent(
        &self,
        account: Option<&Account>,
    ) -> Result<AuthenticationResult, AcquireError> {
        let Some(account) = account else {
            return Err(AcquireError::InteractionRequired {
                reason: "no account",
            });
        };
        let args = TokenCacheNotificationArgs::new(self.cache.as_ref(), &self.client_id)
            .with_suggested_key(&account.home_account_id)
            .with_account(account);
        self.notify_before(&args).await?;

        let cached = self
            .cache
            .document
            .lock()
            .accounts
            .get(&account.home_account_id)
            .cloned();
        self.notify_after(&args).await?;

        match cached {
            Some(cached) if cached.expires_at > OffsetDateTime::now_utc() => Ok(AuthenticationResult {
                access_token: cached.access_token,
                account: account.clone(),
                expires_at: cached.expires_at,
                source: TokenSource::Cache,
            }),
            Some(_) => Err(AcquireError::InteractionRequired {
                reason: "token expired",
            }),
            None => Err(AcquireError::InteractionRequired {
                reason: "account not in cache",
            }),
        }
    }

    /// Sign `username` in and cache the new token.
    pub async fn acquire_token_by_username_password(
        &self,
        username: &str,
    ) -> Result<AuthenticationResult, AcquireError> {
        // The account is unknown until the identity provider answers, so the
        // before-access notification carries no key.
        let before = TokenCacheNotificationArgs::new(self.cache.as_ref(), &self.client_id);
        self.notify_before(&before).await?;

        let (account, access_token, expires_at) = self.identity_provider.sign_in(username).await;
        self.cache.document.lock().accounts.insert(
            account.home_account_id.clone(),
            CachedAccount {
                username: account.username.clone(),
                access_token: access_token.clone(),
                expires_at,
            },
        );

        let after = TokenCacheNotificationArgs::new(self.cache.as_ref(), &self.client_id)
            .with_suggested_key(&account.home_account_id)
            .with_account(&account)
            .with_state_changed(true);
        self.notify_after(&after).await?;

        Ok(AuthenticationResult {
            access_token,
            account,
            expires_at,
            source: TokenSource::IdentityProvider,
        })
    }

    async fn notify_before(&self, args: &TokenCacheNotificationArgs<'_>) -> Result<(), AcquireError> {
        if let Some(hook) = self.cache.hook() {
            hook.before_access(args).await?;
        }
        Ok(())
    }

    async fn notify_after(&self, args: &TokenCacheNotificationArgs<'_>) -> Result<(), AcquireError> {
        if let Some(hook) = self.cache.hook() {
            hook.after_access(args).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokencache_memory::MemoryBlobStore;
    use tokencache_provider::CacheProvider;

    fn identity_provider() -> Arc<SimulatedIdentityProvider> {
        Arc::new(SimulatedIdentityProvider::new(
            "contoso.onmicrosoft.com",
            Duration::from_secs(3600),
        ))
    }

    #[test]
    fn test_home_account_id_is_stable() {
        let idp = identity_provider();
        let other = identity_provider();
        assert_eq!(
            idp.home_account_id("MIWTestUser1@contoso.onmicrosoft.com"),
            other.home_account_id("miwtestuser1@contoso.onmicrosoft.com")
        );
        assert_ne!(
            idp.home_account_id("MIWTestUser1@contoso.onmicrosoft.com"),
            idp.home_account_id("MIWTestUser2@contoso.onmicrosoft.com")
        );
    }

    #[test]
    fn test_cache_document_round_trips_through_accessor() {
        let cache = SimulatedTokenCache::new();
        cache.document.lock().accounts.insert(
            "oid.tid".to_string(),
            CachedAccount {
                username: "user@contoso.com".to_string(),
                access_token: "token".to_string(),
                expires_at: OffsetDateTime::from_unix_timestamp(4_000_000_000).unwrap(),
            },
        );
        let bytes = cache.serialize().unwrap();

        let restored = SimulatedTokenCache::new();
        restored.deserialize(Some(&bytes)).unwrap();
        assert_eq!(*restored.document.lock(), *cache.document.lock());

        restored.deserialize(None).unwrap();
        assert_eq!(restored.account_count(), 0);
        assert!(restored.deserialize(Some(b"{not json")).is_err());
    }

    #[tokio::test]
    async fn test_token_served_from_persisted_cache_by_new_client() {
        let idp = identity_provider();
        let provider = Arc::new(CacheProvider::new(MemoryBlobStore::default()));

        let first = SimulatedPublicClient::new("client", idp.clone());
        provider.initialize(first.user_token_cache());
        let signed_in = first
            .acquire_token_by_username_password("MIWTestUser1@contoso.onmicrosoft.com")
            .await
            .unwrap();
        assert_eq!(signed_in.source, TokenSource::IdentityProvider);

        let second = SimulatedPublicClient::new("client", idp.clone());
        provider.initialize(second.user_token_cache());
        let account = second
            .get_account(&signed_in.account.home_account_id)
            .await
            .unwrap();
        assert_eq!(account.as_ref(), Some(&signed_in.account));

        let silent = second.acquire_token_silent(account.as_ref()).await.unwrap();
        assert_eq!(silent.source, TokenSource::Cache);
        assert_eq!(silent.access_token, signed_in.access_token);
        assert_eq!(idp.sign_ins(), 1);
    }

    #[tokio::test]
    async fn test_silent_without_persistence_requires_interaction() {
        let idp = identity_provider();
        let client = SimulatedPublicClient::new("client", idp.clone());
        let account = Account::new(idp.home_account_id("u@contoso.com"), "u@contoso.com");

        let err = client.acquire_token_silent(Some(&account)).await.unwrap_err();
        assert!(matches!(err, AcquireError::InteractionRequired { .. }));
        let err = client.acquire_token_silent(None).await.unwrap_err();
        assert!(matches!(err, AcquireError::InteractionRequired { reason: "no account" }));
    }

    #[tokio::test]
    async fn test_expired_token_requires_interaction() {
        let idp = Arc::new(SimulatedIdentityProvider::new("contoso.com", Duration::ZERO));
        let provider = Arc::new(CacheProvider::new(MemoryBlobStore::default()));
        let client = SimulatedPublicClient::new("client", idp);
        provider.initialize(client.user_token_cache());

        let result = client
            .acquire_token_by_username_password("u@contoso.com")
            .await
            .unwrap();
        let err = client
            .acquire_token_silent(Some(&result.account))
            .await
            .unwrap_err();
        assert!(matches!(err, AcquireError::InteractionRequired { reason: "token expired" }));
    }
}
