//! Load driver: repeatedly acquires tokens for a range of test users.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures_util::StreamExt;
use futures_util::stream;
use serde::Serialize;
use tokencache_core::BlobStore;
use tokencache_provider::{Account, CacheProvider, TokenCacheHandle};
use tracing::{debug, info, warn};

use crate::config::HarnessConfig;
use crate::registry::KeyMappingRegistry;
use crate::simulation::{
    AcquireError, AuthenticationResult, SimulatedIdentityProvider, SimulatedPublicClient,
    TokenSource,
};

/// Outcome counts of one or more iterations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub requests: u64,
    pub served_from_cache: u64,
    pub sign_ins: u64,
    pub failures: u64,
    pub elapsed: Duration,
}

impl RunSummary {
    fn absorb(&mut self, other: &RunSummary) {
        self.requests += other.requests;
        self.served_from_cache += other.served_from_cache;
        self.sign_ins += other.sign_ins;
        self.failures += other.failures;
        self.elapsed += other.elapsed;
    }
}

#[derive(Default)]
struct Tally {
    requests: AtomicU64,
    served_from_cache: AtomicU64,
    sign_ins: AtomicU64,
    failures: AtomicU64,
}

impl Tally {
    fn summary(&self, elapsed: Duration) -> RunSummary {
        RunSummary {
            requests: self.requests.load(Ordering::Relaxed),
            served_from_cache: self.served_from_cache.load(Ordering::Relaxed),
            sign_ins: self.sign_ins.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            elapsed,
        }
    }
}

/// Drives token acquisitions for `users_start_index..=users_end_index`.
pub struct TestRunner<S: BlobStore + 'static> {
    settings: HarnessConfig,
    provider: Arc<CacheProvider<S>>,
    registry: Arc<KeyMappingRegistry>,
    identity_provider: Arc<SimulatedIdentityProvider>,
    /// Home account id per user ordinal, learned from the registry or sign-ins.
    known_accounts: DashMap<u32, String>,
}

impl<S: BlobStore + 'static> TestRunner<S> {
    pub fn new(
        settings: HarnessConfig,
        provider: Arc<CacheProvider<S>>,
        registry: Arc<KeyMappingRegistry>,
        identity_provider: Arc<SimulatedIdentityProvider>,
    ) -> Self {
        Self {
            settings,
            provider,
            registry,
            identity_provider,
            known_accounts: DashMap::new(),
        }
    }

    /// Seed known accounts from the registry. Returns how many were found.
    pub fn seed_from_registry(&self) -> usize {
        let mappings = self.registry.all_mappings();
        for (ordinal, key) in &mappings {
            self.known_accounts.insert(*ordinal, key.to_string());
        }
        info!(known = mappings.len(), "seeded known accounts from key mappings");
        mappings.len()
    }

    pub fn known_accounts(&self) -> usize {
        self.known_accounts.len()
    }

    /// Run every configured iteration and return the combined summary.
    pub async fn run(&self) -> RunSummary {
        let mut total = RunSummary::default();
        for iteration in 1..=self.settings.iterations {
            let summary = self.run_iteration().await;
            info!(
                iteration,
                requests = summary.requests,
                from_cache = summary.served_from_cache,
                sign_ins = summary.sign_ins,
                failures = summary.failures,
                elapsed_ms = summary.elapsed.as_millis() as u64,
                "iteration complete"
            );
            total.absorb(&summary);
        }
        total
    }

    /// One pass over the user range, at most `concurrency` users at a time.
    pub async fn run_iteration(&self) -> RunSummary {
        let tally = Tally::default();
        let started = Instant::now();
        let ordinals = self.settings.users_start_index..=self.settings.users_end_index;

        stream::iter(ordinals)
            .for_each_concurrent(self.settings.concurrency, |ordinal| {
                let tally = &tally;
                async move {
                    tally.requests.fetch_add(1, Ordering::Relaxed);
                    match self.acquire_token(ordinal).await {
                        Ok(result) if result.source == TokenSource::Cache => {
                            tally.served_from_cache.fetch_add(1, Ordering::Relaxed);
                        }
                        Ok(_) => {
                            tally.sign_ins.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            tally.failures.fetch_add(1, Ordering::Relaxed);
                            warn!(ordinal, error = %e, "token acquisition failed");
                        }
                    }
                }
            })
            .await;

        tally.summary(started.elapsed())
    }

    /// Silent acquisition for a known account, falling back to sign-in.
    async fn acquire_token(&self, ordinal: u32) -> Result<AuthenticationResult, AcquireError> {
        let client = SimulatedPublicClient::new(
            self.settings.client_id.as_str(),
            Arc::clone(&self.identity_provider),
        );
        let handle = client.user_token_cache();
        self.provider.initialize(handle);

        let result = self.acquire_with(&client, ordinal).await;
        self.provider.release(handle.handle_id());
        result
    }

    async fn acquire_with(
        &self,
        client: &SimulatedPublicClient,
        ordinal: u32,
    ) -> Result<AuthenticationResult, AcquireError> {
        let home_account_id = self.known_accounts.get(&ordinal).map(|id| id.value().clone());
        let account: Option<Account> = match home_account_id {
            Some(id) => client.get_account(&id).await?,
            None => None,
        };

        match client.acquire_token_silent(account.as_ref()).await {
            Ok(result) => Ok(result),
            Err(AcquireError::InteractionRequired { reason }) => {
                debug!(ordinal, reason, "silent acquisition failed, signing in");
                let username = self.registry.naming().username(ordinal);
                let result = client.acquire_token_by_username_password(&username).await?;
                self.known_accounts
                    .insert(ordinal, result.account.home_account_id.clone());
                Ok(result)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{MemoryMarkerStore, UserNaming};
    use tokencache_core::{CacheCounters, InstrumentedStore};
    use tokencache_memory::MemoryBlobStore;

    fn settings(start: u32, end: u32, iterations: u32) -> HarnessConfig {
        HarnessConfig {
            users_start_index: start,
            users_end_index: end,
            iterations,
            concurrency: 4,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_second_iteration_served_from_cache() {
        let settings = settings(1, 5, 2);
        let registry = Arc::new(KeyMappingRegistry::new(
            Arc::new(MemoryMarkerStore::new()),
            UserNaming::new(settings.user_prefix.clone(), settings.tenant_domain.clone()),
        ));
        let counters = Arc::new(CacheCounters::new());
        let store = InstrumentedStore::with_counters(MemoryBlobStore::default(), counters.clone());
        let provider = Arc::new(CacheProvider::new(store).with_account_listener(registry.clone()));
        let idp = Arc::new(SimulatedIdentityProvider::new(
            &settings.tenant_domain,
            settings.token_lifetime,
        ));
        let runner = TestRunner::new(settings, provider.clone(), registry.clone(), idp.clone());

        let first = runner.run_iteration().await;
        assert_eq!(first.requests, 5);
        assert_eq!(first.sign_ins, 5);
        assert_eq!(first.served_from_cache, 0);

        let second = runner.run_iteration().await;
        assert_eq!(second.served_from_cache, 5);
        assert_eq!(second.failures, 0);
        assert_eq!(idp.sign_ins(), 5);

        assert_eq!(registry.len(), 5);
        assert_eq!(provider.registered_handles(), 0);
        let snapshot = counters.snapshot();
        assert_eq!(snapshot.writes, 5);
        assert!(snapshot.reads >= 10);
    }
}
