//! Load-test harness for the tokencache persistence layer.
//!
//! Wires the configured blob store, the instrumentation decorators, the cache
//! provider and the key-mapping registry together and drives them with a
//! simulated authentication library.

pub mod config;
pub mod metrics;
pub mod observability;
pub mod registry;
pub mod runner;
pub mod simulation;

use std::sync::Arc;

use tokencache_core::{
    BlobStore, DEFAULT_LEDGER_CAPACITY, InstrumentedStore, StorageError, TracedStore,
};
use tokencache_memory::MemoryBlobStore;
use tokencache_provider::{CacheProvider, ProviderOptions};
use tokencache_redis::RedisBlobStore;

use crate::config::{AppConfig, StoreBackend};
use crate::registry::{
    DirectoryMarkerStore, KeyMappingRegistry, MarkerStore, MemoryMarkerStore, RegistryError,
    UserNaming,
};

pub use config::loader::load_config;
pub use runner::{RunSummary, TestRunner};

/// The store stack the provider talks to.
pub type HarnessStore = InstrumentedStore<Arc<dyn BlobStore>>;

/// Create the backing store selected by `config.store.backend`.
///
/// # Errors
///
/// For Redis, returns `StorageError::Configuration` if the pool cannot be
/// built and `StorageError::Unavailable` if the server does not answer.
pub async fn create_blob_store(config: &AppConfig) -> Result<Arc<dyn BlobStore>, StorageError> {
    match config.store.backend {
        StoreBackend::Memory => {
            tracing::info!("Using in-memory token cache store");
            Ok(Arc::new(MemoryBlobStore::new(&config.memory)))
        }
        StoreBackend::Redis => {
            tracing::info!(url = %config.redis.url, "Connecting to Redis");
            let store = RedisBlobStore::connect(&config.redis)?;
            store.ping().await?;
            tracing::info!("Connected to Redis successfully");
            Ok(Arc::new(store))
        }
    }
}

/// Wrap `store` in the configured decorators, outermost instrumentation.
///
/// The size ledger follows the backend's bounds: entry count and idle
/// window for memory, idle window only for Redis.
pub fn instrument_store(config: &AppConfig, store: Arc<dyn BlobStore>) -> HarnessStore {
    let (capacity, idle) = match config.store.backend {
        StoreBackend::Memory => (config.memory.max_entries, config.memory.sliding_expiration),
        StoreBackend::Redis => (DEFAULT_LEDGER_CAPACITY, config.redis.sliding_expiration),
    };
    let store: Arc<dyn BlobStore> = if config.store.traced {
        Arc::new(TracedStore::new(store))
    } else {
        store
    };
    InstrumentedStore::new(store).with_ledger(capacity, idle)
}

/// Build the key-mapping registry and load existing mappings.
pub async fn create_registry(config: &AppConfig) -> Result<KeyMappingRegistry, RegistryError> {
    let naming = UserNaming::new(
        config.harness.user_prefix.clone(),
        config.harness.tenant_domain.clone(),
    );
    let markers: Arc<dyn MarkerStore> = match &config.harness.mapping_dir {
        Some(dir) => {
            tracing::info!(dir = %dir.display(), "Using durable key mappings");
            Arc::new(DirectoryMarkerStore::open(dir.clone()).await?)
        }
        None => Arc::new(MemoryMarkerStore::new()),
    };
    let registry = KeyMappingRegistry::new(markers, naming);
    registry.load().await?;
    Ok(registry)
}

/// Build the provider over `store`, reporting persisted accounts to `registry`.
pub fn create_provider<S: BlobStore + 'static>(
    config: &AppConfig,
    store: S,
    registry: Arc<KeyMappingRegistry>,
) -> Arc<CacheProvider<S>> {
    let provider = CacheProvider::new(store)
        .with_options(ProviderOptions {
            failure_mode: config.store.failure_mode,
        })
        .with_account_listener(registry);
    Arc::new(provider)
}
