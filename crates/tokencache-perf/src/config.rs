use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokencache_memory::MemoryStoreOptions;
use tokencache_provider::StorageFailureMode;
use tokencache_redis::RedisStoreOptions;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub memory: MemoryStoreOptions,
    #[serde(default)]
    pub redis: RedisStoreOptions,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub harness: HarnessConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        // Store validations
        match self.store.backend {
            StoreBackend::Memory => self.memory.validate()?,
            StoreBackend::Redis => self.redis.validate()?,
        }
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        // Harness validations
        let harness = &self.harness;
        if harness.users_start_index > harness.users_end_index {
            return Err("harness.users_start_index must be <= harness.users_end_index".into());
        }
        if harness.iterations == 0 {
            return Err("harness.iterations must be > 0".into());
        }
        if harness.concurrency == 0 {
            return Err("harness.concurrency must be > 0".into());
        }
        if harness.user_prefix.is_empty() || harness.user_prefix.contains('-') {
            return Err("harness.user_prefix must be non-empty and must not contain '-'".into());
        }
        if harness.tenant_domain.is_empty() {
            return Err("harness.tenant_domain must not be empty".into());
        }
        if harness.client_id.is_empty() {
            return Err("harness.client_id must not be empty".into());
        }
        if harness.token_lifetime.is_zero() {
            return Err("harness.token_lifetime must be > 0".into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Redis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default)]
    pub failure_mode: StorageFailureMode,
    /// Wrap the store in a tracing decorator that logs every call.
    #[serde(default = "default_traced")]
    pub traced: bool,
}

fn default_traced() -> bool {
    true
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            failure_mode: StorageFailureMode::default(),
            traced: default_traced(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    /// Print the emitting module next to each event.
    #[serde(default)]
    pub with_target: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Full,
    #[default]
    Compact,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            with_target: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Install the Prometheus recorder and print its rendering after the run.
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
        }
    }
}

/// Settings of the simulated load.
///
/// Test users are named `{user_prefix}{n}@{tenant_domain}` for every `n` in
/// `users_start_index..=users_end_index`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessConfig {
    #[serde(default = "default_users_start_index")]
    pub users_start_index: u32,
    #[serde(default = "default_users_end_index")]
    pub users_end_index: u32,
    #[serde(default = "default_user_prefix")]
    pub user_prefix: String,
    #[serde(default = "default_tenant_domain")]
    pub tenant_domain: String,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_iterations")]
    pub iterations: u32,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Directory for durable key mappings. In-memory when unset.
    #[serde(default)]
    pub mapping_dir: Option<PathBuf>,
    /// Lifetime of simulated access tokens.
    #[serde(default = "default_token_lifetime", with = "humantime_serde")]
    pub token_lifetime: Duration,
}

fn default_users_start_index() -> u32 {
    1
}

fn default_users_end_index() -> u32 {
    100
}

fn default_user_prefix() -> String {
    "MIWTestUser".to_string()
}

fn default_tenant_domain() -> String {
    "contoso.onmicrosoft.com".to_string()
}

fn default_client_id() -> String {
    "tokencache-perf".to_string()
}

fn default_iterations() -> u32 {
    3
}

fn default_concurrency() -> usize {
    16
}

fn default_token_lifetime() -> Duration {
    Duration::from_secs(60 * 60)
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            users_start_index: default_users_start_index(),
            users_end_index: default_users_end_index(),
            user_prefix: default_user_prefix(),
            tenant_domain: default_tenant_domain(),
            client_id: default_client_id(),
            iterations: default_iterations(),
            concurrency: default_concurrency(),
            mapping_dir: None,
            token_lifetime: default_token_lifetime(),
        }
    }
}

impl HarnessConfig {
    pub fn user_count(&self) -> u32 {
        self.users_end_index
            .saturating_sub(self.users_start_index)
            .saturating_add(1)
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::{Path, PathBuf};

    /// Default configuration file, looked up in the working directory.
    pub const DEFAULT_CONFIG_FILE: &str = "tokencache.toml";

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_FILE));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        } else if path.is_some() {
            return Err(format!("config file not found: {}", pathbuf.display()));
        }
        // Environment variable overrides, e.g., TOKENCACHE__STORE__BACKEND=redis
        builder = builder.add_source(
            Environment::with_prefix("TOKENCACHE")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        // Validate
        merged.validate()?;
        Ok(merged)
    }

    pub fn load_config_from_path<P: AsRef<Path>>(path: P) -> Result<AppConfig, String> {
        let p = path.as_ref().to_string_lossy().to_string();
        load_config(Some(&p))
    }
}
