use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokencache_core::ExpirationPolicy;

/// Settings for [`RedisBlobStore`](crate::RedisBlobStore).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisStoreOptions {
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// Pool wait/create/recycle timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Prepended to every partition key, so several applications can share one Redis.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    #[serde(default = "default_sliding_expiration", with = "humantime_serde")]
    pub sliding_expiration: Option<Duration>,
    #[serde(default, with = "humantime_serde")]
    pub absolute_expiration: Option<Duration>,
    /// Deadline for a whole store call, including waiting for a connection.
    #[serde(default, with = "humantime_serde")]
    pub operation_timeout: Option<Duration>,
}

fn default_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_pool_size() -> usize {
    10
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_key_prefix() -> String {
    "tokencache:".to_string()
}

fn default_sliding_expiration() -> Option<Duration> {
    Some(Duration::from_secs(60 * 60))
}

impl Default for RedisStoreOptions {
    fn default() -> Self {
        Self {
            url: default_url(),
            pool_size: default_pool_size(),
            timeout_ms: default_timeout_ms(),
            key_prefix: default_key_prefix(),
            sliding_expiration: default_sliding_expiration(),
            absolute_expiration: None,
            operation_timeout: None,
        }
    }
}

impl RedisStoreOptions {
    pub fn expiration(&self) -> ExpirationPolicy {
        ExpirationPolicy {
            sliding: self.sliding_expiration,
            absolute: self.absolute_expiration,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.url.starts_with("redis://") && !self.url.starts_with("rediss://") {
            return Err(format!(
                "redis.url must start with redis:// or rediss://, got '{}'",
                self.url
            ));
        }
        if self.pool_size == 0 {
            return Err("redis.pool_size must be greater than 0".to_string());
        }
        if self.timeout_ms == 0 {
            return Err("redis.timeout_ms must be greater than 0".to_string());
        }
        let zero = Some(Duration::ZERO);
        if self.sliding_expiration == zero
            || self.absolute_expiration == zero
            || self.operation_timeout == zero
        {
            return Err("redis expiration and timeout durations must be non-zero".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let options = RedisStoreOptions::default();
        assert!(options.validate().is_ok());
        assert_eq!(options.expiration().sliding, Some(Duration::from_secs(3600)));
        assert_eq!(options.expiration().absolute, None);
    }

    #[test]
    fn test_rejects_bad_url_and_pool() {
        let options = RedisStoreOptions {
            url: "http://localhost".to_string(),
            ..Default::default()
        };
        assert!(options.validate().unwrap_err().contains("redis.url"));

        let options = RedisStoreOptions {
            pool_size: 0,
            ..Default::default()
        };
        assert!(options.validate().is_err());
    }
}
