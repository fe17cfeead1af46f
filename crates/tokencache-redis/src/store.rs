use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Connection, Pool};
use tokencache_core::{
    BlobStore, CacheBlob, ExpirationPolicy, StorageError, StorageResult, validate_key,
};

use crate::options::RedisStoreOptions;

const DATA_FIELD: &str = "data";
const ABSOLUTE_FIELD: &str = "absexp";
const SLIDING_FIELD: &str = "sldexp";
/// Stored in `absexp` / `sldexp` when the policy has no such limit.
const NOT_PRESENT: i64 = -1;

/// Token cache partitions stored in Redis.
#[derive(Clone)]
pub struct RedisBlobStore {
    pool: Pool,
    key_prefix: String,
    expiration: ExpirationPolicy,
    operation_timeout: Option<Duration>,
}

impl RedisBlobStore {
    /// Build a connection pool from `options`.
    ///
    /// No connection is opened here; use [`ping`](Self::ping) to check reachability.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Configuration` if the pool cannot be created,
    /// for example because the URL does not parse.
    pub fn connect(options: &RedisStoreOptions) -> StorageResult<Self> {
        let timeout = Duration::from_millis(options.timeout_ms);

        let mut redis_config = deadpool_redis::Config::from_url(&options.url);
        let pool_config = redis_config
            .pool
            .get_or_insert_with(|| deadpool_redis::PoolConfig::new(options.pool_size));
        pool_config.max_size = options.pool_size;
        pool_config.timeouts.wait = Some(timeout);
        pool_config.timeouts.create = Some(timeout);
        pool_config.timeouts.recycle = Some(timeout);

        let pool = redis_config
            .create_pool(Some(deadpool_redis::Runtime::Tokio1))
            .map_err(|e| StorageError::configuration(format!("failed to create Redis pool: {e}")))?;

        Ok(Self::from_pool(pool, options))
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: Pool, options: &RedisStoreOptions) -> Self {
        Self {
            pool,
            key_prefix: options.key_prefix.clone(),
            expiration: options.expiration(),
            operation_timeout: options.operation_timeout,
        }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Round-trip a `PING` to verify the server is reachable.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Unavailable` if no connection can be made.
    pub async fn ping(&self) -> StorageResult<()> {
        self.with_deadline("ping", async {
            let mut conn = self.connection().await?;
            let _: String = redis::cmd("PING")
                .query_async(&mut conn)
                .await
                .map_err(|e| map_redis_error("ping", e))?;
            Ok(())
        })
        .await
    }

    fn redis_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    async fn connection(&self) -> StorageResult<Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| StorageError::unavailable(format!("failed to get Redis connection: {e}")))
    }

    async fn with_deadline<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = StorageResult<T>> + Send,
    ) -> StorageResult<T> {
        match self.operation_timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| StorageError::timeout(operation, limit))?,
            None => fut.await,
        }
    }

    async fn read(&self, key: &str) -> StorageResult<Option<CacheBlob>> {
        let redis_key = self.redis_key(key);
        let mut conn = self.connection().await?;

        let (data, absexp, sldexp): (Option<Vec<u8>>, Option<i64>, Option<i64>) =
            redis::cmd("HMGET")
                .arg(&redis_key)
                .arg(DATA_FIELD)
                .arg(ABSOLUTE_FIELD)
                .arg(SLIDING_FIELD)
                .query_async(&mut conn)
                .await
                .map_err(|e| map_redis_error("get", e))?;

        let Some(data) = data else {
            tracing::debug!(key = %key, "cache miss (redis)");
            return Ok(None);
        };

        // The value is already in hand; a failed renewal only shortens its life.
        if let Err(e) = slide_expiration(&mut conn, &redis_key, absexp, sldexp).await {
            tracing::warn!(key = %key, error = %e, "sliding expiration not renewed on read");
        }
        tracing::debug!(key = %key, len = data.len(), "cache hit (redis)");
        Ok(Some(CacheBlob::from(data)))
    }

    async fn data_len(&self, key: &str) -> StorageResult<Option<usize>> {
        let redis_key = self.redis_key(key);
        let mut conn = self.connection().await?;
        let len: usize = redis::cmd("HSTRLEN")
            .arg(&redis_key)
            .arg(DATA_FIELD)
            .query_async(&mut conn)
            .await
            .map_err(|e| map_redis_error("peek_len", e))?;
        Ok((len > 0).then_some(len))
    }

    async fn write(&self, key: &str, blob: CacheBlob) -> StorageResult<()> {
        let redis_key = self.redis_key(key);
        let absexp = self
            .expiration
            .absolute
            .map_or(NOT_PRESENT, |lifetime| now_millis().saturating_add(millis(lifetime)));
        let sldexp = self.expiration.sliding.map_or(NOT_PRESENT, millis);

        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("HSET")
            .arg(&redis_key)
            .arg(DATA_FIELD)
            .arg(blob.as_bytes())
            .arg(ABSOLUTE_FIELD)
            .arg(absexp)
            .arg(SLIDING_FIELD)
            .arg(sldexp)
            .ignore();
        match self.expiration.initial_ttl() {
            Some(ttl) => pipe.cmd("PEXPIRE").arg(&redis_key).arg(millis(ttl)).ignore(),
            None => pipe.cmd("PERSIST").arg(&redis_key).ignore(),
        };

        let mut conn = self.connection().await?;
        let _: () = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| map_redis_error("set", e))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let redis_key = self.redis_key(key);
        let mut conn = self.connection().await?;
        let _: () = redis::cmd("DEL")
            .arg(&redis_key)
            .query_async(&mut conn)
            .await
            .map_err(|e| map_redis_error("remove", e))?;
        Ok(())
    }

    async fn touch(&self, key: &str) -> StorageResult<()> {
        let redis_key = self.redis_key(key);
        let mut conn = self.connection().await?;
        let (absexp, sldexp): (Option<i64>, Option<i64>) = redis::cmd("HMGET")
            .arg(&redis_key)
            .arg(ABSOLUTE_FIELD)
            .arg(SLIDING_FIELD)
            .query_async(&mut conn)
            .await
            .map_err(|e| map_redis_error("refresh", e))?;
        slide_expiration(&mut conn, &redis_key, absexp, sldexp).await
    }
}

#[async_trait]
impl BlobStore for RedisBlobStore {
    async fn get(&self, key: &str) -> StorageResult<Option<CacheBlob>> {
        self.with_deadline("get", self.read(key)).await
    }

    async fn set(&self, key: &str, blob: CacheBlob) -> StorageResult<()> {
        validate_key(key)?;
        self.with_deadline("set", self.write(key, blob)).await
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        self.with_deadline("remove", self.delete(key)).await
    }

    async fn refresh(&self, key: &str) -> StorageResult<()> {
        self.with_deadline("refresh", self.touch(key)).await
    }

    /// `HSTRLEN` of the data field. Does not restart the sliding window.
    async fn peek_len(&self, key: &str) -> StorageResult<Option<usize>> {
        self.with_deadline("peek_len", self.data_len(key)).await
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

/// Restart the sliding window, never past the absolute deadline.
async fn slide_expiration(
    conn: &mut Connection,
    redis_key: &str,
    absexp: Option<i64>,
    sldexp: Option<i64>,
) -> StorageResult<()> {
    let Some(window) = sldexp.filter(|ms| *ms > 0) else {
        return Ok(());
    };
    let ttl = match absexp.filter(|ms| *ms > 0) {
        Some(deadline) => {
            let remaining = deadline - now_millis();
            if remaining <= 0 {
                // Redis removes the key on its own at the deadline.
                return Ok(());
            }
            window.min(remaining)
        }
        None => window,
    };

    let _: () = redis::cmd("PEXPIRE")
        .arg(redis_key)
        .arg(ttl)
        .query_async(conn)
        .await
        .map_err(|e| map_redis_error("refresh", e))?;
    Ok(())
}

fn map_redis_error(operation: &'static str, error: redis::RedisError) -> StorageError {
    let message = format!("Redis {operation} failed: {error}");
    if error.is_io_error()
        || error.is_connection_dropped()
        || error.is_connection_refusal()
        || error.is_timeout()
    {
        tracing::warn!(operation, error = %error, "Redis connection error");
        StorageError::unavailable(message)
    } else {
        tracing::warn!(operation, error = %error, "Redis command error");
        StorageError::internal(message)
    }
}

fn now_millis() -> i64 {
    let nanos = time::OffsetDateTime::now_utc().unix_timestamp_nanos();
    i64::try_from(nanos / 1_000_000).unwrap_or(i64::MAX)
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_options() -> RedisStoreOptions {
        RedisStoreOptions {
            url: "redis://127.0.0.1:1".to_string(),
            timeout_ms: 200,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_unreachable_server_is_unavailable_not_absent() {
        let store = RedisBlobStore::connect(&unreachable_options()).unwrap();

        let err = store.get("uid.utid").await.unwrap_err();
        assert!(
            matches!(err, StorageError::Unavailable { .. }),
            "expected Unavailable, got {err:?}"
        );
        assert!(err.is_transient());
        assert!(store.ping().await.is_err());
    }

    #[tokio::test]
    async fn test_empty_key_rejected_before_network() {
        let store = RedisBlobStore::connect(&unreachable_options()).unwrap();
        let err = store.set("", CacheBlob::from(vec![1u8])).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey { .. }));
    }

    #[tokio::test]
    async fn test_key_prefix_applied() {
        let options = RedisStoreOptions {
            key_prefix: "app1:".to_string(),
            ..unreachable_options()
        };
        let store = RedisBlobStore::connect(&options).unwrap();
        assert_eq!(store.redis_key("uid.utid"), "app1:uid.utid");
    }
}
