//! Partition key derivation.

use tokencache_core::PartitionKey;

use crate::notification::TokenCacheNotificationArgs;

/// Appended to the client id to form the application cache key.
pub const APP_CACHE_KEY_SUFFIX: &str = "_AppTokenCache";

/// Key of the application-level cache of `client_id`.
///
/// Returns `None` for an empty client id.
pub fn app_partition_key(client_id: &str) -> Option<PartitionKey> {
    if client_id.is_empty() {
        return None;
    }
    PartitionKey::new(format!("{client_id}{APP_CACHE_KEY_SUFFIX}"))
}

/// Key of the partition a notification refers to.
///
/// Suggested key first, then the account's home id, then the application key
/// for application caches. Empty candidates are skipped.
pub fn derive_partition_key(args: &TokenCacheNotificationArgs<'_>) -> Option<PartitionKey> {
    if let Some(key) = args.suggested_cache_key.and_then(|key| PartitionKey::new(key)) {
        return Some(key);
    }
    if let Some(key) = args
        .account
        .and_then(|account| PartitionKey::new(account.home_account_id.as_str()))
    {
        return Some(key);
    }
    if args.is_application_cache {
        return app_partition_key(args.client_id);
    }
    None
}
