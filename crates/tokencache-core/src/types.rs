//! Key, payload and expiration types shared by all stores.

use std::borrow::Borrow;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Identifies one partition of the persisted token cache.
///
/// Either an application-level key (one per client application) or a
/// user-level key derived from the authenticated principal. Empty strings
/// are never valid keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PartitionKey(String);

impl PartitionKey {
    /// Returns `None` when `key` is empty.
    pub fn new(key: impl Into<String>) -> Option<Self> {
        let key = key.into();
        if key.is_empty() { None } else { Some(Self(key)) }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PartitionKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for PartitionKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for PartitionKey {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| "partition key must not be empty".to_string())
    }
}

impl From<PartitionKey> for String {
    fn from(key: PartitionKey) -> Self {
        key.0
    }
}

/// Opaque serialized token cache.
///
/// The bytes are owned by the authentication library; stores only observe
/// presence and length. Clones share the same allocation.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct CacheBlob(Arc<[u8]>);

impl CacheBlob {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }
}

// Payloads carry credentials, so only the length is ever printed.
impl fmt::Debug for CacheBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheBlob").field("len", &self.len()).finish()
    }
}

impl Deref for CacheBlob {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for CacheBlob {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for CacheBlob {
    fn from(bytes: Vec<u8>) -> Self {
        Self(Arc::from(bytes))
    }
}

impl From<&[u8]> for CacheBlob {
    fn from(bytes: &[u8]) -> Self {
        Self(Arc::from(bytes))
    }
}

/// Expiration applied by a store when an entry is written.
///
/// `sliding` is reset by every read or refresh; `absolute` is a hard limit
/// measured from the last write. With both set the entry disappears at
/// whichever deadline comes first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExpirationPolicy {
    pub sliding: Option<Duration>,
    pub absolute: Option<Duration>,
}

impl ExpirationPolicy {
    pub const NEVER: Self = Self {
        sliding: None,
        absolute: None,
    };

    #[must_use]
    pub fn with_sliding(mut self, window: Duration) -> Self {
        self.sliding = Some(window);
        self
    }

    #[must_use]
    pub fn with_absolute(mut self, lifetime: Duration) -> Self {
        self.absolute = Some(lifetime);
        self
    }

    pub fn is_unbounded(&self) -> bool {
        self.sliding.is_none() && self.absolute.is_none()
    }

    /// TTL to apply right after a write.
    pub fn initial_ttl(&self) -> Option<Duration> {
        match (self.sliding, self.absolute) {
            (Some(sliding), Some(absolute)) => Some(sliding.min(absolute)),
            (sliding, absolute) => sliding.or(absolute),
        }
    }
}
