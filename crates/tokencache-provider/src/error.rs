use tokencache_core::{PartitionKey, StorageError};

/// Error raised by the authentication library's serialize/deserialize accessors.
pub type LibraryError = Box<dyn std::error::Error + Send + Sync>;

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Errors surfaced from the before/after access hooks.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The backing store failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The library could not serialize or deserialize the partition's cache.
    #[error("Token cache library failed for partition {key}: {source}")]
    Library {
        key: PartitionKey,
        #[source]
        source: LibraryError,
    },
}

impl ProviderError {
    #[must_use]
    pub fn library(key: PartitionKey, source: LibraryError) -> Self {
        Self::Library { key, source }
    }

    /// Returns `true` if a later attempt may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Storage(e) => e.is_transient(),
            Self::Library { .. } => false,
        }
    }
}
