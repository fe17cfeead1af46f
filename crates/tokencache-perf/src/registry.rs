//! Key-mapping registry: which partition key belongs to which test user.
//!
//! The load driver needs to know, for every test user ordinal, the partition
//! key its token cache was persisted under, so later runs can look the cached
//! account up instead of signing in again. Each assignment is stored as a
//! marker entry whose key is `"{raw_identity}-{partition_key}"`; its presence
//! alone means "assigned".

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokencache_core::PartitionKey;
use tokencache_provider::{Account, AccountKeyListener};
use tracing::{debug, info, warn};

/// Value stored for every assignment.
pub const MARKER: &[u8] = b" ";

const COMPOSITE_SEPARATOR: char = '-';

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Marker store I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid marker key: {message}")]
    InvalidKey { message: String },
}

impl RegistryError {
    #[must_use]
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    #[must_use]
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey {
            message: message.into(),
        }
    }
}

/// Where assignment markers are kept.
#[async_trait]
pub trait MarkerStore: Send + Sync {
    async fn put_marker(&self, composite_key: &str) -> Result<(), RegistryError>;

    async fn contains(&self, composite_key: &str) -> Result<bool, RegistryError>;

    /// All composite keys currently present.
    async fn list(&self) -> Result<Vec<String>, RegistryError>;
}

/// Markers held in process memory; lost on exit.
#[derive(Default)]
pub struct MemoryMarkerStore {
    markers: DashMap<String, &'static [u8]>,
}

impl MemoryMarkerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MarkerStore for MemoryMarkerStore {
    async fn put_marker(&self, composite_key: &str) -> Result<(), RegistryError> {
        self.markers.insert(composite_key.to_owned(), MARKER);
        Ok(())
    }

    async fn contains(&self, composite_key: &str) -> Result<bool, RegistryError> {
        Ok(self.markers.contains_key(composite_key))
    }

    async fn list(&self) -> Result<Vec<String>, RegistryError> {
        Ok(self.markers.iter().map(|e| e.key().clone()).collect())
    }
}

/// One marker file per assignment, named after the composite key.
pub struct DirectoryMarkerStore {
    dir: PathBuf,
}

impl DirectoryMarkerStore {
    /// Open `dir`, creating it if needed.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, RegistryError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| RegistryError::io(&dir, e))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn marker_path(&self, composite_key: &str) -> Result<PathBuf, RegistryError> {
        if composite_key.is_empty()
            || composite_key.starts_with('.')
            || composite_key.contains(['/', '\\'])
        {
            return Err(RegistryError::invalid_key(format!(
                "'{composite_key}' cannot be used as a file name"
            )));
        }
        Ok(self.dir.join(composite_key))
    }
}

#[async_trait]
impl MarkerStore for DirectoryMarkerStore {
    async fn put_marker(&self, composite_key: &str) -> Result<(), RegistryError> {
        let path = self.marker_path(composite_key)?;
        tokio::fs::write(&path, MARKER)
            .await
            .map_err(|e| RegistryError::io(path, e))
    }

    async fn contains(&self, composite_key: &str) -> Result<bool, RegistryError> {
        let path = self.marker_path(composite_key)?;
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| RegistryError::io(path, e))
    }

    async fn list(&self) -> Result<Vec<String>, RegistryError> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| RegistryError::io(&self.dir, e))?;
        let mut keys = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| RegistryError::io(&self.dir, e))?
        {
            let is_file = entry
                .file_type()
                .await
                .map(|t| t.is_file())
                .unwrap_or(false);
            if !is_file {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) if !name.starts_with('.') => keys.push(name),
                Ok(_) => {}
                Err(name) => debug!(file = ?name, "skipping non UTF-8 marker file"),
            }
        }
        Ok(keys)
    }
}

/// Test user naming scheme: `{prefix}{ordinal}@{domain}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserNaming {
    pub prefix: String,
    pub domain: String,
}

impl UserNaming {
    pub fn new(prefix: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            domain: domain.into(),
        }
    }

    pub fn username(&self, ordinal: u32) -> String {
        format!("{}{}@{}", self.prefix, ordinal, self.domain)
    }

    /// Ordinal of a username following this scheme. The domain is not checked.
    pub fn ordinal_of(&self, username: &str) -> Option<u32> {
        let rest = username.strip_prefix(self.prefix.as_str())?;
        let (number, _domain) = rest.split_once('@')?;
        number.parse().ok()
    }
}

/// A recorded assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMapping {
    pub raw_identity: String,
    pub key: PartitionKey,
}

impl KeyMapping {
    fn composite_key(&self) -> String {
        format!("{}{}{}", self.raw_identity, COMPOSITE_SEPARATOR, self.key)
    }

    /// Split a composite key after the first `@{domain}`, so domains that
    /// contain the separator still parse. Falls back to the first separator.
    fn parse(composite_key: &str, domain: &str) -> Option<Self> {
        let domain_end = format!("@{domain}{COMPOSITE_SEPARATOR}");
        let split_at = match composite_key.find(&domain_end) {
            Some(start) => start + domain_end.len() - COMPOSITE_SEPARATOR.len_utf8(),
            None => composite_key.find(COMPOSITE_SEPARATOR)?,
        };
        let raw_identity = &composite_key[..split_at];
        let key = &composite_key[split_at + COMPOSITE_SEPARATOR.len_utf8()..];
        if raw_identity.is_empty() {
            return None;
        }
        Some(Self {
            raw_identity: raw_identity.to_owned(),
            key: PartitionKey::new(key)?,
        })
    }
}

/// Write-once map from test user ordinal to partition key.
pub struct KeyMappingRegistry {
    store: Arc<dyn MarkerStore>,
    naming: UserNaming,
    index: DashMap<u32, KeyMapping>,
}

impl KeyMappingRegistry {
    pub fn new(store: Arc<dyn MarkerStore>, naming: UserNaming) -> Self {
        Self {
            store,
            naming,
            index: DashMap::new(),
        }
    }

    pub fn naming(&self) -> &UserNaming {
        &self.naming
    }

    /// Rebuild the in-memory index from the marker store.
    ///
    /// Markers that do not parse, or whose identity does not follow the
    /// naming scheme, are skipped. Returns the number of mappings loaded.
    pub async fn load(&self) -> Result<usize, RegistryError> {
        let mut loaded = 0;
        for composite in self.store.list().await? {
            let Some(mapping) = KeyMapping::parse(&composite, &self.naming.domain) else {
                warn!(marker = %composite, "skipping malformed key mapping marker");
                continue;
            };
            let Some(ordinal) = self.naming.ordinal_of(&mapping.raw_identity) else {
                debug!(identity = %mapping.raw_identity, "marker identity outside naming scheme");
                continue;
            };
            if let Entry::Vacant(slot) = self.index.entry(ordinal) {
                slot.insert(mapping);
                loaded += 1;
            }
        }
        info!(loaded, "key mappings loaded");
        Ok(loaded)
    }

    /// Record that `ordinal` maps to `key`. Only the first assignment per
    /// ordinal is kept; returns `false` if one already existed.
    ///
    /// # Errors
    ///
    /// `raw_identity` must be the scheme username of `ordinal`, since the
    /// marker only stores the identity and [`load`](Self::load) derives the
    /// ordinal from it. Anything else is rejected with `InvalidKey`.
    pub async fn record_mapping(
        &self,
        ordinal: u32,
        raw_identity: &str,
        key: &PartitionKey,
    ) -> Result<bool, RegistryError> {
        if raw_identity != self.naming.username(ordinal) {
            return Err(RegistryError::invalid_key(format!(
                "identity {raw_identity} is not the username of test user {ordinal}"
            )));
        }
        let mapping = KeyMapping {
            raw_identity: raw_identity.to_owned(),
            key: key.clone(),
        };
        let composite = mapping.composite_key();

        match self.index.entry(ordinal) {
            Entry::Occupied(_) => return Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(mapping);
            }
        }

        if let Err(e) = self.store.put_marker(&composite).await {
            self.index.remove(&ordinal);
            return Err(e);
        }
        debug!(ordinal, key = %key, "key mapping recorded");
        Ok(true)
    }

    /// Record a mapping for a username following the naming scheme.
    ///
    /// Returns `false` for other usernames and for ordinals already mapped.
    pub async fn record_account(
        &self,
        raw_identity: &str,
        key: &PartitionKey,
    ) -> Result<bool, RegistryError> {
        let Some(ordinal) = self
            .naming
            .ordinal_of(raw_identity)
            .filter(|ordinal| self.naming.username(*ordinal) == raw_identity)
        else {
            debug!(identity = %raw_identity, "identity outside naming scheme, not recorded");
            return Ok(false);
        };
        self.record_mapping(ordinal, raw_identity, key).await
    }

    pub fn get(&self, ordinal: u32) -> Option<PartitionKey> {
        self.index.get(&ordinal).map(|m| m.key.clone())
    }

    /// All mappings, sorted by ordinal.
    pub fn all_mappings(&self) -> Vec<(u32, PartitionKey)> {
        let mut mappings: Vec<_> = self
            .index
            .iter()
            .map(|e| (*e.key(), e.value().key.clone()))
            .collect();
        mappings.sort_unstable_by_key(|(ordinal, _)| *ordinal);
        mappings
    }

    /// Whether a marker for this exact assignment exists in the store.
    pub async fn is_recorded(
        &self,
        raw_identity: &str,
        key: &PartitionKey,
    ) -> Result<bool, RegistryError> {
        let mapping = KeyMapping {
            raw_identity: raw_identity.to_owned(),
            key: key.clone(),
        };
        self.store.contains(&mapping.composite_key()).await
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

#[async_trait]
impl AccountKeyListener for KeyMappingRegistry {
    async fn on_account_persisted(&self, account: &Account, key: &PartitionKey) {
        if let Err(e) = self.record_account(&account.username, key).await {
            warn!(username = %account.username, key = %key, error = %e, "failed to record key mapping");
        }
    }
}
