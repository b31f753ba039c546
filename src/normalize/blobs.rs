//! Object-storage metadata lookups
//!
//! The bucket lister and the DRS resolver run outside this crate and leave
//! their results in an entity store: `blob/<url>` vertices carry size and
//! checksum, `drs/<url>` vertices carry the DRS URI. Normalization only reads
//! them.

use crate::model::keys;
use crate::storage::{EntityStore, StorageResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// What the bucket cache knows about one object
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobInfo {
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default, alias = "md5_hash")]
    pub md5: Option<String>,
}

/// Read-only source of blob metadata and DRS identifiers
pub trait BlobCatalog: Send + Sync {
    fn blob(&self, url: &str) -> StorageResult<Option<BlobInfo>>;

    fn drs(&self, url: &str) -> StorageResult<Option<String>>;
}

/// In-memory catalog, empty by default
#[derive(Debug, Clone, Default)]
pub struct MemoryBlobCatalog {
    blobs: BTreeMap<String, BlobInfo>,
    drs: BTreeMap<String, String>,
}

impl MemoryBlobCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_blob(mut self, url: impl Into<String>, size: u64, md5: Option<&str>) -> Self {
        self.blobs.insert(
            url.into(),
            BlobInfo {
                size: Some(size),
                md5: md5.map(str::to_string),
            },
        );
        self
    }

    pub fn with_drs(mut self, url: impl Into<String>, drs_uri: impl Into<String>) -> Self {
        self.drs.insert(url.into(), drs_uri.into());
        self
    }
}

impl BlobCatalog for MemoryBlobCatalog {
    fn blob(&self, url: &str) -> StorageResult<Option<BlobInfo>> {
        Ok(self.blobs.get(url).cloned())
    }

    fn drs(&self, url: &str) -> StorageResult<Option<String>> {
        Ok(self.drs.get(url).cloned())
    }
}

/// Catalog backed by an entity store file maintained by the bucket lister
pub struct StoreBlobCatalog<S> {
    store: S,
}

impl<S: EntityStore> StoreBlobCatalog<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S: EntityStore> BlobCatalog for StoreBlobCatalog<S> {
    fn blob(&self, url: &str) -> StorageResult<Option<BlobInfo>> {
        match self.store.get(&keys::blob_key(url))? {
            Some(payload) => Ok(Some(serde_json::from_value(payload)?)),
            None => Ok(None),
        }
    }

    fn drs(&self, url: &str) -> StorageResult<Option<String>> {
        let drs_uri = self.store.get(&keys::drs_key(url))?.and_then(|payload| match payload {
            Value::String(s) => Some(s),
            Value::Object(mut obj) => match obj.remove("drs_uri") {
                Some(Value::String(s)) => Some(s),
                _ => None,
            },
            _ => None,
        });
        Ok(drs_uri)
    }
}
