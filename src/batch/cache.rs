//! On-disk cache of normalized workspaces
//!
//! Each workspace is stored as JSON under a name derived from its consortium
//! and workspace name. The cache only saves work on later runs; nothing
//! reads it for correctness.

use crate::model::CanonicalWorkspace;
use crate::storage::StorageResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Namespace for cache file names
const CACHE_NAMESPACE: Uuid = Uuid::from_u128(0x6a1f_3c2e_9d4b_4e7a_8f10_52c7_b3e9_d041);

#[derive(Serialize, Deserialize)]
struct Envelope<W> {
    cached_at: DateTime<Utc>,
    workspace: W,
}

/// A cached workspace and when it was written
#[derive(Debug, Clone)]
pub struct CachedWorkspace {
    pub cached_at: DateTime<Utc>,
    pub workspace: CanonicalWorkspace,
}

#[derive(Debug, Clone)]
pub struct WorkspaceCache {
    dir: PathBuf,
}

impl WorkspaceCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, consortium: &str, workspace: &str) -> PathBuf {
        let name = format!("{}/{}", consortium, workspace);
        let id = Uuid::new_v5(&CACHE_NAMESPACE, name.as_bytes());
        self.dir.join(format!("{}.json", id))
    }

    /// The cached workspace, or `None` when nothing is cached for it
    pub fn load(&self, consortium: &str, workspace: &str) -> StorageResult<Option<CachedWorkspace>> {
        let path = self.path_for(consortium, workspace);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let envelope: Envelope<CanonicalWorkspace> = serde_json::from_slice(&bytes)?;
        if envelope.workspace.consortium != consortium || envelope.workspace.name != workspace {
            return Ok(None);
        }
        Ok(Some(CachedWorkspace {
            cached_at: envelope.cached_at,
            workspace: envelope.workspace,
        }))
    }

    /// Write `workspace`, replacing any previous entry
    pub fn store(&self, workspace: &CanonicalWorkspace) -> StorageResult<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(&workspace.consortium, &workspace.name);
        let envelope = Envelope {
            cached_at: Utc::now(),
            workspace,
        };
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec(&envelope)?)?;
        fs::rename(&tmp, &path)?;
        Ok(path)
    }
}
