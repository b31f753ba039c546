//! Storage trait definitions

use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// A directed, role-labeled edge between two vertex keys.
///
/// Reads as "vertex `src`, under role `src_name`, has child `dst` under
/// role `dst_name`". The full 4-tuple is unique.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct EdgeRecord {
    pub src: String,
    pub dst: String,
    pub src_name: String,
    pub dst_name: String,
}

impl EdgeRecord {
    pub fn new(
        src: impl Into<String>,
        dst: impl Into<String>,
        src_name: impl Into<String>,
        dst_name: impl Into<String>,
    ) -> Self {
        Self {
            src: src.into(),
            dst: dst.into(),
            src_name: src_name.into(),
            dst_name: dst_name.into(),
        }
    }
}

/// Trait for entity storage backends
///
/// Implementations must be thread-safe (Send + Sync). Concurrent readers are
/// supported; writers must be serialized by the caller (one extraction
/// process per store file).
///
/// Edges may only reference vertices that exist. The store does not check
/// this; children whose vertex is missing are simply absent from edge reads.
pub trait EntityStore: Send + Sync {
    // === Vertex Operations ===

    /// Upsert a vertex. Last write wins.
    ///
    /// Writes are batched; a commit happens automatically once the pending
    /// write count crosses the store's threshold.
    fn put(&self, key: &str, label: &str, payload: &Value) -> StorageResult<()>;

    /// Exact lookup by key
    fn get(&self, key: &str) -> StorageResult<Option<Value>>;

    /// One page of a label scan: vertices with `label` whose key sorts after
    /// `after`, in key order, at most `limit` of them.
    fn scan_label(
        &self,
        label: &str,
        after: Option<&str>,
        limit: usize,
    ) -> StorageResult<Vec<(String, Value)>>;

    /// Number of vertices carrying `label`
    fn count_by_label(&self, label: &str) -> StorageResult<usize>;

    /// Lazy, restartable scan of every vertex payload with `label`.
    fn get_by_label(&self, label: &str) -> LabelScan<'_>
    where
        Self: Sized,
    {
        LabelScan::new(self, label)
    }

    // === Edge Operations ===

    /// Upsert an edge. Re-inserting the same 4-tuple is a no-op.
    fn put_edge(&self, src: &str, dst: &str, src_name: &str, dst_name: &str) -> StorageResult<()>;

    /// All children of `src` under role `src_name`, grouped by child role.
    fn get_edges(&self, src: &str, src_name: &str) -> StorageResult<BTreeMap<String, Vec<Value>>>;

    /// At most `limit` children of `src` with role `dst_name`, as a
    /// single-entry map. When several children match, the first in key
    /// order wins.
    fn get_edges_by_label(
        &self,
        src: &str,
        src_name: &str,
        dst_name: &str,
        limit: Option<usize>,
    ) -> StorageResult<BTreeMap<String, Value>>;

    // === Maintenance ===

    /// Flush pending writes. Without `force`, only commits once the pending
    /// write count has crossed the threshold.
    fn commit(&self, force: bool) -> StorageResult<()>;

    /// Build secondary indexes. Safe to call repeatedly.
    fn index(&self) -> StorageResult<()>;
}

/// Extension trait for opening stores from paths
pub trait OpenStore: EntityStore + Sized {
    /// Open or create a store at the given path
    fn open(path: impl AsRef<Path>) -> StorageResult<Self>;

    /// Open an existing store without write access
    fn open_read_only(path: impl AsRef<Path>) -> StorageResult<Self>;

    /// Create an in-memory store (useful for testing)
    fn open_in_memory() -> StorageResult<Self>;
}

const SCAN_PAGE_SIZE: usize = 512;

/// Iterator over the payloads of one label, fetched a page at a time.
///
/// Cloning the scan before it is consumed restarts it from the beginning.
#[derive(Clone)]
pub struct LabelScan<'a> {
    store: &'a dyn EntityStore,
    label: String,
    last_key: Option<String>,
    page: VecDeque<(String, Value)>,
    exhausted: bool,
}

impl<'a> LabelScan<'a> {
    pub fn new(store: &'a dyn EntityStore, label: impl Into<String>) -> Self {
        Self {
            store,
            label: label.into(),
            last_key: None,
            page: VecDeque::new(),
            exhausted: false,
        }
    }

    fn fill(&mut self) -> StorageResult<()> {
        let rows = self
            .store
            .scan_label(&self.label, self.last_key.as_deref(), SCAN_PAGE_SIZE)?;
        if rows.len() < SCAN_PAGE_SIZE {
            self.exhausted = true;
        }
        if let Some((key, _)) = rows.last() {
            self.last_key = Some(key.clone());
        }
        self.page.extend(rows);
        Ok(())
    }

    /// Next vertex as `(key, payload)`
    pub fn next_entry(&mut self) -> Option<StorageResult<(String, Value)>> {
        if self.page.is_empty() && !self.exhausted {
            if let Err(e) = self.fill() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }
        self.page.pop_front().map(Ok)
    }

    /// The rest of the scan, keys included
    pub fn entries(mut self) -> impl Iterator<Item = StorageResult<(String, Value)>> + 'a {
        std::iter::from_fn(move || self.next_entry())
    }
}

impl Iterator for LabelScan<'_> {
    type Item = StorageResult<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_entry().map(|entry| entry.map(|(_, payload)| payload))
    }
}

impl std::fmt::Debug for LabelScan<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LabelScan")
            .field("label", &self.label)
            .field("last_key", &self.last_key)
            .field("buffered", &self.page.len())
            .finish()
    }
}
