//! Persistent cache of the raw extraction graph
//!
//! Vertices are keyed, labeled JSON payloads; edges are role-labeled links
//! between vertex keys. The primary implementation is `SqliteStore`.

mod load;
mod sqlite;
mod traits;

pub use load::{load_jsonl, LoadStats};
pub use sqlite::{SqliteStore, DEFAULT_COMMIT_THRESHOLD};
pub use traits::{EdgeRecord, EntityStore, LabelScan, OpenStore, StorageError, StorageResult};
