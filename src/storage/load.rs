//! Extraction stream loader
//!
//! The extractor hands the store a stream of JSON lines, one record each:
//!
//! ```text
//! {"vertex": {"key": "sample/ws/S1", "label": "sample", "payload": {...}}}
//! {"edge": {"src": "workspace/ws", "dst": "sample/ws/S1", "src_name": "workspace", "dst_name": "sample"}}
//! ```
//!
//! Loading ends with a forced commit and an index build.

use super::traits::{EdgeRecord, EntityStore, StorageError, StorageResult};
use serde::Deserialize;
use serde_json::Value;
use std::io::BufRead;

#[derive(Debug, Deserialize)]
struct VertexRecord {
    key: String,
    label: String,
    payload: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Record {
    Vertex(VertexRecord),
    Edge(EdgeRecord),
}

/// Counts from one load
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
    pub vertices: usize,
    pub edges: usize,
}

/// Load a JSON-lines extraction stream into `store`.
///
/// Blank lines are skipped. A line that is not a vertex or edge record fails
/// the load with its 1-based line number; writes before it stay pending and
/// are committed by the caller or on drop.
pub fn load_jsonl<S, R>(store: &S, reader: R) -> StorageResult<LoadStats>
where
    S: EntityStore + ?Sized,
    R: BufRead,
{
    let mut stats = LoadStats::default();

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: Record = serde_json::from_str(&line)
            .map_err(|e| StorageError::InvalidRecord(format!("line {}: {}", index + 1, e)))?;

        match record {
            Record::Vertex(v) => {
                store.put(&v.key, &v.label, &v.payload)?;
                stats.vertices += 1;
            }
            Record::Edge(e) => {
                store.put_edge(&e.src, &e.dst, &e.src_name, &e.dst_name)?;
                stats.edges += 1;
            }
        }
    }

    store.commit(true)?;
    store.index()?;
    tracing::info!(vertices = stats.vertices, edges = stats.edges, "loaded extraction stream");
    Ok(stats)
}
