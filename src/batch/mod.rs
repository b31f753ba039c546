//! Batch driver: normalizes every workspace in a store on a bounded worker pool
//!
//! Each workspace runs on its own blocking task with its own read-only store
//! connection, so nothing mutable is shared between workspaces. Abandoned and
//! failed workspaces are recorded and skipped. Only configuration errors stop
//! the batch.

mod cache;

pub use cache::{CachedWorkspace, WorkspaceCache};

use crate::model::{keys, CanonicalWorkspace, WorkspaceGraph, WorkspaceRecord};
use crate::normalize::{
    BlobCatalog, HarmonizerConfig, MemoryBlobCatalog, NormalizeError, NormalizeResult, Normalizer,
    StoreBlobCatalog,
};
use crate::report::{ErrorReport, ErrorSink};
use crate::rules::RuleRegistry;
use crate::storage::{EntityStore, LabelScan, OpenStore, SqliteStore, StorageError, StorageResult};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("fatal error normalizing {workspace}: {source}")]
    Fatal {
        workspace: String,
        #[source]
        source: NormalizeError,
    },

    #[error("worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("worker pool closed: {0}")]
    PoolClosed(#[from] tokio::sync::AcquireError),
}

pub type BatchResult<T> = Result<T, BatchError>;

#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Workspaces normalized at once
    pub workers: usize,
    /// Where normalized workspaces are cached between runs
    pub cache_dir: Option<PathBuf>,
    /// Store holding `blob/` and `drs/` vertices
    pub blob_store: Option<PathBuf>,
    /// Only these workspaces, when non-empty
    pub only: Vec<String>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            cache_dir: None,
            blob_store: None,
            only: Vec::new(),
        }
    }
}

/// Outcome of a whole batch
#[derive(Debug, Default, Serialize)]
pub struct BatchSummary {
    pub normalized: Vec<CanonicalWorkspace>,
    /// Workspace → failed precondition
    pub abandoned: BTreeMap<String, String>,
    /// Workspace → error that stopped it
    pub failed: BTreeMap<String, String>,
    pub cache_hits: usize,
    /// Per-workspace error reports, for every workspace processed
    pub reports: BTreeMap<String, ErrorReport>,
}

impl BatchSummary {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Normalized { workspace, cached } => {
                if cached {
                    self.cache_hits += 1;
                }
                self.reports
                    .insert(workspace.name.clone(), workspace.errors.clone());
                self.normalized.push(workspace);
            }
            Outcome::Abandoned {
                workspace,
                reason,
                report,
            } => {
                self.abandoned.insert(workspace.clone(), reason);
                self.reports.insert(workspace, report);
            }
            Outcome::Failed {
                workspace,
                reason,
                report,
            } => {
                self.failed.insert(workspace.clone(), reason);
                self.reports.insert(workspace, report);
            }
        }
    }

    /// Workspaces in the batch, whatever happened to them
    pub fn processed(&self) -> usize {
        self.reports.len()
    }
}

enum Outcome {
    Normalized {
        workspace: CanonicalWorkspace,
        cached: bool,
    },
    Abandoned {
        workspace: String,
        reason: String,
        report: ErrorReport,
    },
    Failed {
        workspace: String,
        reason: String,
        report: ErrorReport,
    },
}

/// Workspace vertices of a store
#[derive(Debug, Default)]
pub struct WorkspaceListing {
    pub names: Vec<String>,
    /// Workspace → why its vertex could not be read
    pub malformed: BTreeMap<String, String>,
}

/// Workspaces in `store`, restricted to `only` when non-empty. A vertex whose
/// payload is not a workspace record is listed as malformed, named after its
/// `name` field or its key.
pub fn list_workspaces(store: &dyn EntityStore, only: &[String]) -> StorageResult<WorkspaceListing> {
    let only: BTreeSet<&str> = only.iter().map(String::as_str).collect();
    let wanted = |name: &str| only.is_empty() || only.contains(name);
    let mut listing = WorkspaceListing::default();
    for entry in LabelScan::new(store, keys::WORKSPACE_LABEL).entries() {
        let (key, payload) = entry?;
        match WorkspaceRecord::deserialize(&payload) {
            Ok(record) => {
                if wanted(&record.name) {
                    listing.names.push(record.name);
                }
            }
            Err(e) => {
                let name = payload
                    .get("name")
                    .and_then(Value::as_str)
                    .or_else(|| keys::workspace_name(&key))
                    .unwrap_or(key.as_str())
                    .to_string();
                if wanted(&name) {
                    listing.malformed.insert(name, e.to_string());
                }
            }
        }
    }
    Ok(listing)
}

/// Shared, read-only inputs of every worker
struct Job {
    store_path: PathBuf,
    config: Arc<HarmonizerConfig>,
    rules: Arc<RuleRegistry>,
    blob_store: Option<PathBuf>,
    cache: Option<WorkspaceCache>,
}

impl Job {
    fn blob_catalog(&self) -> StorageResult<Box<dyn BlobCatalog>> {
        Ok(match &self.blob_store {
            Some(path) => Box::new(StoreBlobCatalog::new(SqliteStore::open_read_only(path)?)),
            None => Box::new(MemoryBlobCatalog::default()),
        })
    }

    fn try_normalize(
        &self,
        workspace: &str,
        sink: &mut ErrorSink,
    ) -> NormalizeResult<(CanonicalWorkspace, bool)> {
        let store = SqliteStore::open_read_only(&self.store_path)?;
        let graph = WorkspaceGraph::load(&store, workspace)?
            .ok_or_else(|| NormalizeError::WorkspaceNotFound(workspace.to_string()))?;

        if let Some(cache) = &self.cache {
            match cache.load(graph.consortium(), workspace) {
                Ok(Some(hit)) => {
                    tracing::debug!(workspace, cached_at = %hit.cached_at, "cache hit");
                    return Ok((hit.workspace, true));
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(workspace, error = %e, "ignoring unreadable cache entry"),
            }
        }

        let blobs = self.blob_catalog()?;
        let normalizer = Normalizer::new(&store, &self.rules, &self.config, blobs.as_ref());
        let canonical = normalizer.normalize_graph(&graph, sink)?;

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.store(&canonical) {
                tracing::warn!(workspace, error = %e, "failed to cache workspace");
            }
        }
        Ok((canonical, false))
    }

    /// Normalize one workspace. Only fatal errors come back as `Err`.
    fn run(&self, workspace: String) -> BatchResult<Outcome> {
        let mut sink = ErrorSink::new();
        match self.try_normalize(&workspace, &mut sink) {
            Ok((canonical, cached)) => Ok(Outcome::Normalized {
                workspace: canonical,
                cached,
            }),
            Err(source) if source.is_fatal() => Err(BatchError::Fatal { workspace, source }),
            Err(NormalizeError::Abandoned { reason, .. }) => {
                tracing::info!(workspace = %workspace, %reason, "workspace abandoned");
                Ok(Outcome::Abandoned {
                    workspace,
                    reason: reason.to_string(),
                    report: sink.harvest(),
                })
            }
            Err(e) => {
                sink.error("WorkspaceFailed", vec![json!(workspace), json!(e.to_string())]);
                Ok(Outcome::Failed {
                    workspace,
                    reason: e.to_string(),
                    report: sink.harvest(),
                })
            }
        }
    }
}

impl Outcome {
    /// A workspace that failed before or outside normalization
    fn failed(workspace: String, event: &str, reason: String) -> Self {
        let mut sink = ErrorSink::new();
        sink.begin(workspace.as_str());
        sink.error(event, vec![json!(workspace), json!(reason)]);
        Outcome::Failed {
            report: sink.harvest(),
            workspace,
            reason,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "<unknown panic>".to_string())
}

/// Run one workspace on the current thread. A panicking worker fails its
/// own workspace only.
fn run_guarded(job: &Job, workspace: String) -> BatchResult<Outcome> {
    let name = workspace.clone();
    match panic::catch_unwind(AssertUnwindSafe(|| job.run(workspace))) {
        Ok(outcome) => outcome,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::error!(workspace = %name, panic = %message, "worker panicked");
            Ok(Outcome::failed(name, "WorkerPanicked", message))
        }
    }
}

fn settle(
    summary: &mut BatchSummary,
    joined: Result<BatchResult<Outcome>, tokio::task::JoinError>,
) -> BatchResult<()> {
    summary.record(joined??);
    Ok(())
}

/// Normalize every workspace in the store at `store_path`.
///
/// The store must be fully written before the batch starts; workers only
/// open it read-only.
pub async fn run_batch(
    store_path: impl Into<PathBuf>,
    config: Arc<HarmonizerConfig>,
    rules: Arc<RuleRegistry>,
    options: BatchOptions,
) -> BatchResult<BatchSummary> {
    let store_path = store_path.into();
    let listing = {
        let store = SqliteStore::open_read_only(&store_path)?;
        list_workspaces(&store, &options.only)?
    };
    tracing::info!(
        workspaces = listing.names.len() + listing.malformed.len(),
        workers = options.workers,
        "starting normalization batch"
    );

    let job = Arc::new(Job {
        store_path,
        config,
        rules,
        blob_store: options.blob_store,
        cache: options.cache_dir.map(WorkspaceCache::new),
    });
    let semaphore = Arc::new(Semaphore::new(options.workers.max(1)));
    let mut workers = JoinSet::new();
    let mut summary = BatchSummary::default();

    for (workspace, reason) in listing.malformed {
        tracing::warn!(workspace = %workspace, %reason, "skipping malformed workspace record");
        summary.record(Outcome::failed(workspace, "MalformedWorkspace", reason));
    }

    for workspace in listing.names {
        let permit = semaphore.clone().acquire_owned().await?;
        while let Some(joined) = workers.try_join_next() {
            if let Err(e) = settle(&mut summary, joined) {
                workers.abort_all();
                return Err(e);
            }
        }
        let job = job.clone();
        workers.spawn_blocking(move || {
            let _permit = permit;
            run_guarded(&job, workspace)
        });
    }

    while let Some(joined) = workers.join_next().await {
        if let Err(e) = settle(&mut summary, joined) {
            workers.abort_all();
            return Err(e);
        }
    }

    tracing::info!(
        normalized = summary.normalized.len(),
        abandoned = summary.abandoned.len(),
        failed = summary.failed.len(),
        cache_hits = summary.cache_hits,
        "normalization batch finished"
    );
    Ok(summary)
}
