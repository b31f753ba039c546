//! Batch normalization over a multi-consortium store

mod common;

use anvil_harmonizer::normalize::NormalizeResult;
use anvil_harmonizer::{
    run_batch, BatchError, BatchOptions, BatchSummary, CanonicalWorkspace, EntityStore,
    HarmonizerConfig, NormalizeError, OpenStore, Operation, Pass, Precondition, RuleRegistry,
    Scope, SqliteStore,
};
use common::{
    write_blob_store, write_multi_consortium_store, CCDG_WORKSPACE, CMG_WORKSPACE,
    EMPTY_WORKSPACE, GTEX_WORKSPACE, UNLINKED_WORKSPACE,
};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

fn setup() -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("entities.db");
    write_multi_consortium_store(&path).unwrap();
    (dir, path)
}

fn options(workers: usize) -> BatchOptions {
    BatchOptions {
        workers,
        ..BatchOptions::default()
    }
}

async fn run(path: &PathBuf, options: BatchOptions) -> BatchSummary {
    run_batch(
        path.clone(),
        Arc::new(HarmonizerConfig::builtin()),
        Arc::new(RuleRegistry::with_defaults()),
        options,
    )
    .await
    .unwrap()
}

fn normalized<'a>(summary: &'a BatchSummary, name: &str) -> &'a CanonicalWorkspace {
    summary
        .normalized
        .iter()
        .find(|ws| ws.name == name)
        .unwrap_or_else(|| panic!("{name} was not normalized"))
}

#[tokio::test]
async fn bad_workspaces_do_not_stop_the_batch() {
    let (_dir, path) = setup();
    let summary = run(&path, options(3)).await;

    assert_eq!(summary.processed(), 5);
    assert_eq!(summary.normalized.len(), 3);
    for name in [CMG_WORKSPACE, CCDG_WORKSPACE, GTEX_WORKSPACE] {
        normalized(&summary, name);
    }
    assert!(summary.failed.is_empty());

    assert_eq!(
        summary.abandoned[UNLINKED_WORKSPACE],
        Precondition::NoSpecimenLinks.to_string()
    );
    assert_eq!(
        summary.abandoned[EMPTY_WORKSPACE],
        Precondition::NoChildEntities.to_string()
    );
    assert!(summary.reports[UNLINKED_WORKSPACE].contains("NoSpecimenLinks"));
    assert!(summary.reports[EMPTY_WORKSPACE].contains("NoChildEntities"));
}

#[tokio::test]
async fn results_do_not_depend_on_worker_count() {
    let (_dir, path) = setup();
    let serial = run(&path, options(1)).await;
    let parallel = run(&path, options(4)).await;

    let sorted = |summary: &BatchSummary| {
        let mut workspaces = summary.normalized.clone();
        workspaces.sort_by(|a, b| a.name.cmp(&b.name));
        workspaces
    };
    assert_eq!(sorted(&serial), sorted(&parallel));
    assert_eq!(serial.abandoned, parallel.abandoned);
    assert_eq!(serial.reports, parallel.reports);
}

#[tokio::test]
async fn second_run_is_served_from_cache() {
    let (dir, path) = setup();
    let cache_dir = dir.path().join("cache");
    let cached = || BatchOptions {
        cache_dir: Some(cache_dir.clone()),
        ..options(2)
    };

    let first = run(&path, cached()).await;
    assert_eq!(first.cache_hits, 0);

    let second = run(&path, cached()).await;
    assert_eq!(second.cache_hits, 3);
    assert_eq!(
        normalized(&first, CMG_WORKSPACE),
        normalized(&second, CMG_WORKSPACE)
    );
    // Abandoned workspaces are never cached
    assert_eq!(second.abandoned.len(), 2);
}

#[tokio::test]
async fn only_filter_limits_the_batch() {
    let (_dir, path) = setup();
    let summary = run(
        &path,
        BatchOptions {
            only: vec![GTEX_WORKSPACE.to_string()],
            ..options(2)
        },
    )
    .await;

    assert_eq!(summary.processed(), 1);
    assert_eq!(summary.normalized[0].name, GTEX_WORKSPACE);
}

#[tokio::test]
async fn missing_alias_table_is_fatal() {
    let (_dir, path) = setup();
    let mut config = HarmonizerConfig::builtin();
    config.default = None;
    config.consortiums.remove("CCDG");

    let result = run_batch(
        path,
        Arc::new(config),
        Arc::new(RuleRegistry::with_defaults()),
        options(1),
    )
    .await;

    match result {
        Err(BatchError::Fatal { workspace, source }) => {
            assert_eq!(workspace, CCDG_WORKSPACE);
            assert!(matches!(source, NormalizeError::MissingConfig(_)));
        }
        other => panic!("expected a fatal error, got {other:?}"),
    }
}

#[tokio::test]
async fn blob_store_fills_document_metadata() {
    let (dir, path) = setup();
    let blob_path = dir.path().join("blobs.db");
    write_blob_store(&blob_path).unwrap();

    let summary = run(
        &path,
        BatchOptions {
            blob_store: Some(blob_path),
            only: vec![CMG_WORKSPACE.to_string()],
            ..options(1)
        },
    )
    .await;

    let ws = normalized(&summary, CMG_WORKSPACE);
    let documents: Vec<_> = ws.tasks.values().flat_map(|t| &t.outputs).collect();
    assert_eq!(documents.len(), 2);
    let s1 = documents
        .iter()
        .find(|d| d.url == "gs://fc-cmg/S1.cram")
        .unwrap();
    assert!(s1.resolved);
    assert_eq!(s1.size, Some(1_000));
    assert_eq!(s1.drs_uri.as_deref(), Some("drs://dg.ANV0/1000"));

    let s2 = documents
        .iter()
        .find(|d| d.url == "gs://fc-cmg/S2.cram")
        .unwrap();
    assert_eq!(s2.size, Some(2_000));
    assert!(!ws.errors.contains("MissingBlob"));
}

#[tokio::test]
async fn malformed_workspace_record_fails_alone() {
    let (_dir, path) = setup();
    {
        let store = SqliteStore::open(&path).unwrap();
        store
            .put("workspace/zz_bad", "workspace", &json!({"name": "zz_bad"}))
            .unwrap();
        store.commit(true).unwrap();
    }

    let summary = run(&path, options(2)).await;

    assert_eq!(summary.processed(), 6);
    assert_eq!(summary.normalized.len(), 3);
    assert!(summary.failed["zz_bad"].contains("consortium"));
    assert!(summary.reports["zz_bad"].contains("MalformedWorkspace"));
    assert!(summary.reports["zz_bad"].has_errors());
}

fn explode(_: &mut Pass<'_>) -> NormalizeResult<()> {
    panic!("alias table corrupted");
}

#[tokio::test]
async fn panicking_worker_fails_only_its_workspace() {
    let (_dir, path) = setup();
    let mut rules = RuleRegistry::with_defaults();
    rules.register(
        Scope::workspace("CMG", CMG_WORKSPACE),
        Operation::ConsortiumConfig,
        explode,
    );

    let summary = run_batch(
        path,
        Arc::new(HarmonizerConfig::builtin()),
        Arc::new(rules),
        options(2),
    )
    .await
    .unwrap();

    assert_eq!(summary.processed(), 5);
    assert_eq!(summary.normalized.len(), 2);
    assert_eq!(summary.failed[CMG_WORKSPACE], "alias table corrupted");
    assert!(summary.reports[CMG_WORKSPACE].contains("WorkerPanicked"));
}
