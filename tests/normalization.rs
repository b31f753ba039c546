//! End-to-end normalization of single workspaces read back from a store

mod common;

use anvil_harmonizer::model::Gender;
use anvil_harmonizer::normalize::NormalizeResult;
use anvil_harmonizer::storage::load_jsonl;
use anvil_harmonizer::{
    CanonicalWorkspace, ErrorSink, HarmonizerConfig, MemoryBlobCatalog, NormalizeError, Normalizer,
    OpenStore, Operation, Pass, Precondition, RuleRegistry, Scope, SqliteStore,
};
use common::{
    concrete_scenario, write_multi_consortium_store, CCDG_WORKSPACE, CMG_WORKSPACE,
    EMPTY_WORKSPACE, GTEX_WORKSPACE, UNLINKED_WORKSPACE,
};
use std::io::Cursor;
use tempfile::TempDir;

fn create_test_store() -> (TempDir, SqliteStore) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("entities.db");
    write_multi_consortium_store(&path).unwrap();
    let store = SqliteStore::open_read_only(&path).unwrap();
    (dir, store)
}

fn normalize(
    store: &SqliteStore,
    rules: &RuleRegistry,
    config: &HarmonizerConfig,
    workspace: &str,
) -> (NormalizeResult<CanonicalWorkspace>, ErrorSink) {
    let blobs = MemoryBlobCatalog::default();
    let mut sink = ErrorSink::new();
    let result = Normalizer::new(store, rules, config, &blobs).normalize(workspace, &mut sink);
    (result, sink)
}

#[test]
fn concrete_scenario_yields_one_patient_specimen_and_task() {
    let store = SqliteStore::open_in_memory().unwrap();
    concrete_scenario().write(&store).unwrap();
    let config = HarmonizerConfig::from_yaml_str(
        r#"
default:
  Patient: { aliases: [subject] }
  Specimen: { aliases: [sample] }
"#,
    )
    .unwrap();
    let rules = RuleRegistry::with_defaults();

    let (result, _) = normalize(&store, &rules, &config, "AnVIL_CMG_Scenario");
    let ws = result.unwrap();

    assert_eq!(ws.patients.len(), 1);
    let patient = &ws.patients["P1"];
    assert_eq!(patient.specimens.len(), 1);
    let specimen = &patient.specimens["S1"];
    assert_eq!(specimen.patient, "P1");
    assert_eq!(specimen.tasks.len(), 1);

    assert_eq!(ws.tasks.len(), 1);
    let task = &ws.tasks[&specimen.tasks[0]];
    assert!(task.is_implied());
    assert_eq!(task.inputs.len(), 1);
    assert_eq!(task.inputs[0].name, "S1");
    assert_eq!(task.outputs.len(), 1);
    assert_eq!(task.outputs[0].url, "gs://b/S1.bam");
}

#[test]
fn normalization_is_idempotent() {
    let (_dir, store) = create_test_store();
    let config = HarmonizerConfig::builtin();
    let rules = RuleRegistry::with_defaults();

    for workspace in [CMG_WORKSPACE, CCDG_WORKSPACE, GTEX_WORKSPACE] {
        let (first, _) = normalize(&store, &rules, &config, workspace);
        let (second, _) = normalize(&store, &rules, &config, workspace);
        let (first, second) = (first.unwrap(), second.unwrap());

        assert_eq!(first, second, "{workspace}");
        assert_eq!(first.errors.counts(), second.errors.counts());
    }
}

#[test]
fn every_retained_task_has_input_and_output() {
    let (_dir, store) = create_test_store();
    let config = HarmonizerConfig::builtin();
    let rules = RuleRegistry::with_defaults();

    let (result, _) = normalize(&store, &rules, &config, CMG_WORKSPACE);
    let ws = result.unwrap();

    assert_eq!(ws.tasks.len(), 2);
    for task in ws.tasks.values() {
        assert!(!task.inputs.is_empty(), "{} has no inputs", task.id);
        assert!(!task.outputs.is_empty(), "{} has no outputs", task.id);
    }
    assert_eq!(ws.errors.count("TaskWithoutOutputs"), 1);
    assert!(ws.patients["P1"].specimens["S3"].tasks.is_empty());
    assert_eq!(ws.practitioner.as_ref().map(|p| p.name.as_str()), Some("Dr. Muscle"));
}

#[test]
fn consortium_overrides_shape_the_result() {
    let (_dir, store) = create_test_store();
    let config = HarmonizerConfig::builtin();
    let rules = RuleRegistry::with_defaults();

    let (ccdg, _) = normalize(&store, &rules, &config, CCDG_WORKSPACE);
    let ccdg = ccdg.unwrap();
    assert_eq!(ccdg.patients["C1"].specimens.len(), 1);
    assert_eq!(ccdg.patients["C1"].diseases, vec!["Cardiovascular"]);

    let (gtex, _) = normalize(&store, &rules, &config, GTEX_WORKSPACE);
    let gtex = gtex.unwrap();
    let donor = &gtex.patients["G1"];
    assert_eq!(donor.entity_type, "participant");
    assert_eq!(donor.gender, Some(Gender::Male));
    assert_eq!(donor.specimens["T1"].entity_type, "tissue_sample");
}

#[test]
fn unresolvable_workspaces_are_abandoned_with_a_report() {
    let (_dir, store) = create_test_store();
    let config = HarmonizerConfig::builtin();
    let rules = RuleRegistry::with_defaults();

    let (result, mut sink) = normalize(&store, &rules, &config, UNLINKED_WORKSPACE);
    let err = result.unwrap_err();
    assert!(!err.is_fatal());
    assert!(matches!(
        err,
        NormalizeError::Abandoned { reason: Precondition::NoSpecimenLinks, .. }
    ));
    let report = sink.harvest();
    assert_eq!(report.count("UnresolvedSpecimenLink"), 1);
    assert!(report.has_errors());

    let (result, _) = normalize(&store, &rules, &config, EMPTY_WORKSPACE);
    assert!(matches!(
        result,
        Err(NormalizeError::Abandoned { reason: Precondition::NoChildEntities, .. })
    ));

    let (result, _) = normalize(&store, &rules, &config, "no-such-workspace");
    assert!(matches!(result, Err(NormalizeError::WorkspaceNotFound(_))));
}

fn link_everything_to_p2(pass: &mut Pass<'_>) -> NormalizeResult<()> {
    for specimen in pass.graph.entities("sample") {
        pass.ctx
            .specimen_patients
            .insert(specimen.name.clone(), "P2".to_string());
    }
    Ok(())
}

#[test]
fn workspace_override_replaces_consortium_and_global_rules() {
    let (_dir, store) = create_test_store();
    let config = HarmonizerConfig::builtin();
    let mut rules = RuleRegistry::with_defaults();
    rules.register(
        Scope::workspace("CMG", CMG_WORKSPACE),
        Operation::LinkSpecimenToPatient,
        link_everything_to_p2,
    );

    let (result, _) = normalize(&store, &rules, &config, CMG_WORKSPACE);
    let ws = result.unwrap();

    assert!(ws.patients["P1"].specimens.is_empty());
    assert_eq!(ws.patients["P2"].specimens.len(), 3);
}

#[test]
fn extraction_stream_round_trips_through_the_store() {
    let stream = r#"
{"vertex": {"key": "workspace/ws", "label": "workspace", "payload": {"name": "ws", "consortium": "NHGRI"}}}
{"vertex": {"key": "subject/ws/P1", "label": "subject", "payload": {"entityType": "subject", "name": "P1", "attributes": {}}}}
{"vertex": {"key": "sample/ws/S1", "label": "sample", "payload": {"entityType": "sample", "name": "S1", "attributes": {"subject": "P1", "cram": "gs://b/S1.cram"}}}}
{"edge": {"src": "workspace/ws", "dst": "subject/ws/P1", "src_name": "workspace", "dst_name": "subject"}}
{"edge": {"src": "workspace/ws", "dst": "sample/ws/S1", "src_name": "workspace", "dst_name": "sample"}}
{"edge": {"src": "workspace/ws", "dst": "sample/ws/S1", "src_name": "workspace", "dst_name": "sample"}}
"#;
    let store = SqliteStore::open_in_memory().unwrap();
    let stats = load_jsonl(&store, Cursor::new(stream)).unwrap();
    assert_eq!(stats.vertices, 3);
    assert_eq!(stats.edges, 3);

    let config = HarmonizerConfig::builtin();
    let rules = RuleRegistry::with_defaults();
    let (result, _) = normalize(&store, &rules, &config, "ws");
    let ws = result.unwrap();

    assert_eq!(ws.specimen_count(), 1);
    assert!(ws.errors.contains("MissingSchema"));
}
