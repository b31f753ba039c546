//! Task materialization and task → document linkage

use super::buckets::bucket_urls;
use crate::model::{
    attribute_text, CanonicalDocument, CanonicalTask, EntityRef, RawEntity, Role, TaskInput,
    WorkspaceGraph, IMPLIED_TASK,
};
use crate::normalize::{NormalizationContext, NormalizeResult, Pass};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};

const REPORTED_EXAMPLES: usize = 5;

/// One synthesized task per linked specimen, or one task per explicit task
/// entity.
pub(super) fn ensure_tasks(pass: &mut Pass<'_>) -> NormalizeResult<()> {
    let graph = pass.graph;
    let mut tasks = BTreeMap::new();

    if is_implied(pass.ctx) {
        for specimen in pass.ctx.specimen_patients.keys() {
            let task = CanonicalTask::new(IMPLIED_TASK, specimen.clone());
            tasks.insert(task.id.clone(), task);
        }
    } else {
        for task_type in &pass.ctx.task_entity_names {
            for entity in graph.entities(task_type) {
                let mut task = CanonicalTask::new(task_type.clone(), entity.name.clone());
                task.attributes = entity.attributes.clone();
                tasks.insert(task.id.clone(), task);
            }
        }
    }

    pass.ctx.tasks = tasks;
    Ok(())
}

fn is_implied(ctx: &NormalizationContext) -> bool {
    ctx.task_entity_names.iter().all(|t| t == IMPLIED_TASK)
}

/// Inputs: the specimen for implied tasks, typed references for explicit ones
pub(super) fn ensure_tasks_populated(pass: &mut Pass<'_>) -> NormalizeResult<()> {
    let graph = pass.graph;
    let specimen_type = pass.ctx.specimen_type()?.to_string();
    let mut missing: Vec<String> = Vec::new();

    let mut tasks = std::mem::take(&mut pass.ctx.tasks);
    for task in tasks.values_mut() {
        if task.is_implied() {
            task.add_input(TaskInput::specimen(specimen_type.clone(), task.name.clone()));
            continue;
        }
        let references: Vec<EntityRef> = task
            .attributes
            .values()
            .flat_map(EntityRef::typed_in)
            .collect();
        for reference in references {
            let Some(target) = graph.resolve(&reference, &specimen_type) else {
                missing.push(format!("{}/{}", task.id, reference.name));
                continue;
            };
            let role = pass.ctx.role_of(&target.entity_type);
            if matches!(role, Some(Role::Patient) | Some(Role::Task)) {
                continue;
            }
            task.add_input(TaskInput {
                role,
                entity_type: target.entity_type.clone(),
                name: target.name.clone(),
            });
        }
    }
    pass.ctx.tasks = tasks;

    if !missing.is_empty() {
        let examples: Vec<&String> = missing.iter().take(REPORTED_EXAMPLES).collect();
        pass.warn_once("TaskInputNotFound", vec![json!(missing.len()), json!(examples)]);
    }
    Ok(())
}

/// Ways of recovering a task's specimen when none of its inputs is one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecimenHeuristic {
    /// `<specimen>`, `<specimen>_id`, `specimen` or `sample_id` on the task
    SpecimenAttribute,
    /// Match the task's `collaborator_sample_id` against the specimens'
    CollaboratorSampleId,
    /// Basename of the task's first output, up to the first `.`
    OutputBasename,
}

impl SpecimenHeuristic {
    pub const GLOBAL: &'static [SpecimenHeuristic] = &[
        SpecimenHeuristic::SpecimenAttribute,
        SpecimenHeuristic::CollaboratorSampleId,
        SpecimenHeuristic::OutputBasename,
    ];

    pub const CMG: &'static [SpecimenHeuristic] = &[
        SpecimenHeuristic::CollaboratorSampleId,
        SpecimenHeuristic::SpecimenAttribute,
        SpecimenHeuristic::OutputBasename,
    ];

    /// Name of an existing specimen the task consumed
    pub fn apply(
        &self,
        task: &CanonicalTask,
        graph: &WorkspaceGraph,
        specimen_type: &str,
    ) -> Option<String> {
        let candidate = match self {
            SpecimenHeuristic::SpecimenAttribute => {
                let keys = [
                    specimen_type.to_string(),
                    format!("{}_id", specimen_type),
                    "specimen".to_string(),
                    "sample_id".to_string(),
                ];
                keys.iter()
                    .filter_map(|k| task.attributes.get(k))
                    .find_map(EntityRef::first_in)
                    .map(|r| r.name)
            }
            SpecimenHeuristic::CollaboratorSampleId => {
                let wanted = attribute_text(&task.attributes, "collaborator_sample_id")?;
                graph
                    .entities(specimen_type)
                    .find(|s| {
                        s.name == wanted
                            || s.text("collaborator_sample_id").as_deref() == Some(wanted.as_str())
                    })
                    .map(|s| s.name.clone())
            }
            SpecimenHeuristic::OutputBasename => task.outputs.first().and_then(|doc| {
                let file = doc.url.rsplit('/').next()?;
                let stem = file.split('.').next()?;
                (!stem.is_empty()).then(|| stem.to_string())
            }),
        }?;
        graph
            .entity(specimen_type, &candidate)
            .map(|_| candidate)
    }
}

/// Entities that reference each `(entity type, name)`, restricted to entity
/// types that carry bucket fields
fn carriers_by_target<'g>(
    graph: &'g WorkspaceGraph,
    ctx: &NormalizationContext,
) -> BTreeMap<(String, String), Vec<&'g RawEntity>> {
    let mut index: BTreeMap<(String, String), Vec<&'g RawEntity>> = BTreeMap::new();
    for entity_type in ctx.bucket_fields.keys() {
        if ctx.specimen_entity_name.as_deref() == Some(entity_type.as_str())
            || ctx.is_patient_type(entity_type)
            || ctx.task_entity_names.contains(entity_type)
        {
            continue;
        }
        for carrier in graph.entities(entity_type) {
            let mut targets = BTreeSet::new();
            for (key, value) in &carrier.attributes {
                for reference in EntityRef::all_in(value) {
                    let target_type = match reference.entity_type {
                        Some(t) => t,
                        None if graph.has_type(key) => key.clone(),
                        None => continue,
                    };
                    targets.insert((target_type, reference.name));
                }
            }
            for target in targets {
                index.entry(target).or_default().push(carrier);
            }
        }
    }
    index
}

/// Documents for every bucket field `entity` carries
fn documents_of(entity: &RawEntity, ctx: &NormalizationContext) -> Vec<CanonicalDocument> {
    let mut documents = Vec::new();
    for field in ctx.bucket_fields_of(&entity.entity_type) {
        if let Some(value) = entity.attribute(field) {
            for url in bucket_urls(value) {
                documents.push(CanonicalDocument::new(
                    entity.entity_type.clone(),
                    entity.name.clone(),
                    field.clone(),
                    url,
                ));
            }
        }
    }
    documents
}

fn link_documents(pass: &mut Pass<'_>, heuristics: &[SpecimenHeuristic]) -> NormalizeResult<()> {
    let graph = pass.graph;
    let specimen_type = pass.ctx.specimen_type()?.to_string();
    let carriers = carriers_by_target(graph, pass.ctx);

    let mut tasks = std::mem::take(&mut pass.ctx.tasks);
    let mut specimen_unresolved = Vec::new();

    for task in tasks.values_mut() {
        let own = if task.is_implied() {
            graph.entity(&specimen_type, &task.name)
        } else {
            graph.entity(&task.entity_type, &task.name)
        };
        let mut sources: Vec<&RawEntity> = own.into_iter().collect();

        for input in &task.inputs {
            if matches!(input.role, Some(Role::Specimen) | Some(Role::Patient)) {
                continue;
            }
            if let Some(entity) = graph.entity(&input.entity_type, &input.name) {
                sources.push(entity);
            }
        }

        let target = match own {
            Some(entity) => (entity.entity_type.clone(), entity.name.clone()),
            None => (task.entity_type.clone(), task.name.clone()),
        };
        if let Some(children) = carriers.get(&target) {
            sources.extend(children.iter().copied());
        }

        for source in sources {
            for document in documents_of(source, pass.ctx) {
                task.add_output(document);
            }
        }

        if !task.has_specimen_input() {
            match heuristics
                .iter()
                .find_map(|h| h.apply(task, graph, &specimen_type))
            {
                Some(specimen) => task.add_input(TaskInput::specimen(specimen_type.clone(), specimen)),
                None => specimen_unresolved.push(task.id.clone()),
            }
        }
    }

    let mut without_outputs = Vec::new();
    let mut without_inputs = Vec::new();
    tasks.retain(|id, task| {
        if task.outputs.is_empty() {
            without_outputs.push(id.clone());
            false
        } else if !task.has_specimen_input() {
            without_inputs.push(id.clone());
            false
        } else {
            true
        }
    });
    pass.ctx.tasks = tasks;

    for (event, ids) in [
        ("TaskSpecimenUnresolved", &specimen_unresolved),
        ("TaskWithoutOutputs", &without_outputs),
        ("TaskWithoutInputs", &without_inputs),
    ] {
        if !ids.is_empty() {
            let examples: Vec<&String> = ids.iter().take(REPORTED_EXAMPLES).collect();
            pass.warn_once(event, vec![json!(ids.len()), json!(examples)]);
        }
    }
    Ok(())
}

pub(super) fn ensure_tasks_linked_to_documents(pass: &mut Pass<'_>) -> NormalizeResult<()> {
    link_documents(pass, SpecimenHeuristic::GLOBAL)
}

pub(super) fn ensure_tasks_linked_to_documents_cmg(pass: &mut Pass<'_>) -> NormalizeResult<()> {
    link_documents(pass, SpecimenHeuristic::CMG)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::WorkspaceRecord;
    use crate::normalize::{HarmonizerConfig, MemoryBlobCatalog};
    use crate::report::ErrorSink;
    use crate::rules::Handler;

    fn create_test_graph() -> WorkspaceGraph {
        WorkspaceGraph::new(WorkspaceRecord {
            name: "ws".into(),
            consortium: "CMG".into(),
            attributes: Default::default(),
        })
        .with_entity(RawEntity::new("subject", "P1"))
        .with_entity(RawEntity::new("sample", "S1").with_attribute("bam", "gs://b/S1.bam"))
        .with_entity(RawEntity::new("sample", "S2"))
    }

    fn create_test_context(task_types: &[&str]) -> NormalizationContext {
        let mut ctx = NormalizationContext::new();
        ctx.patient_entity_names = vec!["subject".into()];
        ctx.specimen_entity_name = Some("sample".into());
        ctx.task_entity_names = task_types.iter().map(|t| t.to_string()).collect();
        ctx.bucket_fields.insert("sample".into(), ["bam".to_string()].into());
        ctx.specimen_patients.insert("S1".into(), "P1".into());
        ctx.specimen_patients.insert("S2".into(), "P1".into());
        ctx
    }

    fn run(
        graph: &WorkspaceGraph,
        ctx: &mut NormalizationContext,
        steps: &[Handler],
    ) -> ErrorSink {
        let config = HarmonizerConfig::builtin();
        let blobs = MemoryBlobCatalog::default();
        let mut sink = ErrorSink::new();
        let mut pass = Pass::new(graph, &config, &blobs, ctx, &mut sink);
        for step in steps {
            step(&mut pass).unwrap();
        }
        sink
    }

    #[test]
    fn implied_tasks_keep_only_specimens_with_documents() {
        let graph = create_test_graph();
        let mut ctx = create_test_context(&[IMPLIED_TASK]);

        let sink = run(
            &graph,
            &mut ctx,
            &[ensure_tasks, ensure_tasks_populated, ensure_tasks_linked_to_documents],
        );

        assert_eq!(ctx.tasks.len(), 1);
        let task = &ctx.tasks["_implied/S1"];
        assert_eq!(task.inputs, vec![TaskInput::specimen("sample", "S1")]);
        assert_eq!(task.outputs.len(), 1);
        assert_eq!(task.outputs[0].url, "gs://b/S1.bam");
        assert_eq!(task.outputs[0].field, "bam");
        assert_eq!(sink.count("TaskWithoutOutputs"), 1);
        assert_eq!(sink.entries()["TaskWithoutOutputs"][0].details[0], json!(1));
    }

    #[test]
    fn explicit_tasks_collect_inputs_and_carrier_outputs() {
        let graph = create_test_graph()
            .with_entity(
                RawEntity::new("sequencing", "SEQ1")
                    .with_attribute("sample", json!({"entityType": "sample", "entityName": "S2"}))
                    .with_attribute("missing", json!({"entityType": "sample", "entityName": "S9"})),
            )
            .with_entity(
                RawEntity::new("file", "F1")
                    .with_attribute("sequencing", "SEQ1")
                    .with_attribute("path", "gs://b/SEQ1.cram"),
            );
        let mut ctx = create_test_context(&["sequencing"]);
        ctx.inverted_config.insert("sequencing".into(), Role::Task);
        ctx.bucket_fields.insert("file".into(), ["path".to_string()].into());

        let sink = run(
            &graph,
            &mut ctx,
            &[ensure_tasks, ensure_tasks_populated, ensure_tasks_linked_to_documents],
        );

        let task = &ctx.tasks["sequencing/SEQ1"];
        assert_eq!(task.inputs, vec![TaskInput::specimen("sample", "S2")]);
        assert_eq!(task.outputs.len(), 1);
        assert_eq!(task.outputs[0].source_type, "file");
        assert_eq!(sink.count("TaskInputNotFound"), 1);
    }

    #[test]
    fn heuristics_recover_missing_specimen() {
        let graph = create_test_graph()
            .with_entity(
                RawEntity::new("sample", "S3").with_attribute("collaborator_sample_id", "COLLAB-3"),
            )
            .with_entity(
                RawEntity::new("sequencing", "SEQ3")
                    .with_attribute("collaborator_sample_id", "COLLAB-3")
                    .with_attribute("cram", "gs://b/S2.cram"),
            );
        let mut ctx = create_test_context(&["sequencing"]);
        ctx.bucket_fields.insert("sequencing".into(), ["cram".to_string()].into());

        run(
            &graph,
            &mut ctx,
            &[ensure_tasks, ensure_tasks_populated, ensure_tasks_linked_to_documents_cmg],
        );
        assert_eq!(ctx.tasks["sequencing/SEQ3"].inputs[0].name, "S3");

        // The output basename alone points at a different specimen
        let mut ctx = create_test_context(&["sequencing"]);
        ctx.bucket_fields.insert("sequencing".into(), ["cram".to_string()].into());
        let config = HarmonizerConfig::builtin();
        let blobs = MemoryBlobCatalog::default();
        let mut sink = ErrorSink::new();
        let mut pass = Pass::new(&graph, &config, &blobs, &mut ctx, &mut sink);
        ensure_tasks(&mut pass).unwrap();
        link_documents(&mut pass, &[SpecimenHeuristic::OutputBasename]).unwrap();
        assert_eq!(ctx.tasks["sequencing/SEQ3"].inputs[0].name, "S2");
    }

    #[test]
    fn tasks_without_a_specimen_are_dropped() {
        let graph = create_test_graph().with_entity(
            RawEntity::new("sequencing", "SEQ4").with_attribute("cram", "gs://b/unknown.cram"),
        );
        let mut ctx = create_test_context(&["sequencing"]);
        ctx.bucket_fields.insert("sequencing".into(), ["cram".to_string()].into());

        let sink = run(
            &graph,
            &mut ctx,
            &[ensure_tasks, ensure_tasks_populated, ensure_tasks_linked_to_documents],
        );

        assert!(ctx.tasks.is_empty());
        assert_eq!(sink.count("TaskSpecimenUnresolved"), 1);
        assert_eq!(sink.count("TaskWithoutInputs"), 1);
        assert!(ctx.tasks.values().all(CanonicalTask::is_complete));
    }

    #[test]
    fn other_inputs_do_not_stand_in_for_a_specimen() {
        let graph = create_test_graph()
            .with_entity(RawEntity::new("library", "L1"))
            .with_entity(
                RawEntity::new("sequencing", "SEQ1")
                    .with_attribute("library", json!({"entityType": "library", "entityName": "L1"}))
                    .with_attribute("cram", "gs://b/SEQ1.cram"),
            );
        let mut ctx = create_test_context(&["sequencing"]);
        ctx.bucket_fields.insert("sequencing".into(), ["cram".to_string()].into());

        let sink = run(
            &graph,
            &mut ctx,
            &[ensure_tasks, ensure_tasks_populated, ensure_tasks_linked_to_documents],
        );

        assert!(!ctx.tasks.contains_key("sequencing/SEQ1"));
        assert_eq!(sink.count("TaskSpecimenUnresolved"), 1);
        assert_eq!(sink.count("TaskWithoutInputs"), 1);
        assert_eq!(
            sink.entries()["TaskWithoutInputs"][0].details[1],
            json!(["sequencing/SEQ1"])
        );
    }
}
