//! Built-in normalization handlers and the overrides that specialize them

mod aliases;
mod blobs;
mod buckets;
mod linkage;
mod patients;
mod practitioner;
mod tasks;

pub use buckets::{bucket_urls, is_bucket_url};
pub use linkage::LinkStrategy;
pub use patients::Extractors;
pub use tasks::SpecimenHeuristic;

use crate::rules::{Operation, RuleRegistry, Scope};

/// Workspace whose first sampled children lack the bucket fields later ones carry
const CMG_BAYLOR_HOPKINS: &str = "AnVIL_CMG_BaylorHopkins_HMB-IRB-NPU_WES";

/// Register a global handler for every pipeline operation
pub fn register_defaults(registry: &mut RuleRegistry) {
    let defaults: [(Operation, crate::rules::Handler); 12] = [
        (Operation::ConsortiumConfig, aliases::consortium_config),
        (Operation::Practitioner, practitioner::practitioner),
        (Operation::EnsureBucketFields, buckets::ensure_bucket_fields),
        (Operation::PatientEntityNames, aliases::patient_entity_names),
        (Operation::SpecimenEntityName, aliases::specimen_entity_name),
        (Operation::LinkSpecimenToPatient, linkage::link_specimen_to_patient),
        (Operation::TaskEntityNames, aliases::task_entity_names),
        (Operation::EnsureTasks, tasks::ensure_tasks),
        (Operation::EnsureTasksPopulated, tasks::ensure_tasks_populated),
        (
            Operation::EnsureTasksLinkedToDocuments,
            tasks::ensure_tasks_linked_to_documents,
        ),
        (Operation::BlobAttributes, blobs::blob_attributes),
        (Operation::PatientModel, patients::patient_model),
    ];
    for (operation, handler) in defaults {
        registry.register(Scope::Global, operation, handler);
    }
}

/// Register the consortium- and workspace-specific overrides
pub fn register_overrides(registry: &mut RuleRegistry) {
    registry.register(
        Scope::workspace("CMG", CMG_BAYLOR_HOPKINS),
        Operation::EnsureBucketFields,
        buckets::ensure_bucket_fields_all_children,
    );
    registry.register(
        Scope::consortium("CMG"),
        Operation::EnsureTasksLinkedToDocuments,
        tasks::ensure_tasks_linked_to_documents_cmg,
    );

    registry.register(
        Scope::consortium("CCDG"),
        Operation::LinkSpecimenToPatient,
        linkage::link_specimen_to_patient_ccdg,
    );
    registry.register(
        Scope::consortium("CCDG"),
        Operation::PatientModel,
        patients::patient_model_ccdg,
    );

    registry.register(
        Scope::consortium("GTEx"),
        Operation::LinkSpecimenToPatient,
        linkage::link_specimen_to_patient_gtex,
    );
    registry.register(
        Scope::consortium("GTEx"),
        Operation::PatientModel,
        patients::patient_model_gtex,
    );
}
