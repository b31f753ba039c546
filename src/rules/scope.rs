//! Rule scopes and the operations rules are registered for

use std::fmt;
use std::str::FromStr;

/// Where a rule applies, from most to least specific.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Scope {
    /// One workspace of one consortium (`consortium/workspace/op`)
    Workspace { consortium: String, workspace: String },
    /// Every workspace of a consortium (`consortium//op`)
    Consortium(String),
    /// A workspace name regardless of consortium (`/workspace/op`)
    WorkspaceName(String),
    /// Everything (`//op`)
    Global,
}

impl Scope {
    pub fn workspace(consortium: impl Into<String>, workspace: impl Into<String>) -> Self {
        Scope::Workspace {
            consortium: consortium.into(),
            workspace: workspace.into(),
        }
    }

    pub fn consortium(consortium: impl Into<String>) -> Self {
        Scope::Consortium(consortium.into())
    }

    /// The four scopes consulted for a `(consortium, workspace)` pair, in
    /// resolution order.
    pub fn candidates(consortium: &str, workspace: &str) -> [Scope; 4] {
        [
            Scope::workspace(consortium, workspace),
            Scope::Consortium(consortium.to_string()),
            Scope::WorkspaceName(workspace.to_string()),
            Scope::Global,
        ]
    }

    /// 0 for the most specific scope, 3 for global
    pub fn rank(&self) -> u8 {
        match self {
            Scope::Workspace { .. } => 0,
            Scope::Consortium(_) => 1,
            Scope::WorkspaceName(_) => 2,
            Scope::Global => 3,
        }
    }

    /// Build a scope from the consortium and workspace parts of a rule key.
    /// Empty parts widen the scope.
    pub fn from_parts(consortium: &str, workspace: &str) -> Self {
        match (consortium.is_empty(), workspace.is_empty()) {
            (false, false) => Scope::workspace(consortium, workspace),
            (false, true) => Scope::Consortium(consortium.to_string()),
            (true, false) => Scope::WorkspaceName(workspace.to_string()),
            (true, true) => Scope::Global,
        }
    }

    /// The `consortium/workspace` prefix of this scope's rule key
    pub fn key_prefix(&self) -> String {
        match self {
            Scope::Workspace { consortium, workspace } => format!("{}/{}", consortium, workspace),
            Scope::Consortium(c) => format!("{}/", c),
            Scope::WorkspaceName(w) => format!("/{}", w),
            Scope::Global => "/".to_string(),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key_prefix())
    }
}

/// The named normalization operations, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Operation {
    ConsortiumConfig,
    Practitioner,
    EnsureBucketFields,
    PatientEntityNames,
    SpecimenEntityName,
    LinkSpecimenToPatient,
    TaskEntityNames,
    EnsureTasks,
    EnsureTasksPopulated,
    EnsureTasksLinkedToDocuments,
    BlobAttributes,
    PatientModel,
}

impl Operation {
    /// Every operation, in the order the normalizer runs them
    pub const PIPELINE: [Operation; 12] = [
        Operation::ConsortiumConfig,
        Operation::Practitioner,
        Operation::EnsureBucketFields,
        Operation::PatientEntityNames,
        Operation::SpecimenEntityName,
        Operation::LinkSpecimenToPatient,
        Operation::TaskEntityNames,
        Operation::EnsureTasks,
        Operation::EnsureTasksPopulated,
        Operation::EnsureTasksLinkedToDocuments,
        Operation::BlobAttributes,
        Operation::PatientModel,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::ConsortiumConfig => "consortium_config",
            Operation::Practitioner => "practitioner",
            Operation::EnsureBucketFields => "ensure_bucket_fields",
            Operation::PatientEntityNames => "patient_entity_names",
            Operation::SpecimenEntityName => "specimen_entity_name",
            Operation::LinkSpecimenToPatient => "link_specimen_to_patient",
            Operation::TaskEntityNames => "task_entity_names",
            Operation::EnsureTasks => "ensure_tasks",
            Operation::EnsureTasksPopulated => "ensure_tasks_populated",
            Operation::EnsureTasksLinkedToDocuments => "ensure_tasks_linked_to_documents",
            Operation::BlobAttributes => "blob_attributes",
            Operation::PatientModel => "patient_model",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operation::PIPELINE
            .iter()
            .copied()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| format!("unknown operation: {}", s))
    }
}

/// The full `consortium/workspace/operation` key of a rule
pub fn rule_key(scope: &Scope, operation: Operation) -> String {
    format!("{}/{}", scope.key_prefix(), operation)
}

/// Split a `consortium/workspace/operation` key into scope and operation
pub fn parse_rule_key(key: &str) -> Result<(Scope, Operation), String> {
    let parts: Vec<&str> = key.split('/').collect();
    let [consortium, workspace, operation] = parts.as_slice() else {
        return Err(format!(
            "rule key must look like consortium/workspace/operation: {}",
            key
        ));
    };
    Ok((Scope::from_parts(consortium, workspace), operation.parse()?))
}
