//! The reconciled Patient → Specimen → Task → Document model

use super::entity::Attributes;
use crate::report::ErrorReport;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Canonical role a raw entity type can be mapped onto
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Role {
    Patient,
    Specimen,
    Task,
    Document,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Patient, Role::Specimen, Role::Task, Role::Document];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Patient => "Patient",
            Role::Specimen => "Specimen",
            Role::Task => "Task",
            Role::Document => "Document",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Principal investigator resolved from workspace attributes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Practitioner {
    pub name: String,
    /// Workspace attribute the name came from
    pub source_attribute: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Other,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    Father,
    Mother,
    FamilyMember,
}

/// A family link from a patient to another individual or a family id
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FamilyRelationship {
    pub relation: Relation,
    pub target: String,
}

/// A blob produced by a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalDocument {
    /// Entity type that carried the bucket field
    pub source_type: String,
    /// Entity name that carried the bucket field
    pub source_name: String,
    /// Attribute holding the URI
    pub field: String,
    pub url: String,
    pub size: Option<u64>,
    pub md5: Option<String>,
    pub drs_uri: Option<String>,
    /// False when the blob cache had no record for `url`
    pub resolved: bool,
}

impl CanonicalDocument {
    pub fn new(
        source_type: impl Into<String>,
        source_name: impl Into<String>,
        field: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            source_type: source_type.into(),
            source_name: source_name.into(),
            field: field.into(),
            url: url.into(),
            size: None,
            md5: None,
            drs_uri: None,
            resolved: false,
        }
    }
}

/// A reference to an entity consumed by a task
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskInput {
    pub role: Option<Role>,
    pub entity_type: String,
    pub name: String,
}

impl TaskInput {
    pub fn specimen(entity_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            role: Some(Role::Specimen),
            entity_type: entity_type.into(),
            name: name.into(),
        }
    }
}

/// Entity type of tasks synthesized one per specimen
pub const IMPLIED_TASK: &str = "_implied";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalTask {
    pub id: String,
    pub entity_type: String,
    pub name: String,
    #[serde(default)]
    pub attributes: Attributes,
    pub inputs: Vec<TaskInput>,
    pub outputs: Vec<CanonicalDocument>,
}

impl CanonicalTask {
    pub fn new(entity_type: impl Into<String>, name: impl Into<String>) -> Self {
        let entity_type = entity_type.into();
        let name = name.into();
        Self {
            id: format!("{}/{}", entity_type, name),
            entity_type,
            name,
            attributes: Attributes::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn is_implied(&self) -> bool {
        self.entity_type == IMPLIED_TASK
    }

    pub fn specimen_inputs(&self) -> impl Iterator<Item = &TaskInput> {
        self.inputs.iter().filter(|i| i.role == Some(Role::Specimen))
    }

    pub fn has_specimen_input(&self) -> bool {
        self.specimen_inputs().next().is_some()
    }

    /// Retained tasks consume at least one specimen and produce one output
    pub fn is_complete(&self) -> bool {
        self.has_specimen_input() && !self.outputs.is_empty()
    }

    /// Add an input unless an identical one is present
    pub fn add_input(&mut self, input: TaskInput) {
        if !self.inputs.contains(&input) {
            self.inputs.push(input);
        }
    }

    /// Add an output unless one with the same URL is present
    pub fn add_output(&mut self, output: CanonicalDocument) {
        if !self.outputs.iter().any(|o| o.url == output.url) {
            self.outputs.push(output);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalSpecimen {
    pub id: String,
    pub entity_type: String,
    pub patient: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub attributes: Attributes,
    /// Ids of tasks that consumed this specimen
    #[serde(default)]
    pub tasks: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalPatient {
    pub id: String,
    pub entity_type: String,
    #[serde(default)]
    pub attributes: Attributes,
    pub gender: Option<Gender>,
    #[serde(default)]
    pub phenotypes: Vec<String>,
    #[serde(default)]
    pub diseases: Vec<String>,
    #[serde(default)]
    pub family: Vec<FamilyRelationship>,
    /// Keyed by specimen primary name
    #[serde(default)]
    pub specimens: BTreeMap<String, CanonicalSpecimen>,
    /// Known alias → specimen primary name
    #[serde(default)]
    pub specimen_aliases: BTreeMap<String, String>,
}

impl CanonicalPatient {
    pub fn new(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            entity_type: entity_type.into(),
            attributes: Attributes::new(),
            gender: None,
            phenotypes: Vec::new(),
            diseases: Vec::new(),
            family: Vec::new(),
            specimens: BTreeMap::new(),
            specimen_aliases: BTreeMap::new(),
        }
    }

    /// Look a specimen up by primary name or alias
    pub fn specimen(&self, key: &str) -> Option<&CanonicalSpecimen> {
        self.specimens.get(key).or_else(|| {
            self.specimen_aliases
                .get(key)
                .and_then(|primary| self.specimens.get(primary))
        })
    }

    pub fn attach_specimen(&mut self, specimen: CanonicalSpecimen) {
        for alias in &specimen.aliases {
            if alias != &specimen.id {
                self.specimen_aliases
                    .insert(alias.clone(), specimen.id.clone());
            }
        }
        self.specimens.insert(specimen.id.clone(), specimen);
    }
}

/// One workspace's reconciled graph, as handed to the renderer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalWorkspace {
    pub consortium: String,
    pub name: String,
    pub practitioner: Option<Practitioner>,
    /// Keyed by patient natural key
    pub patients: BTreeMap<String, CanonicalPatient>,
    /// Known alias → patient natural key
    #[serde(default)]
    pub patient_aliases: BTreeMap<String, String>,
    pub tasks: BTreeMap<String, CanonicalTask>,
    pub errors: ErrorReport,
}

impl CanonicalWorkspace {
    pub fn new(consortium: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            consortium: consortium.into(),
            name: name.into(),
            practitioner: None,
            patients: BTreeMap::new(),
            patient_aliases: BTreeMap::new(),
            tasks: BTreeMap::new(),
            errors: ErrorReport::default(),
        }
    }

    /// Look a patient up by natural key or alias
    pub fn patient(&self, key: &str) -> Option<&CanonicalPatient> {
        self.patients.get(key).or_else(|| {
            self.patient_aliases
                .get(key)
                .and_then(|primary| self.patients.get(primary))
        })
    }

    pub fn specimen_count(&self) -> usize {
        self.patients.values().map(|p| p.specimens.len()).sum()
    }
}
