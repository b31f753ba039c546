//! Per-workspace mutable state threaded through every normalization step

use super::config::AliasTable;
use super::{NormalizeError, NormalizeResult};
use crate::model::{CanonicalPatient, CanonicalTask, Practitioner, Role};
use std::collections::{BTreeMap, BTreeSet};

/// Scoped state for one workspace's pipeline run.
///
/// Each field is populated by the step named after it; later steps read what
/// earlier ones wrote. Not shared across workspaces or threads.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizationContext {
    pub consortium_config: Option<AliasTable>,
    /// Alias → canonical role
    pub inverted_config: BTreeMap<String, Role>,
    pub practitioner: Option<Practitioner>,
    pub patient_entity_names: Vec<String>,
    pub specimen_entity_name: Option<String>,
    pub task_entity_names: Vec<String>,
    /// Entity type → attributes holding object-storage URIs
    pub bucket_fields: BTreeMap<String, BTreeSet<String>>,
    /// Event names already reported for this workspace
    pub logged_already: BTreeSet<String>,
    /// Specimen name → patient key it was linked to
    pub specimen_patients: BTreeMap<String, String>,
    pub tasks: BTreeMap<String, CanonicalTask>,
    pub patients: BTreeMap<String, CanonicalPatient>,
    /// Patient alias → natural key
    pub patient_aliases: BTreeMap<String, String>,
}

impl NormalizationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alias_table(&self) -> NormalizeResult<&AliasTable> {
        self.consortium_config
            .as_ref()
            .ok_or(NormalizeError::StepOrder("consortium_config"))
    }

    pub fn specimen_type(&self) -> NormalizeResult<&str> {
        self.specimen_entity_name
            .as_deref()
            .ok_or(NormalizeError::StepOrder("specimen_entity_name"))
    }

    /// Canonical role of a raw entity type, if the alias table knows it
    pub fn role_of(&self, entity_type: &str) -> Option<Role> {
        if self.patient_entity_names.iter().any(|t| t == entity_type) {
            return Some(Role::Patient);
        }
        if self.specimen_entity_name.as_deref() == Some(entity_type) {
            return Some(Role::Specimen);
        }
        self.inverted_config.get(entity_type).copied()
    }

    pub fn is_patient_type(&self, entity_type: &str) -> bool {
        self.patient_entity_names.iter().any(|t| t == entity_type)
    }

    /// Bucket fields known for `entity_type`, empty when none were found
    pub fn bucket_fields_of(&self, entity_type: &str) -> impl Iterator<Item = &String> {
        self.bucket_fields
            .get(entity_type)
            .into_iter()
            .flat_map(|fields| fields.iter())
    }

    /// Record `event` as reported. Returns false if it already was.
    pub fn first_report(&mut self, event: &str) -> bool {
        self.logged_already.insert(event.to_string())
    }
}
