//! Alias tables and normalizer configuration
//!
//! Each consortium maps its raw entity types onto the canonical roles. Tables
//! are written in YAML:
//!
//! ```yaml
//! consortiums:
//!   CMG:
//!     Patient:  { aliases: [subject, participant] }
//!     Specimen: { aliases: [sample] }
//!     Task:     { aliases: [sequencing] }
//! default:
//!   Patient: { aliases: [subject] }
//! ```

use crate::model::Role;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAliases {
    #[serde(default)]
    pub aliases: Vec<String>,
}

/// Raw entity types playing each canonical role for one consortium
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasTable {
    #[serde(rename = "Patient", default)]
    pub patient: RoleAliases,
    #[serde(rename = "Specimen", default)]
    pub specimen: RoleAliases,
    #[serde(rename = "Task", default)]
    pub task: RoleAliases,
    #[serde(rename = "Document", default)]
    pub document: RoleAliases,
}

impl AliasTable {
    pub fn new(patient: &[&str], specimen: &[&str], task: &[&str], document: &[&str]) -> Self {
        let aliases = |names: &[&str]| RoleAliases {
            aliases: names.iter().map(|s| s.to_string()).collect(),
        };
        Self {
            patient: aliases(patient),
            specimen: aliases(specimen),
            task: aliases(task),
            document: aliases(document),
        }
    }

    pub fn aliases(&self, role: Role) -> &[String] {
        match role {
            Role::Patient => &self.patient.aliases,
            Role::Specimen => &self.specimen.aliases,
            Role::Task => &self.task.aliases,
            Role::Document => &self.document.aliases,
        }
    }

    /// Alias → role. Each role's own lowercase name maps to it as well.
    pub fn inverted(&self) -> BTreeMap<String, Role> {
        let mut inverted = BTreeMap::new();
        for role in Role::ALL {
            inverted.insert(role.as_str().to_lowercase(), role);
            for alias in self.aliases(role) {
                inverted.insert(alias.clone(), role);
            }
        }
        inverted
    }

    fn validate(&self, name: &str) -> Result<(), ConfigError> {
        let mut seen: BTreeMap<&str, Role> = BTreeMap::new();
        for role in Role::ALL {
            for alias in self.aliases(role) {
                if let Some(previous) = seen.insert(alias.as_str(), role) {
                    return Err(ConfigError::Invalid(format!(
                        "{}: alias '{}' is listed under both {} and {}",
                        name, alias, previous, role
                    )));
                }
            }
        }
        Ok(())
    }
}

fn default_practitioner_attributes() -> Vec<String> {
    [
        "library:PI",
        "PI",
        "library:datasetOwner",
        "library:contactEmail",
        "library:institute",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Everything the normalizer reads besides the entity graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarmonizerConfig {
    #[serde(default)]
    pub consortiums: BTreeMap<String, AliasTable>,
    /// Used for consortiums without their own table
    #[serde(default)]
    pub default: Option<AliasTable>,
    /// Workspace attributes naming the principal investigator, tried in order
    #[serde(default = "default_practitioner_attributes")]
    pub practitioner_attributes: Vec<String>,
}

impl HarmonizerConfig {
    /// The alias tables for the consortiums currently harvested
    pub fn builtin() -> Self {
        let mut consortiums = BTreeMap::new();
        consortiums.insert(
            "CMG".to_string(),
            AliasTable::new(&["subject", "participant"], &["sample"], &["sequencing"], &[]),
        );
        consortiums.insert(
            "CCDG".to_string(),
            AliasTable::new(&["subject"], &["sample"], &[], &["qc_result_sample"]),
        );
        consortiums.insert(
            "GTEx".to_string(),
            AliasTable::new(&["subject", "participant"], &["sample", "tissue_sample"], &[], &[]),
        );
        consortiums.insert(
            "NHGRI".to_string(),
            AliasTable::new(&["subject"], &["sample"], &[], &[]),
        );
        consortiums.insert(
            "NIMH".to_string(),
            AliasTable::new(&["subject", "participant"], &["sample"], &["sequencing"], &["file"]),
        );

        Self {
            consortiums,
            default: Some(AliasTable::new(
                &["subject", "participant", "patient", "donor"],
                &["sample", "specimen", "biosample"],
                &["sequencing", "sequencing_run", "assay"],
                &["file", "sequencing_file"],
            )),
            practitioner_attributes: default_practitioner_attributes(),
        }
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&yaml)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (name, table) in &self.consortiums {
            table.validate(name)?;
        }
        if let Some(default) = &self.default {
            default.validate("default")?;
        }
        Ok(())
    }

    /// The consortium's own table, else the default table
    pub fn table_for(&self, consortium: &str) -> Option<&AliasTable> {
        self.consortiums.get(consortium).or(self.default.as_ref())
    }
}

impl Default for HarmonizerConfig {
    fn default() -> Self {
        Self::builtin()
    }
}
