//! Final assembly of the patient model
//!
//! Builds one [`CanonicalPatient`] per patient entity, runs the consortium's
//! [`Extractors`] over it, hangs linked specimens off their patient and
//! records which tasks consumed each specimen.

use crate::model::{
    CanonicalPatient, CanonicalSpecimen, FamilyRelationship, Gender, RawEntity, Relation,
};
use crate::normalize::{NormalizeResult, Pass, Precondition};
use serde_json::{json, Value};
use std::collections::BTreeMap;

const REPORTED_EXAMPLES: usize = 5;

const PATIENT_ALIAS_KEYS: [&str; 3] = ["collaborator_participant_id", "participant_id", "subject_id"];
const SPECIMEN_ALIAS_KEYS: [&str; 3] = ["collaborator_sample_id", "sample_alias", "sample_id"];

/// PED-style placeholder for "unknown parent"
const PED_MISSING: &str = "0";

/// Consortium-specific fact extractors run over each patient entity
#[derive(Clone, Copy)]
pub struct Extractors {
    pub gender: fn(&RawEntity) -> Option<Gender>,
    pub phenotypes: fn(&RawEntity) -> Vec<String>,
    pub diseases: fn(&RawEntity) -> Vec<String>,
    pub family: fn(&RawEntity) -> Vec<FamilyRelationship>,
}

impl Extractors {
    pub const DEFAULT: Extractors = Extractors {
        gender,
        phenotypes,
        diseases,
        family,
    };

    pub const CCDG: Extractors = Extractors {
        diseases: diseases_ccdg,
        ..Extractors::DEFAULT
    };

    pub const GTEX: Extractors = Extractors {
        gender: gender_gtex,
        ..Extractors::DEFAULT
    };

    fn apply(&self, entity: &RawEntity) -> CanonicalPatient {
        let mut patient = CanonicalPatient::new(entity.entity_type.clone(), entity.name.clone());
        patient.attributes = entity.attributes.clone();
        patient.gender = (self.gender)(entity);
        patient.phenotypes = (self.phenotypes)(entity);
        patient.diseases = (self.diseases)(entity);
        patient.family = (self.family)(entity);
        patient
    }
}

fn parse_gender(text: &str) -> Gender {
    match text.to_lowercase().as_str() {
        "male" | "m" => Gender::Male,
        "female" | "f" => Gender::Female,
        "unknown" | "u" | "not reported" => Gender::Unknown,
        _ => Gender::Other,
    }
}

fn gender(entity: &RawEntity) -> Option<Gender> {
    ["gender", "sex", "reported_sex"]
        .iter()
        .find_map(|k| entity.text(k))
        .map(|text| parse_gender(&text))
}

/// GTEx codes sex as 1 (male) and 2 (female)
fn gender_gtex(entity: &RawEntity) -> Option<Gender> {
    let text = ["sex", "gender"].iter().find_map(|k| entity.text(k))?;
    Some(match text.as_str() {
        "1" => Gender::Male,
        "2" => Gender::Female,
        other => parse_gender(other),
    })
}

/// Values of `keys`, split on `|` and `,`, trimmed and deduplicated in order
fn split_values(entity: &RawEntity, keys: &[&str]) -> Vec<String> {
    let mut values: Vec<String> = Vec::new();
    for key in keys {
        let raw: Vec<String> = match entity.attribute(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            Some(_) => entity.text(key).into_iter().collect(),
            None => Vec::new(),
        };
        for text in raw {
            for part in text.split(['|', ',']) {
                let part = part.trim();
                if !part.is_empty() && !values.iter().any(|v| v == part) {
                    values.push(part.to_string());
                }
            }
        }
    }
    values
}

fn phenotypes(entity: &RawEntity) -> Vec<String> {
    split_values(entity, &["hpo_present", "phenotype", "phenotype_description"])
}

fn diseases(entity: &RawEntity) -> Vec<String> {
    split_values(entity, &["disease_id", "disease_description", "diagnosis"])
}

fn diseases_ccdg(entity: &RawEntity) -> Vec<String> {
    split_values(
        entity,
        &["disease_id", "disease_description", "diagnosis", "phenotype_group"],
    )
}

fn family(entity: &RawEntity) -> Vec<FamilyRelationship> {
    let lookups: [(Relation, &[&str]); 3] = [
        (Relation::FamilyMember, &["family_id"]),
        (Relation::Father, &["paternal_id", "father"]),
        (Relation::Mother, &["maternal_id", "mother"]),
    ];
    lookups
        .iter()
        .filter_map(|(relation, keys)| {
            let target = keys.iter().find_map(|k| entity.text(k))?;
            (target != PED_MISSING).then(|| FamilyRelationship {
                relation: *relation,
                target,
            })
        })
        .collect()
}

fn aliases_of(entity: &RawEntity, keys: &[&str]) -> Vec<String> {
    let mut aliases = Vec::new();
    for key in keys {
        if let Some(alias) = entity.text(key) {
            if alias != entity.name && !aliases.contains(&alias) {
                aliases.push(alias);
            }
        }
    }
    aliases
}

fn assemble(pass: &mut Pass<'_>, extractors: &Extractors) -> NormalizeResult<()> {
    let graph = pass.graph;
    let specimen_type = pass.ctx.specimen_type()?.to_string();

    let mut patients: BTreeMap<String, CanonicalPatient> = BTreeMap::new();
    let mut patient_aliases: BTreeMap<String, String> = BTreeMap::new();
    for patient_type in pass.ctx.patient_entity_names.clone() {
        for entity in graph.entities(&patient_type) {
            if patients.contains_key(&entity.name) {
                pass.sink.warn(
                    "DuplicatePatient",
                    vec![json!(patient_type), json!(entity.name)],
                );
                continue;
            }
            for alias in aliases_of(entity, &PATIENT_ALIAS_KEYS) {
                patient_aliases.entry(alias).or_insert_with(|| entity.name.clone());
            }
            patients.insert(entity.name.clone(), extractors.apply(entity));
        }
    }
    patient_aliases.retain(|alias, _| !patients.contains_key(alias));

    if patients.is_empty() {
        return Err(pass.abandon(Precondition::NoPatients));
    }

    // specimen name → ids of tasks that consumed it
    let mut specimen_tasks: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for task in pass.ctx.tasks.values() {
        for input in task.specimen_inputs() {
            specimen_tasks
                .entry(input.name.clone())
                .or_default()
                .push(task.id.clone());
        }
    }

    let mut unlinked_specimens: Vec<String> = Vec::new();
    let mut attached = 0usize;
    for (specimen_name, patient_ref) in &pass.ctx.specimen_patients {
        let owner = if patients.contains_key(patient_ref) {
            Some(patient_ref.clone())
        } else {
            patient_aliases.get(patient_ref).cloned()
        };
        let (Some(owner), Some(entity)) = (owner, graph.entity(&specimen_type, specimen_name)) else {
            unlinked_specimens.push(specimen_name.clone());
            continue;
        };
        let Some(patient) = patients.get_mut(&owner) else {
            continue;
        };

        let mut aliases = vec![entity.name.clone()];
        aliases.extend(aliases_of(entity, &SPECIMEN_ALIAS_KEYS));
        patient.attach_specimen(CanonicalSpecimen {
            id: entity.name.clone(),
            entity_type: entity.entity_type.clone(),
            patient: owner,
            aliases,
            attributes: entity.attributes.clone(),
            tasks: specimen_tasks.remove(specimen_name).unwrap_or_default(),
        });
        attached += 1;
    }

    let orphan_tasks: Vec<String> = specimen_tasks.into_values().flatten().collect();
    let empty_patients: Vec<&String> = patients
        .iter()
        .filter(|(_, p)| p.specimens.is_empty())
        .map(|(key, _)| key)
        .collect();

    for (event, keys) in [
        ("SpecimenPatientNotFound", unlinked_specimens.iter().collect::<Vec<_>>()),
        ("TaskSpecimenNotFound", orphan_tasks.iter().collect()),
        ("PatientWithoutSpecimens", empty_patients),
    ] {
        if !keys.is_empty() {
            let examples: Vec<&&String> = keys.iter().take(REPORTED_EXAMPLES).collect();
            pass.warn_once(event, vec![json!(keys.len()), json!(examples)]);
        }
    }

    if attached == 0 {
        return Err(pass.abandon(Precondition::NoSpecimenLinks));
    }

    tracing::debug!(
        workspace = pass.workspace(),
        patients = patients.len(),
        specimens = attached,
        "assembled patient model"
    );
    pass.ctx.patients = patients;
    pass.ctx.patient_aliases = patient_aliases;
    Ok(())
}

pub(super) fn patient_model(pass: &mut Pass<'_>) -> NormalizeResult<()> {
    assemble(pass, &Extractors::DEFAULT)
}

pub(super) fn patient_model_ccdg(pass: &mut Pass<'_>) -> NormalizeResult<()> {
    assemble(pass, &Extractors::CCDG)
}

pub(super) fn patient_model_gtex(pass: &mut Pass<'_>) -> NormalizeResult<()> {
    assemble(pass, &Extractors::GTEX)
}
