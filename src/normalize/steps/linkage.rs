//! Specimen → patient linkage
//!
//! Each consortium points specimens at their patient differently. A
//! [`LinkStrategy`] extracts candidate patient keys from one specimen; the
//! strategies for a consortium are tried in a fixed order and the first
//! candidate naming a known patient wins.

use crate::model::{EntityRef, RawEntity, WorkspaceGraph};
use crate::normalize::{NormalizationContext, NormalizeResult, Pass, Precondition};
use serde_json::json;
use std::fmt;

/// Unresolved specimen names included in the warning
const REPORTED_EXAMPLES: usize = 5;

const PFB_KEYS: [&str; 4] = ["pfb:subject", "pfb:participant", "pfb:subjects", "pfb:participants"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStrategy {
    /// Typed references to a patient entity in any attribute
    Reference,
    /// The `subject` attribute
    Subject,
    /// `participant_id` or `participant`
    ParticipantId,
    /// `subject_id`, `participant_id_1`, `subject_2` and friends
    Numbered,
    /// PFB-exported `pfb:subject` style references
    Pfb,
    /// Follow `qc_result_sample` and apply the direct strategies there
    QcResultSample,
}

impl LinkStrategy {
    const DIRECT: [LinkStrategy; 5] = [
        LinkStrategy::Reference,
        LinkStrategy::Subject,
        LinkStrategy::ParticipantId,
        LinkStrategy::Numbered,
        LinkStrategy::Pfb,
    ];

    pub const GLOBAL: &'static [LinkStrategy] = &Self::DIRECT;

    pub const CCDG: &'static [LinkStrategy] = &[
        LinkStrategy::QcResultSample,
        LinkStrategy::Reference,
        LinkStrategy::Subject,
        LinkStrategy::ParticipantId,
        LinkStrategy::Numbered,
        LinkStrategy::Pfb,
    ];

    pub const GTEX: &'static [LinkStrategy] =
        &[LinkStrategy::Reference, LinkStrategy::Subject, LinkStrategy::Pfb];

    pub fn as_str(&self) -> &'static str {
        match self {
            LinkStrategy::Reference => "reference",
            LinkStrategy::Subject => "subject",
            LinkStrategy::ParticipantId => "participant_id",
            LinkStrategy::Numbered => "numbered",
            LinkStrategy::Pfb => "pfb",
            LinkStrategy::QcResultSample => "qc_result_sample",
        }
    }

    /// Candidate patient keys for `specimen`, most likely first
    pub fn candidates(
        &self,
        specimen: &RawEntity,
        graph: &WorkspaceGraph,
        ctx: &NormalizationContext,
    ) -> Vec<String> {
        match self {
            LinkStrategy::Reference => specimen
                .attributes
                .values()
                .flat_map(EntityRef::typed_in)
                .filter(|r| r.entity_type.as_deref().is_some_and(|t| ctx.is_patient_type(t)))
                .map(|r| r.name)
                .collect(),
            LinkStrategy::Subject => names_in(specimen, ["subject"]),
            LinkStrategy::ParticipantId => names_in(specimen, ["participant_id", "participant"]),
            LinkStrategy::Numbered => {
                let keys: Vec<&str> = specimen
                    .attributes
                    .keys()
                    .map(String::as_str)
                    .filter(|k| is_numbered_key(k))
                    .collect();
                names_in(specimen, keys)
            }
            LinkStrategy::Pfb => names_in(specimen, PFB_KEYS),
            LinkStrategy::QcResultSample => {
                let Some(reference) = specimen
                    .attribute("qc_result_sample")
                    .and_then(EntityRef::first_in)
                else {
                    return Vec::new();
                };
                match graph.resolve(&reference, "qc_result_sample") {
                    Some(qc) => LinkStrategy::DIRECT
                        .iter()
                        .flat_map(|s| s.candidates(qc, graph, ctx))
                        .collect(),
                    None => Vec::new(),
                }
            }
        }
    }
}

impl fmt::Display for LinkStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn names_in<'k>(entity: &RawEntity, keys: impl IntoIterator<Item = &'k str>) -> Vec<String> {
    keys.into_iter()
        .filter_map(|k| entity.attribute(k))
        .flat_map(EntityRef::all_in)
        .map(|r| r.name)
        .collect()
}

/// `(subject|participant)(_id)?(_<digits>)?`
fn is_numbered_key(key: &str) -> bool {
    let Some(rest) = key
        .strip_prefix("subject")
        .or_else(|| key.strip_prefix("participant"))
    else {
        return false;
    };
    let rest = rest.strip_prefix("_id").unwrap_or(rest);
    match rest.strip_prefix('_') {
        Some(digits) => !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()),
        None => rest.is_empty(),
    }
}

fn patient_exists(graph: &WorkspaceGraph, ctx: &NormalizationContext, key: &str) -> bool {
    ctx.patient_entity_names
        .iter()
        .any(|t| graph.entity(t, key).is_some())
}

/// Patient key for one specimen: the first candidate naming an existing
/// patient, else the first candidate found
fn resolve_patient(
    specimen: &RawEntity,
    graph: &WorkspaceGraph,
    ctx: &NormalizationContext,
    strategies: &[LinkStrategy],
) -> Option<String> {
    let candidates: Vec<String> = strategies
        .iter()
        .flat_map(|s| s.candidates(specimen, graph, ctx))
        .collect();
    candidates
        .iter()
        .find(|c| patient_exists(graph, ctx, c))
        .or_else(|| candidates.first())
        .cloned()
}

fn link_with(pass: &mut Pass<'_>, strategies: &[LinkStrategy]) -> NormalizeResult<()> {
    let graph = pass.graph;
    let specimen_type = pass.ctx.specimen_type()?.to_string();
    if !graph.has_type(&specimen_type) {
        return Err(pass.abandon(Precondition::NoSpecimens));
    }

    let mut unresolved = Vec::new();
    for specimen in graph.entities(&specimen_type) {
        match resolve_patient(specimen, graph, pass.ctx, strategies) {
            Some(patient) => {
                pass.ctx
                    .specimen_patients
                    .insert(specimen.name.clone(), patient);
            }
            None => unresolved.push(specimen.name.clone()),
        }
    }

    if !unresolved.is_empty() {
        let examples: Vec<&String> = unresolved.iter().take(REPORTED_EXAMPLES).collect();
        pass.warn_once(
            "UnresolvedSpecimenLink",
            vec![json!(unresolved.len()), json!(examples)],
        );
    }
    if pass.ctx.specimen_patients.is_empty() {
        return Err(pass.abandon(Precondition::NoSpecimenLinks));
    }

    tracing::debug!(
        workspace = pass.workspace(),
        linked = pass.ctx.specimen_patients.len(),
        unresolved = unresolved.len(),
        "linked specimens to patients"
    );
    Ok(())
}

pub(super) fn link_specimen_to_patient(pass: &mut Pass<'_>) -> NormalizeResult<()> {
    link_with(pass, LinkStrategy::GLOBAL)
}

pub(super) fn link_specimen_to_patient_ccdg(pass: &mut Pass<'_>) -> NormalizeResult<()> {
    link_with(pass, LinkStrategy::CCDG)
}

pub(super) fn link_specimen_to_patient_gtex(pass: &mut Pass<'_>) -> NormalizeResult<()> {
    link_with(pass, LinkStrategy::GTEX)
}
