//! Alias resolution: which raw entity types play which canonical role

use crate::model::{Role, IMPLIED_TASK};
use crate::normalize::{NormalizeError, NormalizeResult, Pass};
use serde_json::json;

/// Fallback specimen type when the alias table does not settle it
const DEFAULT_SPECIMEN: &str = "sample";

pub(super) fn consortium_config(pass: &mut Pass<'_>) -> NormalizeResult<()> {
    let table = pass
        .config
        .table_for(pass.consortium())
        .ok_or_else(|| NormalizeError::MissingConfig(pass.consortium().to_string()))?;
    pass.ctx.inverted_config = table.inverted();
    pass.ctx.consortium_config = Some(table.clone());
    Ok(())
}

/// Patient aliases that actually occur in the workspace. When none do, every
/// configured alias is kept so references can still be followed.
pub(super) fn patient_entity_names(pass: &mut Pass<'_>) -> NormalizeResult<()> {
    let aliases = pass.ctx.alias_table()?.aliases(Role::Patient).to_vec();
    let present: Vec<String> = aliases
        .iter()
        .filter(|alias| pass.graph.has_type(alias))
        .cloned()
        .collect();

    if present.is_empty() {
        pass.sink.warn(
            "MissingPatientEntity",
            vec![json!(pass.workspace()), json!(aliases)],
        );
        pass.ctx.patient_entity_names = aliases;
    } else {
        pass.ctx.patient_entity_names = present;
    }
    Ok(())
}

/// Pick the single specimen type. Aliases that are present and carry bucket
/// fields win, then a lone present alias, then `sample`.
pub(super) fn specimen_entity_name(pass: &mut Pass<'_>) -> NormalizeResult<()> {
    let aliases = pass.ctx.alias_table()?.aliases(Role::Specimen).to_vec();
    let present: Vec<&String> = aliases
        .iter()
        .filter(|alias| pass.graph.has_type(alias))
        .collect();
    let with_buckets: Vec<&String> = present
        .iter()
        .copied()
        .filter(|alias| pass.ctx.bucket_fields.contains_key(alias.as_str()))
        .collect();

    let chosen = match (with_buckets.as_slice(), present.as_slice()) {
        ([only], _) => only.to_string(),
        (_, [only]) => only.to_string(),
        (_, []) => {
            pass.sink.warn(
                "MissingSpecimenEntity",
                vec![json!(pass.workspace()), json!(aliases)],
            );
            DEFAULT_SPECIMEN.to_string()
        }
        _ => {
            pass.sink.warn(
                "AmbiguousSpecimenEntity",
                vec![json!(pass.workspace()), json!(present)],
            );
            DEFAULT_SPECIMEN.to_string()
        }
    };

    tracing::debug!(workspace = pass.workspace(), specimen = %chosen, "resolved specimen entity");
    pass.ctx.specimen_entity_name = Some(chosen);
    Ok(())
}

/// Task aliases present in the workspace, or the implied task type
pub(super) fn task_entity_names(pass: &mut Pass<'_>) -> NormalizeResult<()> {
    let present: Vec<String> = pass
        .ctx
        .alias_table()?
        .aliases(Role::Task)
        .iter()
        .filter(|alias| pass.graph.has_type(alias))
        .cloned()
        .collect();

    pass.ctx.task_entity_names = if present.is_empty() {
        vec![IMPLIED_TASK.to_string()]
    } else {
        present
    };
    Ok(())
}
