//! Practitioner (principal investigator) of a workspace

use crate::model::{attribute_text, Practitioner};
use crate::normalize::{NormalizeResult, Pass};
use serde_json::json;

/// Principal investigator from the first configured workspace attribute that
/// has a value.
pub(super) fn practitioner(pass: &mut Pass<'_>) -> NormalizeResult<()> {
    let attributes = &pass.graph.workspace.attributes;
    let found = pass.config.practitioner_attributes.iter().find_map(|key| {
        attribute_text(attributes, key).map(|name| Practitioner {
            name,
            source_attribute: key.clone(),
        })
    });

    if found.is_none() {
        pass.sink.warn(
            "MissingPractitioner",
            vec![json!(pass.workspace()), json!(pass.config.practitioner_attributes)],
        );
    }
    pass.ctx.practitioner = found;
    Ok(())
}
