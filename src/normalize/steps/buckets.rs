//! Discovery of attributes that hold object-storage URIs

use crate::model::RawEntity;
use crate::normalize::{NormalizeResult, Pass};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};

const BUCKET_SCHEMES: [&str; 2] = ["gs://", "s3://"];

pub fn is_bucket_url(s: &str) -> bool {
    BUCKET_SCHEMES.iter().any(|scheme| s.starts_with(scheme))
}

/// Object-storage URIs in an attribute value: a bare string, an array, or a
/// Terra `{"items": [..]}` list.
pub fn bucket_urls(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) if is_bucket_url(s.trim()) => vec![s.trim().to_string()],
        Value::Array(items) => items.iter().flat_map(bucket_urls).collect(),
        Value::Object(obj) => obj.get("items").map(bucket_urls).unwrap_or_default(),
        _ => Vec::new(),
    }
}

fn fields_of(entity: &RawEntity) -> impl Iterator<Item = &String> {
    entity
        .attributes
        .iter()
        .filter(|(_, value)| !bucket_urls(value).is_empty())
        .map(|(key, _)| key)
}

/// Sample the first child of each entity type
pub(super) fn ensure_bucket_fields(pass: &mut Pass<'_>) -> NormalizeResult<()> {
    let mut found: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for (entity_type, by_name) in &pass.graph.children {
        if let Some(first) = by_name.values().next() {
            let fields: BTreeSet<String> = fields_of(first).cloned().collect();
            if !fields.is_empty() {
                found.insert(entity_type.clone(), fields);
            }
        }
    }
    finish(pass, found);
    Ok(())
}

/// Union of bucket fields over every child of each type.
///
/// For workspaces where the first child of a type is missing fields that
/// the rest carry.
pub(super) fn ensure_bucket_fields_all_children(pass: &mut Pass<'_>) -> NormalizeResult<()> {
    let mut found: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for (entity_type, by_name) in &pass.graph.children {
        let fields: BTreeSet<String> = by_name.values().flat_map(fields_of).cloned().collect();
        if !fields.is_empty() {
            found.insert(entity_type.clone(), fields);
        }
    }
    finish(pass, found);
    Ok(())
}

fn finish(pass: &mut Pass<'_>, found: BTreeMap<String, BTreeSet<String>>) {
    if found.is_empty() {
        pass.sink.warn("NoBucketFields", vec![json!(pass.workspace())]);
    }
    tracing::debug!(
        workspace = pass.workspace(),
        types = found.len(),
        "discovered bucket fields"
    );
    pass.ctx.bucket_fields = found;
}
