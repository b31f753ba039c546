//! Provider-supplied entities and the per-workspace raw graph

use super::keys;
use crate::storage::{EntityStore, StorageResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Attribute map of a raw entity
pub type Attributes = Map<String, Value>;

/// A string attribute, or a number rendered as a string. Empty strings count
/// as absent.
pub fn attribute_text(attributes: &Attributes, key: &str) -> Option<String> {
    match attributes.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// One upstream entity as the provider supplied it.
///
/// `name` is unique within `(entity_type, workspace)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEntity {
    #[serde(rename = "entityType")]
    pub entity_type: String,
    pub name: String,
    #[serde(default)]
    pub attributes: Attributes,
}

impl RawEntity {
    pub fn new(entity_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            name: name.into(),
            attributes: Map::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    pub fn text(&self, key: &str) -> Option<String> {
        attribute_text(&self.attributes, key)
    }
}

/// The workspace vertex payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceRecord {
    pub name: String,
    pub consortium: String,
    #[serde(default)]
    pub attributes: Attributes,
}

/// A reference from one entity to another, as found in an attribute value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct EntityRef {
    pub entity_type: Option<String>,
    pub name: String,
}

impl EntityRef {
    /// Every reference carried by `value`.
    ///
    /// Accepts Terra-style `{"entityType": .., "entityName": ..}` objects,
    /// bare strings, and arrays of either (including Terra's
    /// `{"itemsType": "EntityReference", "items": [..]}` lists).
    pub fn all_in(value: &Value) -> Vec<EntityRef> {
        match value {
            Value::String(s) if !s.trim().is_empty() => vec![EntityRef {
                entity_type: None,
                name: s.trim().to_string(),
            }],
            Value::Number(n) => vec![EntityRef {
                entity_type: None,
                name: n.to_string(),
            }],
            Value::Array(items) => items.iter().flat_map(EntityRef::all_in).collect(),
            Value::Object(obj) => {
                if let Some(items) = obj.get("items") {
                    return EntityRef::all_in(items);
                }
                let name = obj
                    .get("entityName")
                    .or_else(|| obj.get("name"))
                    .and_then(Value::as_str);
                match name {
                    Some(name) if !name.trim().is_empty() => vec![EntityRef {
                        entity_type: obj
                            .get("entityType")
                            .and_then(Value::as_str)
                            .map(str::to_string),
                        name: name.trim().to_string(),
                    }],
                    _ => Vec::new(),
                }
            }
            _ => Vec::new(),
        }
    }

    /// References that name their entity type explicitly
    pub fn typed_in(value: &Value) -> Vec<EntityRef> {
        EntityRef::all_in(value)
            .into_iter()
            .filter(|r| r.entity_type.is_some())
            .collect()
    }

    /// The first reference in `value`, if any
    pub fn first_in(value: &Value) -> Option<EntityRef> {
        EntityRef::all_in(value).into_iter().next()
    }
}

/// Everything the extractor cached for one workspace, read back from the
/// entity store.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkspaceGraph {
    pub workspace: WorkspaceRecord,
    pub schema: Option<Value>,
    /// Entity type → name → entity
    pub children: BTreeMap<String, BTreeMap<String, RawEntity>>,
    /// Child payloads that were not valid entities, as `(entity type, reason)`
    pub malformed: Vec<(String, String)>,
}

impl WorkspaceGraph {
    pub fn new(workspace: WorkspaceRecord) -> Self {
        Self {
            workspace,
            schema: None,
            children: BTreeMap::new(),
            malformed: Vec::new(),
        }
    }

    /// Read a workspace and its children from the store.
    ///
    /// Returns `None` when no workspace vertex exists under `name`.
    pub fn load<S>(store: &S, name: &str) -> StorageResult<Option<Self>>
    where
        S: EntityStore + ?Sized,
    {
        let key = keys::workspace_key(name);
        let Some(payload) = store.get(&key)? else {
            return Ok(None);
        };
        let record: WorkspaceRecord = serde_json::from_value(payload)?;
        let mut graph = WorkspaceGraph::new(record);

        for (role, payloads) in store.get_edges(&key, keys::WORKSPACE_ROLE)? {
            if role == keys::SCHEMA_ROLE {
                continue;
            }
            for payload in payloads {
                match serde_json::from_value::<RawEntity>(payload) {
                    Ok(entity) => graph.insert(entity),
                    Err(e) => graph.malformed.push((role.clone(), e.to_string())),
                }
            }
        }

        graph.schema = store
            .get_edges_by_label(&key, keys::WORKSPACE_ROLE, keys::SCHEMA_ROLE, Some(1))?
            .remove(keys::SCHEMA_ROLE);

        Ok(Some(graph))
    }

    pub fn name(&self) -> &str {
        &self.workspace.name
    }

    pub fn consortium(&self) -> &str {
        &self.workspace.consortium
    }

    pub fn insert(&mut self, entity: RawEntity) {
        self.children
            .entry(entity.entity_type.clone())
            .or_default()
            .insert(entity.name.clone(), entity);
    }

    pub fn with_entity(mut self, entity: RawEntity) -> Self {
        self.insert(entity);
        self
    }

    pub fn has_type(&self, entity_type: &str) -> bool {
        self.children
            .get(entity_type)
            .map(|e| !e.is_empty())
            .unwrap_or(false)
    }

    pub fn entities(&self, entity_type: &str) -> impl Iterator<Item = &RawEntity> {
        self.children
            .get(entity_type)
            .into_iter()
            .flat_map(|by_name| by_name.values())
    }

    pub fn entity(&self, entity_type: &str, name: &str) -> Option<&RawEntity> {
        self.children.get(entity_type)?.get(name)
    }

    /// Resolve a reference, using `default_type` when the reference is untyped
    pub fn resolve(&self, reference: &EntityRef, default_type: &str) -> Option<&RawEntity> {
        let entity_type = reference.entity_type.as_deref().unwrap_or(default_type);
        self.entity(entity_type, &reference.name)
    }

    pub fn entity_count(&self) -> usize {
        self.children.values().map(BTreeMap::len).sum()
    }
}
