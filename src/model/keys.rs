//! Vertex key and edge role conventions shared with the extractor

/// Label of workspace vertices
pub const WORKSPACE_LABEL: &str = "workspace";
/// Label of schema vertices
pub const SCHEMA_LABEL: &str = "schema";
/// Label of blob metadata vertices in the bucket cache
pub const BLOB_LABEL: &str = "blob";
/// Label of DRS lookup vertices
pub const DRS_LABEL: &str = "drs";

/// `src_name` of every workspace → child edge
pub const WORKSPACE_ROLE: &str = "workspace";
/// `dst_name` of the workspace → schema edge
pub const SCHEMA_ROLE: &str = "schema";

pub fn workspace_key(workspace: &str) -> String {
    format!("workspace/{}", workspace)
}

/// Workspace name encoded in a workspace vertex key
pub fn workspace_name(key: &str) -> Option<&str> {
    key.strip_prefix("workspace/")
}

pub fn entity_key(entity_type: &str, workspace: &str, name: &str) -> String {
    format!("{}/{}/{}", entity_type, workspace, name)
}

pub fn schema_key(workspace: &str) -> String {
    format!("schema/{}", workspace)
}

pub fn blob_key(url: &str) -> String {
    format!("blob/{}", url)
}

pub fn drs_key(url: &str) -> String {
    format!("drs/{}", url)
}
