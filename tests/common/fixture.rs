//! Extraction fixtures
//!
//! Writes workspaces the way the extractor does: a workspace vertex, one
//! vertex per raw entity, an optional schema vertex, and workspace → child
//! edges keyed by entity type.

use anvil_harmonizer::model::{keys, RawEntity, WorkspaceRecord};
use anvil_harmonizer::{EntityStore, OpenStore, SqliteStore, StorageResult};
use serde_json::{json, Map, Value};
use std::path::Path;

pub const CMG_WORKSPACE: &str = "AnVIL_CMG_Broad_Muscle_WES";
pub const CCDG_WORKSPACE: &str = "AnVIL_CCDG_WashU_CVD";
pub const GTEX_WORKSPACE: &str = "AnVIL_GTEx_V8";
pub const UNLINKED_WORKSPACE: &str = "AnVIL_CMG_Unlinked";
pub const EMPTY_WORKSPACE: &str = "AnVIL_NHGRI_Empty";

/// One workspace's extraction, built up entity by entity
#[derive(Debug, Clone)]
pub struct WorkspaceFixture {
    pub consortium: String,
    pub name: String,
    pub attributes: Map<String, Value>,
    pub entities: Vec<RawEntity>,
    pub schema: bool,
}

impl WorkspaceFixture {
    pub fn new(consortium: &str, name: &str) -> Self {
        Self {
            consortium: consortium.to_string(),
            name: name.to_string(),
            attributes: Map::new(),
            entities: Vec::new(),
            schema: true,
        }
    }

    pub fn with_attribute(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    pub fn with_entity(mut self, entity: RawEntity) -> Self {
        self.entities.push(entity);
        self
    }

    pub fn without_schema(mut self) -> Self {
        self.schema = false;
        self
    }

    pub fn write(&self, store: &dyn EntityStore) -> StorageResult<()> {
        let ws_key = keys::workspace_key(&self.name);
        let record = WorkspaceRecord {
            name: self.name.clone(),
            consortium: self.consortium.clone(),
            attributes: self.attributes.clone(),
        };
        store.put(&ws_key, keys::WORKSPACE_LABEL, &serde_json::to_value(&record)?)?;

        for entity in &self.entities {
            let key = keys::entity_key(&entity.entity_type, &self.name, &entity.name);
            store.put(&key, &entity.entity_type, &serde_json::to_value(entity)?)?;
            store.put_edge(&ws_key, &key, keys::WORKSPACE_ROLE, &entity.entity_type)?;
        }

        if self.schema {
            let types: Map<String, Value> = self
                .entities
                .iter()
                .map(|e| (e.entity_type.clone(), json!({"primaryKey": "name"})))
                .collect();
            let key = keys::schema_key(&self.name);
            store.put(&key, keys::SCHEMA_LABEL, &Value::Object(types))?;
            store.put_edge(&ws_key, &key, keys::WORKSPACE_ROLE, keys::SCHEMA_ROLE)?;
        }
        store.commit(true)
    }
}

/// `sample/S1 {subject: P1, bam: gs://b/S1.bam}` and `subject/P1 {}`
pub fn concrete_scenario() -> WorkspaceFixture {
    WorkspaceFixture::new("CMG", "AnVIL_CMG_Scenario")
        .with_entity(RawEntity::new("subject", "P1"))
        .with_entity(
            RawEntity::new("sample", "S1")
                .with_attribute("subject", "P1")
                .with_attribute("bam", "gs://b/S1.bam"),
        )
}

fn cmg_workspace() -> WorkspaceFixture {
    WorkspaceFixture::new("CMG", CMG_WORKSPACE)
        .with_attribute("library:PI", "Dr. Muscle")
        .with_entity(
            RawEntity::new("subject", "P1")
                .with_attribute("sex", "Male")
                .with_attribute("family_id", "FAM1")
                .with_attribute("hpo_present", "HP:0003198|HP:0003202"),
        )
        .with_entity(RawEntity::new("subject", "P2").with_attribute("sex", "Female"))
        .with_entity(
            RawEntity::new("sample", "S1")
                .with_attribute("subject", "P1")
                .with_attribute("cram", "gs://fc-cmg/S1.cram"),
        )
        .with_entity(
            RawEntity::new("sample", "S2")
                .with_attribute("subject", "P2")
                .with_attribute("cram", "gs://fc-cmg/S2.cram"),
        )
        // Linked, but never sequenced
        .with_entity(RawEntity::new("sample", "S3").with_attribute("subject", "P1"))
}

fn ccdg_workspace() -> WorkspaceFixture {
    WorkspaceFixture::new("CCDG", CCDG_WORKSPACE)
        .with_attribute("PI", "Dr. Heart")
        .with_entity(
            RawEntity::new("subject", "C1").with_attribute("phenotype_group", "Cardiovascular"),
        )
        .with_entity(RawEntity::new("qc_result_sample", "QC1").with_attribute("subject", "C1"))
        .with_entity(
            RawEntity::new("sample", "CS1")
                .with_attribute("qc_result_sample", json!({"entityType": "qc_result_sample", "entityName": "QC1"}))
                .with_attribute("cram", "gs://fc-ccdg/CS1.cram"),
        )
}

fn gtex_workspace() -> WorkspaceFixture {
    WorkspaceFixture::new("GTEx", GTEX_WORKSPACE)
        .with_entity(RawEntity::new("participant", "G1").with_attribute("sex", 1))
        .with_entity(
            RawEntity::new("tissue_sample", "T1")
                .with_attribute("participant", json!({"entityType": "participant", "entityName": "G1"}))
                .with_attribute("cram", "gs://fc-gtex/T1.cram"),
        )
}

fn unlinked_workspace() -> WorkspaceFixture {
    WorkspaceFixture::new("CMG", UNLINKED_WORKSPACE)
        .with_entity(RawEntity::new("subject", "X1"))
        .with_entity(RawEntity::new("sample", "U1").with_attribute("cram", "gs://fc-cmg/U1.cram"))
        .with_entity(RawEntity::new("sample", "U2").with_attribute("cram", "gs://fc-cmg/U2.cram"))
}

/// Five workspaces: three that normalize, one whose specimens link to no
/// patient, and one with nothing but a schema
pub fn write_multi_consortium_store(path: &Path) -> StorageResult<()> {
    let store = SqliteStore::open(path)?;
    for fixture in [
        cmg_workspace(),
        ccdg_workspace(),
        gtex_workspace(),
        unlinked_workspace(),
        WorkspaceFixture::new("NHGRI", EMPTY_WORKSPACE),
    ] {
        fixture.write(&store)?;
    }
    store.index()
}

/// Blob and DRS records for the CMG workspace's files
pub fn write_blob_store(path: &Path) -> StorageResult<()> {
    let store = SqliteStore::open(path)?;
    for (url, size) in [("gs://fc-cmg/S1.cram", 1_000u64), ("gs://fc-cmg/S2.cram", 2_000)] {
        store.put(
            &keys::blob_key(url),
            keys::BLOB_LABEL,
            &json!({"size": size, "md5_hash": format!("md5-{}", size)}),
        )?;
        store.put(
            &keys::drs_key(url),
            keys::DRS_LABEL,
            &json!({"drs_uri": format!("drs://dg.ANV0/{}", size)}),
        )?;
    }
    store.commit(true)
}
