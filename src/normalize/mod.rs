//! Normalizer: reconciles one workspace's raw entity graph into the canonical
//! Patient → Specimen → Task → Document model.
//!
//! The pipeline is a fixed sequence of [`Operation`]s. Each one is resolved
//! through the [`RuleRegistry`] for the workspace's `(consortium, workspace)`
//! pair and run against a [`Pass`], which bundles the read-only inputs with
//! the mutable [`NormalizationContext`] and the [`ErrorSink`].
//!
//! Three outcomes are possible for a workspace:
//! - a [`CanonicalWorkspace`], possibly with data anomalies in its error report
//! - [`NormalizeError::Abandoned`] when a hard precondition fails; the batch
//!   moves on to the next workspace
//! - a fatal configuration error ([`NormalizeError::is_fatal`]) that should
//!   stop the process

mod blobs;
mod config;
mod context;
pub mod steps;

pub use blobs::{BlobCatalog, BlobInfo, MemoryBlobCatalog, StoreBlobCatalog};
pub use config::{AliasTable, ConfigError, HarmonizerConfig, RoleAliases};
pub use context::NormalizationContext;

use crate::model::{CanonicalWorkspace, WorkspaceGraph};
use crate::report::ErrorSink;
use crate::rules::{Operation, RuleRegistry};
use crate::storage::{EntityStore, StorageError};
use serde_json::{json, Value};
use std::fmt;
use thiserror::Error;

/// A hard precondition a workspace failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    /// The workspace has nothing but its schema
    NoChildEntities,
    /// No entity of the specimen type exists
    NoSpecimens,
    /// No specimen could be linked to a patient
    NoSpecimenLinks,
    /// No entity of any patient type exists
    NoPatients,
}

impl Precondition {
    /// Event name recorded in the error report
    pub fn event(&self) -> &'static str {
        match self {
            Precondition::NoChildEntities => "NoChildEntities",
            Precondition::NoSpecimens => "NoSpecimens",
            Precondition::NoSpecimenLinks => "NoSpecimenLinks",
            Precondition::NoPatients => "NoPatients",
        }
    }
}

impl fmt::Display for Precondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Precondition::NoChildEntities => "no child entities beyond the schema",
            Precondition::NoSpecimens => "no specimens",
            Precondition::NoSpecimenLinks => "no specimen could be linked to a patient",
            Precondition::NoPatients => "no patients",
        };
        f.write_str(reason)
    }
}

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("no rule registered for {key}")]
    Misconfiguration { key: String },

    #[error("no alias table for consortium {0} and no default table")]
    MissingConfig(String),

    #[error("step ran before {0} was resolved")]
    StepOrder(&'static str),

    #[error("workspace {workspace} abandoned: {reason}")]
    Abandoned {
        workspace: String,
        reason: Precondition,
    },

    #[error("workspace not found: {0}")]
    WorkspaceNotFound(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl NormalizeError {
    /// True for configuration defects that must stop the whole batch
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            NormalizeError::Misconfiguration { .. }
                | NormalizeError::MissingConfig(_)
                | NormalizeError::StepOrder(_)
        )
    }
}

pub type NormalizeResult<T> = Result<T, NormalizeError>;

/// Everything a normalization step can see for one workspace
pub struct Pass<'a> {
    pub graph: &'a WorkspaceGraph,
    pub config: &'a HarmonizerConfig,
    pub blobs: &'a dyn BlobCatalog,
    pub ctx: &'a mut NormalizationContext,
    pub sink: &'a mut ErrorSink,
}

impl<'a> Pass<'a> {
    pub fn new(
        graph: &'a WorkspaceGraph,
        config: &'a HarmonizerConfig,
        blobs: &'a dyn BlobCatalog,
        ctx: &'a mut NormalizationContext,
        sink: &'a mut ErrorSink,
    ) -> Self {
        Self {
            graph,
            config,
            blobs,
            ctx,
            sink,
        }
    }

    pub fn consortium(&self) -> &'a str {
        self.graph.consortium()
    }

    pub fn workspace(&self) -> &'a str {
        self.graph.name()
    }

    /// Warn about `event` only the first time it occurs in this workspace
    pub fn warn_once(&mut self, event: &str, details: Vec<Value>) {
        if self.ctx.first_report(event) {
            self.sink.warn(event, details);
        }
    }

    /// Record the failed precondition and build the error that ends the pass
    pub fn abandon(&mut self, reason: Precondition) -> NormalizeError {
        self.sink.error(reason.event(), vec![json!(self.workspace())]);
        NormalizeError::Abandoned {
            workspace: self.workspace().to_string(),
            reason,
        }
    }
}

/// Runs the normalization pipeline against workspaces in an entity store
pub struct Normalizer<'a> {
    store: &'a dyn EntityStore,
    rules: &'a RuleRegistry,
    config: &'a HarmonizerConfig,
    blobs: &'a dyn BlobCatalog,
}

impl<'a> Normalizer<'a> {
    pub fn new(
        store: &'a dyn EntityStore,
        rules: &'a RuleRegistry,
        config: &'a HarmonizerConfig,
        blobs: &'a dyn BlobCatalog,
    ) -> Self {
        Self {
            store,
            rules,
            config,
            blobs,
        }
    }

    /// Load `workspace` from the store and normalize it.
    ///
    /// On error the sink still holds the events recorded so far; the caller
    /// harvests them.
    pub fn normalize(&self, workspace: &str, sink: &mut ErrorSink) -> NormalizeResult<CanonicalWorkspace> {
        let graph = WorkspaceGraph::load(self.store, workspace)?
            .ok_or_else(|| NormalizeError::WorkspaceNotFound(workspace.to_string()))?;
        self.normalize_graph(&graph, sink)
    }

    /// Run every pipeline operation against an already-loaded graph
    pub fn normalize_graph(
        &self,
        graph: &WorkspaceGraph,
        sink: &mut ErrorSink,
    ) -> NormalizeResult<CanonicalWorkspace> {
        sink.begin(graph.name());
        tracing::info!(
            consortium = graph.consortium(),
            workspace = graph.name(),
            entities = graph.entity_count(),
            "normalizing workspace"
        );

        let mut ctx = NormalizationContext::new();
        let mut pass = Pass::new(graph, self.config, self.blobs, &mut ctx, sink);

        if graph.schema.is_none() {
            pass.sink.warn("MissingSchema", vec![json!(graph.name())]);
        }
        for (entity_type, reason) in &graph.malformed {
            pass.sink
                .warn("MalformedEntity", vec![json!(entity_type), json!(reason)]);
        }
        if graph.entity_count() == 0 {
            return Err(pass.abandon(Precondition::NoChildEntities));
        }

        for operation in Operation::PIPELINE {
            self.rules.dispatch(&mut pass, operation)?;
        }

        let mut canonical = CanonicalWorkspace::new(graph.consortium(), graph.name());
        canonical.practitioner = ctx.practitioner.take();
        canonical.patients = std::mem::take(&mut ctx.patients);
        canonical.patient_aliases = std::mem::take(&mut ctx.patient_aliases);
        canonical.tasks = std::mem::take(&mut ctx.tasks);
        canonical.errors = sink.harvest();

        tracing::info!(
            workspace = graph.name(),
            patients = canonical.patients.len(),
            specimens = canonical.specimen_count(),
            tasks = canonical.tasks.len(),
            "normalized workspace"
        );
        Ok(canonical)
    }
}
