//! AnVIL harmonizer: reconciles consortium entity graphs into one model
//!
//! Data providers ("consortiums") label and nest their entities differently.
//! This crate reads the raw entities an extractor cached in an
//! [`EntityStore`] and normalizes each workspace into the canonical
//! Patient → Specimen → Task → Document model.
//!
//! # Core Concepts
//!
//! - **EntityStore**: embedded property-graph cache of raw vertices and edges
//! - **RuleRegistry**: resolves each normalization step to its most specific
//!   `(consortium, workspace)` override
//! - **Normalizer**: runs the fixed step sequence for one workspace
//! - **ErrorSink**: collects data anomalies into a per-workspace report
//!
//! # Example
//!
//! ```
//! use anvil_harmonizer::{Operation, RuleRegistry, Scope};
//!
//! let rules = RuleRegistry::with_defaults();
//! let (scope, _) = rules
//!     .resolve("GTEx", "some-workspace", Operation::LinkSpecimenToPatient)
//!     .unwrap();
//! assert_eq!(scope, Scope::consortium("GTEx"));
//! ```

pub mod batch;
pub mod model;
pub mod normalize;
pub mod report;
pub mod rules;
pub mod storage;

pub use batch::{run_batch, BatchError, BatchOptions, BatchResult, BatchSummary, WorkspaceCache};
pub use model::{
    CanonicalDocument, CanonicalPatient, CanonicalSpecimen, CanonicalTask, CanonicalWorkspace,
    RawEntity, Role, WorkspaceGraph,
};
pub use normalize::{
    BlobCatalog, HarmonizerConfig, MemoryBlobCatalog, NormalizationContext, NormalizeError,
    NormalizeResult, Normalizer, Pass, Precondition, StoreBlobCatalog,
};
pub use report::{ErrorReport, ErrorSink};
pub use rules::{Handler, Operation, RuleRegistry, Scope};
pub use storage::{EntityStore, OpenStore, SqliteStore, StorageError, StorageResult};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
