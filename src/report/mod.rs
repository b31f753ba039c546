//! Structured anomaly reporting, harvested per workspace for QA tooling

mod sink;

pub use sink::{ErrorEntry, ErrorReport, ErrorSink, Severity};
