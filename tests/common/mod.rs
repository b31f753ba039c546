//! Common test utilities for the harmonizer integration tests
//!
//! This module writes realistic extractions into entity stores: one builder
//! per workspace plus a canned multi-consortium store.

#![allow(dead_code)]

pub mod fixture;

pub use fixture::{
    concrete_scenario, write_blob_store, write_multi_consortium_store, WorkspaceFixture,
    CCDG_WORKSPACE, CMG_WORKSPACE, EMPTY_WORKSPACE, GTEX_WORKSPACE, UNLINKED_WORKSPACE,
};
