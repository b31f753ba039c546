//! Raw and canonical data model

mod canonical;
mod entity;
pub mod keys;

pub use canonical::{
    CanonicalDocument, CanonicalPatient, CanonicalSpecimen, CanonicalTask, CanonicalWorkspace,
    FamilyRelationship, Gender, Practitioner, Relation, Role, TaskInput, IMPLIED_TASK,
};
pub use entity::{attribute_text, Attributes, EntityRef, RawEntity, WorkspaceGraph, WorkspaceRecord};
