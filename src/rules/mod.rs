//! Specificity-ordered rule dispatch for normalization steps

mod registry;
mod scope;

pub use registry::{Handler, RuleError, RuleRegistry};
pub use scope::{parse_rule_key, rule_key, Operation, Scope};
