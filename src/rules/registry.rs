//! RuleRegistry: resolves each operation to its most specific handler
//!
//! Handlers are registered per `(Scope, Operation)`. Resolution for a
//! `(consortium, workspace)` pair tries the workspace-exact scope, then the
//! consortium default, then the bare workspace name, then the global default.
//! A missing handler at every level is a programming error and surfaces as
//! `NormalizeError::Misconfiguration`.

use super::scope::{parse_rule_key, rule_key, Operation, Scope};
use crate::normalize::{NormalizeError, NormalizeResult, Pass};
use std::collections::HashMap;
use thiserror::Error;

/// A normalization step. Reads and writes the pass's context.
pub type Handler = fn(&mut Pass<'_>) -> NormalizeResult<()>;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("invalid rule key: {0}")]
    InvalidKey(String),
}

/// Mapping from `(Scope, Operation)` to handler
#[derive(Clone, Default)]
pub struct RuleRegistry {
    rules: HashMap<(Scope, Operation), Handler>,
}

impl RuleRegistry {
    /// An empty registry. Dispatch fails for every operation until handlers
    /// are registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in global defaults plus every consortium and workspace
    /// override.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        crate::normalize::steps::register_defaults(&mut registry);
        crate::normalize::steps::register_overrides(&mut registry);
        registry
    }

    /// Register a handler, returning the one it replaced
    pub fn register(&mut self, scope: Scope, operation: Operation, handler: Handler) -> Option<Handler> {
        self.rules.insert((scope, operation), handler)
    }

    /// Register by `consortium/workspace/operation` key; either of the first
    /// two parts may be empty.
    pub fn register_key(&mut self, key: &str, handler: Handler) -> Result<Option<Handler>, RuleError> {
        let (scope, operation) = parse_rule_key(key).map_err(RuleError::InvalidKey)?;
        Ok(self.register(scope, operation, handler))
    }

    pub fn unregister(&mut self, scope: &Scope, operation: Operation) -> Option<Handler> {
        self.rules.remove(&(scope.clone(), operation))
    }

    /// The most specific handler for `operation`, with the scope it was
    /// registered under.
    pub fn resolve(&self, consortium: &str, workspace: &str, operation: Operation) -> Option<(Scope, Handler)> {
        Scope::candidates(consortium, workspace)
            .into_iter()
            .find_map(|scope| {
                let handler = self.rules.get(&(scope.clone(), operation)).copied();
                handler.map(|h| (scope, h))
            })
    }

    /// Resolve `operation` for the pass's workspace and run it.
    pub fn dispatch(&self, pass: &mut Pass<'_>, operation: Operation) -> NormalizeResult<()> {
        let (scope, handler) = self
            .resolve(pass.consortium(), pass.workspace(), operation)
            .ok_or_else(|| NormalizeError::Misconfiguration {
                key: rule_key(
                    &Scope::workspace(pass.consortium(), pass.workspace()),
                    operation,
                ),
            })?;
        tracing::debug!(
            operation = %operation,
            scope = %scope,
            workspace = pass.workspace(),
            "dispatching normalization step"
        );
        handler(pass)
    }

    /// Registered rules as `(scope, operation)`, grouped by operation in
    /// pipeline order and most specific first.
    pub fn rules(&self) -> Vec<(Scope, Operation)> {
        let mut rules: Vec<(Scope, Operation)> = self.rules.keys().cloned().collect();
        rules.sort_by(|(sa, oa), (sb, ob)| {
            oa.cmp(ob)
                .then(sa.rank().cmp(&sb.rank()))
                .then(sa.cmp(sb))
        });
        rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl std::fmt::Debug for RuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keys: Vec<String> = self
            .rules()
            .iter()
            .map(|(scope, op)| rule_key(scope, *op))
            .collect();
        f.debug_struct("RuleRegistry").field("rules", &keys).finish()
    }
}
