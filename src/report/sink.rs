//! ErrorSink: collector of anomalies found during one normalization pass
//!
//! Every event is keyed by a symbolic name (`UnresolvedSpecimenLink`,
//! `MissingBlob`, ...) and carries an arbitrary tuple of JSON details. Events
//! are also forwarded to the tracing stream. The sink is cleared before each
//! workspace and harvested into an [`ErrorReport`] after it.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

/// One recorded occurrence of an event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub severity: Severity,
    pub details: Vec<Value>,
}

/// A workspace's harvested events, grouped by event name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorReport {
    pub events: BTreeMap<String, Vec<ErrorEntry>>,
}

impl ErrorReport {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Occurrences of `event`
    pub fn count(&self, event: &str) -> usize {
        self.events.get(event).map(Vec::len).unwrap_or(0)
    }

    pub fn contains(&self, event: &str) -> bool {
        self.events.contains_key(event)
    }

    pub fn has_errors(&self) -> bool {
        self.events
            .values()
            .flatten()
            .any(|e| e.severity == Severity::Error)
    }

    /// Event name → occurrence count
    pub fn counts(&self) -> BTreeMap<String, usize> {
        self.events
            .iter()
            .map(|(name, entries)| (name.clone(), entries.len()))
            .collect()
    }
}

/// Scoped collector of warning/error events.
#[derive(Debug, Default)]
pub struct ErrorSink {
    /// Workspace the current events belong to, used as a log field
    scope: Option<String>,
    events: BTreeMap<String, Vec<ErrorEntry>>,
}

impl ErrorSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear the sink and attribute subsequent events to `workspace`
    pub fn begin(&mut self, workspace: impl Into<String>) {
        self.clear();
        self.scope = Some(workspace.into());
    }

    pub fn warn(&mut self, event: &str, details: Vec<Value>) {
        let rendered = serde_json::Value::Array(details.clone());
        tracing::warn!(
            event,
            workspace = self.scope.as_deref().unwrap_or(""),
            details = %rendered,
            "normalization warning"
        );
        self.record(event, Severity::Warning, details);
    }

    pub fn error(&mut self, event: &str, details: Vec<Value>) {
        let rendered = serde_json::Value::Array(details.clone());
        tracing::error!(
            event,
            workspace = self.scope.as_deref().unwrap_or(""),
            details = %rendered,
            "normalization error"
        );
        self.record(event, Severity::Error, details);
    }

    fn record(&mut self, event: &str, severity: Severity, details: Vec<Value>) {
        self.events
            .entry(event.to_string())
            .or_default()
            .push(ErrorEntry { severity, details });
    }

    /// Grouped view of everything recorded since the last clear
    pub fn entries(&self) -> &BTreeMap<String, Vec<ErrorEntry>> {
        &self.events
    }

    pub fn count(&self, event: &str) -> usize {
        self.events.get(event).map(Vec::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn clear(&mut self) {
        self.events.clear();
        self.scope = None;
    }

    /// Take the recorded events as a report, leaving the sink empty
    pub fn harvest(&mut self) -> ErrorReport {
        self.scope = None;
        ErrorReport {
            events: std::mem::take(&mut self.events),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn events_group_by_name() {
        let mut sink = ErrorSink::new();
        sink.warn("MissingBlob", vec![json!("gs://b/1")]);
        sink.warn("MissingBlob", vec![json!("gs://b/2")]);
        sink.error("NoPatients", vec![json!("ws")]);

        assert_eq!(sink.count("MissingBlob"), 2);
        assert_eq!(sink.entries()["NoPatients"][0].severity, Severity::Error);
        assert_eq!(sink.entries()["MissingBlob"][1].details, vec![json!("gs://b/2")]);
    }

    #[test]
    fn events_are_logged_with_their_details() {
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_test_writer()
            .finish();
        tracing::subscriber::with_default(subscriber, || {
            let mut sink = ErrorSink::new();
            sink.begin("ws");
            sink.warn("MissingBlob", vec![json!(2), json!(["gs://b/1"])]);
            sink.error("NoPatients", vec![json!("ws")]);

            assert_eq!(sink.count("MissingBlob"), 1);
            assert_eq!(sink.count("NoPatients"), 1);
        });
    }

    #[test]
    fn begin_clears_previous_workspace() {
        let mut sink = ErrorSink::new();
        sink.begin("ws-1");
        sink.warn("MissingSchema", vec![]);

        sink.begin("ws-2");
        assert!(sink.is_empty());
    }

    #[test]
    fn harvest_empties_the_sink() {
        let mut sink = ErrorSink::new();
        sink.begin("ws");
        sink.warn("MissingSchema", vec![json!("ws")]);

        let report = sink.harvest();

        assert!(sink.is_empty());
        assert_eq!(report.count("MissingSchema"), 1);
        assert!(!report.has_errors());
        assert_eq!(report.counts()["MissingSchema"], 1);
    }

    #[test]
    fn report_serializes_as_event_map() {
        let mut sink = ErrorSink::new();
        sink.error("NoSpecimens", vec![json!("ws"), json!(0)]);
        let report = sink.harvest();

        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(
            value,
            json!({"NoSpecimens": [{"severity": "error", "details": ["ws", 0]}]})
        );
    }
}
