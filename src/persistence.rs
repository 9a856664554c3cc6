//! Serde-facing snapshot models for durable state.
//!
//! [`RunState`] itself is a runtime type; what goes to disk is
//! [`PersistedRunState`], a versioned mirror whose every field carries a
//! serde default so snapshots written by older builds keep loading. Bump
//! [`SCHEMA_VERSION`] when a change is not covered by defaults.

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ErrorEvent;
use crate::finding::Finding;
use crate::state::RunState;
use crate::types::{NodeId, Severity};

/// Current snapshot schema version.
pub const SCHEMA_VERSION: u32 = 1;

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

/// Versioned, serializable mirror of [`RunState`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersistedRunState {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub findings: Vec<Finding>,
    #[serde(default)]
    pub errors: Vec<ErrorEvent>,
    #[serde(default)]
    pub current_node: NodeId,
    #[serde(default)]
    pub visited_nodes: Vec<NodeId>,
    #[serde(default)]
    pub execution_path: Vec<String>,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub awaiting_user_input: bool,
    #[serde(default)]
    pub user_response: Option<Value>,
    #[serde(default = "Utc::now")]
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub node_timings: FxHashMap<NodeId, u64>,
}

impl From<&RunState> for PersistedRunState {
    fn from(state: &RunState) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            endpoint: state.endpoint.clone(),
            findings: state.findings.clone(),
            errors: state.errors.clone(),
            current_node: state.current_node.clone(),
            visited_nodes: state.visited_nodes.clone(),
            execution_path: state.execution_path.clone(),
            severity: state.severity,
            awaiting_user_input: state.awaiting_user_input,
            user_response: state.user_response.clone(),
            started_at: state.started_at,
            node_timings: state.node_timings.clone(),
        }
    }
}

impl From<PersistedRunState> for RunState {
    fn from(persisted: PersistedRunState) -> Self {
        Self {
            endpoint: persisted.endpoint,
            findings: persisted.findings,
            errors: persisted.errors,
            current_node: persisted.current_node,
            visited_nodes: persisted.visited_nodes,
            execution_path: persisted.execution_path,
            severity: persisted.severity,
            awaiting_user_input: persisted.awaiting_user_input,
            user_response: persisted.user_response,
            started_at: persisted.started_at,
            node_timings: persisted.node_timings,
        }
    }
}

impl PersistedRunState {
    /// Take a snapshot of live state.
    pub fn snapshot(state: &RunState) -> Self {
        Self::from(state)
    }

    /// Whether this snapshot was written by a newer schema than we know.
    #[must_use]
    pub fn is_future_schema(&self) -> bool {
        self.schema_version > SCHEMA_VERSION
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_round_trips_through_json() {
        let mut state = RunState::new("api.example.com");
        state.record_finding(Finding::blocker("auth", "rejected"));
        state.record_visit(&"probe".to_string(), "Probe", 12);
        state.current_node = "triage".into();

        let snapshot = PersistedRunState::snapshot(&state);
        let json = serde_json::to_string(&snapshot).unwrap();
        let restored: PersistedRunState = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, snapshot);

        let back: RunState = restored.into();
        assert_eq!(back, state);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let restored: PersistedRunState =
            serde_json::from_str(r#"{"endpoint":"ep"}"#).unwrap();
        assert_eq!(restored.schema_version, SCHEMA_VERSION);
        assert_eq!(restored.severity, Severity::None);
        assert!(restored.findings.is_empty());
        assert!(!restored.awaiting_user_input);
    }

    #[test]
    fn future_schema_is_detectable() {
        let restored: PersistedRunState =
            serde_json::from_str(r#"{"schema_version":99,"endpoint":"ep"}"#).unwrap();
        assert!(restored.is_future_schema());
    }
}
