//! Mutable run state carried through a workflow execution.
//!
//! [`RunState`] is owned by exactly one run at a time. The orchestrator
//! mutates it between node executions (appending findings and errors,
//! escalating severity, accumulating timings) and snapshots it into durable
//! checkpoints; node handlers only ever see an immutable borrow.
//!
//! # Examples
//!
//! ```rust
//! use probeflow::state::RunState;
//! use probeflow::finding::Finding;
//! use probeflow::types::Severity;
//!
//! let mut state = RunState::builder()
//!     .endpoint("api.example.com")
//!     .build();
//!
//! state.record_finding(Finding::blocker("auth", "credentials rejected"));
//! assert_eq!(state.severity, Severity::Blocker);
//!
//! // Severity never weakens on its own.
//! state.record_finding(Finding::info("latency", "p99 at 80ms"));
//! assert_eq!(state.severity, Severity::Blocker);
//! ```

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::errors::ErrorEvent;
use crate::finding::Finding;
use crate::types::{NodeId, Severity};

/// The mutable state of one workflow run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunState {
    /// Endpoint under diagnosis; opaque to the engine.
    pub endpoint: String,
    /// Findings in the order they were reported. Append-only.
    pub findings: Vec<Finding>,
    /// Recoverable errors in the order they occurred. Append-only.
    pub errors: Vec<ErrorEvent>,
    /// Node currently executing (or about to execute).
    pub current_node: NodeId,
    /// Every node visited, in order, repeats included.
    pub visited_nodes: Vec<NodeId>,
    /// Human-readable labels of the path taken.
    pub execution_path: Vec<String>,
    /// Strongest severity seen so far; monotonic except for
    /// [`reset_severity`](Self::reset_severity).
    pub severity: Severity,
    /// True while the run is suspended at a human node.
    pub awaiting_user_input: bool,
    /// Response supplied when a human prompt was answered.
    pub user_response: Option<Value>,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// Cumulative execution time per node in milliseconds; repeated visits
    /// add up.
    pub node_timings: FxHashMap<NodeId, u64>,
}

impl RunState {
    /// Start building a run state with the fluent API.
    pub fn builder() -> RunStateBuilder {
        RunStateBuilder::default()
    }

    /// Fresh state for the given endpoint.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            started_at: Utc::now(),
            ..Default::default()
        }
    }

    /// Append a finding and escalate run severity if it is stronger.
    pub fn record_finding(&mut self, finding: Finding) {
        self.escalate_severity(finding.severity);
        self.findings.push(finding);
    }

    /// Append a recoverable error. Does not affect severity.
    pub fn record_error(&mut self, error: ErrorEvent) {
        self.errors.push(error);
    }

    /// Strengthen the run severity; weaker values are ignored.
    pub fn escalate_severity(&mut self, severity: Severity) {
        self.severity = self.severity.max_of(severity);
    }

    /// Explicit reset, the only way severity may weaken within a run.
    pub fn reset_severity(&mut self) {
        self.severity = Severity::None;
    }

    /// Record a completed visit to `node`: ordered visit log, path label,
    /// and additive timing.
    pub fn record_visit(&mut self, node: &NodeId, label: &str, elapsed_ms: u64) {
        self.visited_nodes.push(node.clone());
        self.execution_path.push(label.to_string());
        *self.node_timings.entry(node.clone()).or_insert(0) += elapsed_ms;
    }

    /// How many times `node` appears in the visit log.
    #[must_use]
    pub fn visit_count(&self, node: &str) -> usize {
        self.visited_nodes.iter().filter(|n| n.as_str() == node).count()
    }

    /// True once any finding at blocker strength has been recorded.
    #[must_use]
    pub fn has_blockers(&self) -> bool {
        self.severity == Severity::Blocker
    }
}

/// Fluent builder for [`RunState`], mainly for callers seeding a run and
/// for tests constructing mid-run shapes.
#[derive(Debug, Default)]
pub struct RunStateBuilder {
    endpoint: String,
    findings: Vec<Finding>,
    current_node: NodeId,
}

impl RunStateBuilder {
    #[must_use]
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    #[must_use]
    pub fn with_finding(mut self, finding: Finding) -> Self {
        self.findings.push(finding);
        self
    }

    #[must_use]
    pub fn current_node(mut self, node: impl Into<NodeId>) -> Self {
        self.current_node = node.into();
        self
    }

    pub fn build(self) -> RunState {
        let mut state = RunState::new(self.endpoint);
        state.current_node = self.current_node;
        for finding in self.findings {
            state.record_finding(finding);
        }
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_is_monotonic() {
        let mut state = RunState::new("ep");
        state.record_finding(Finding::new("a", Severity::Major, "m"));
        state.record_finding(Finding::new("b", Severity::Minor, "m"));
        assert_eq!(state.severity, Severity::Major);
        state.reset_severity();
        assert_eq!(state.severity, Severity::None);
    }

    #[test]
    fn timings_accumulate_over_repeat_visits() {
        let mut state = RunState::new("ep");
        let node: NodeId = "probe".into();
        state.record_visit(&node, "probe", 10);
        state.record_visit(&node, "probe", 15);
        assert_eq!(state.node_timings.get("probe"), Some(&25));
        assert_eq!(state.visit_count("probe"), 2);
        assert_eq!(state.execution_path, vec!["probe", "probe"]);
    }

    #[test]
    fn builder_escalates_from_seeded_findings() {
        let state = RunState::builder()
            .endpoint("ep")
            .with_finding(Finding::blocker("x", "y"))
            .build();
        assert!(state.has_blockers());
        assert_eq!(state.findings.len(), 1);
    }
}
