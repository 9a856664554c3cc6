//! Recoverable error events carried in run state.
//!
//! Node handlers that fail do not abort the run: their failures are recorded
//! as [`ErrorEvent`]s appended to `RunState.errors`, and routing may send
//! the run down a fallback branch. Fatal engine errors (validation, routing,
//! persistence) are real `Err` values defined next to their subsystems; this
//! module is only for error-as-data.
//!
//! # JSON shape
//!
//! ```json
//! {
//!   "when": "2026-02-11T09:30:00Z",
//!   "scope": { "scope": "node", "node": "tls-probe" },
//!   "message": "connection refused",
//!   "tags": ["plugin", "retryable"],
//!   "context": { "endpoint": "api.example.com" }
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::NodeId;

/// Where in the engine a recoverable error originated.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "lowercase")]
pub enum ErrorScope {
    /// A node handler failed while the run continued.
    Node { node: NodeId },
    /// Loop detection halted the run.
    Loop { node: NodeId, visits: usize },
    /// A human prompt timed out.
    Timeout { node: NodeId },
    /// Anything without a more specific home.
    #[default]
    Run,
}

/// A recoverable error recorded against a run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorEvent {
    #[serde(default = "Utc::now")]
    pub when: DateTime<Utc>,
    #[serde(default)]
    pub scope: ErrorScope,
    pub message: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub context: Value,
}

impl ErrorEvent {
    /// Error recorded against a specific node handler.
    pub fn node(node: impl Into<NodeId>, message: impl Into<String>) -> Self {
        Self {
            when: Utc::now(),
            scope: ErrorScope::Node { node: node.into() },
            message: message.into(),
            tags: Vec::new(),
            context: Value::Null,
        }
    }

    /// Diagnostic entry recorded when loop detection breaks a run.
    pub fn loop_break(node: impl Into<NodeId>, visits: usize) -> Self {
        let node = node.into();
        Self {
            when: Utc::now(),
            scope: ErrorScope::Loop {
                node: node.clone(),
                visits,
            },
            message: format!("loop detected at node '{node}' after {visits} visits"),
            tags: vec!["loop".into()],
            context: Value::Null,
        }
    }

    /// Error recorded when a human prompt expires without a response.
    pub fn timeout(node: impl Into<NodeId>, message: impl Into<String>) -> Self {
        Self {
            when: Utc::now(),
            scope: ErrorScope::Timeout { node: node.into() },
            message: message.into(),
            tags: vec!["timeout".into()],
            context: Value::Null,
        }
    }

    /// Run-scoped error without a node attribution.
    pub fn run(message: impl Into<String>) -> Self {
        Self {
            when: Utc::now(),
            scope: ErrorScope::Run,
            message: message.into(),
            tags: Vec::new(),
            context: Value::Null,
        }
    }

    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    #[must_use]
    pub fn with_context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }
}
