//! Finding records produced by plugin nodes.
//!
//! A [`Finding`] is the unit of diagnostic output: a named check, the
//! severity it assessed, and a human-readable description. Findings are
//! appended to [`RunState`](crate::state::RunState) in the order the
//! producing handlers returned them and are never reordered or deduplicated
//! by the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::Severity;

/// One diagnostic finding reported by a plugin node.
///
/// # Examples
///
/// ```rust
/// use probeflow::finding::Finding;
/// use probeflow::types::Severity;
///
/// let finding = Finding::new("tls-version", Severity::Major, "TLS 1.0 accepted")
///     .with_detail("offered", serde_json::json!(["1.0", "1.2", "1.3"]));
///
/// assert_eq!(finding.severity, Severity::Major);
/// assert!(finding.details.get("offered").is_some());
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// Identifier of the check that produced this finding.
    pub check: String,
    /// Severity assessed by the check.
    pub severity: Severity,
    /// Human-readable description.
    pub message: String,
    /// Structured supporting data, keyed by field name.
    #[serde(default)]
    pub details: serde_json::Map<String, Value>,
    /// When the finding was recorded.
    #[serde(default = "Utc::now")]
    pub recorded_at: DateTime<Utc>,
}

impl Finding {
    pub fn new(check: impl Into<String>, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            check: check.into(),
            severity,
            message: message.into(),
            details: serde_json::Map::new(),
            recorded_at: Utc::now(),
        }
    }

    /// Convenience constructor for a blocker-severity finding.
    pub fn blocker(check: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(check, Severity::Blocker, message)
    }

    /// Convenience constructor for an info-severity finding.
    pub fn info(check: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(check, Severity::Info, message)
    }

    /// Attach one structured detail field.
    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }
}
