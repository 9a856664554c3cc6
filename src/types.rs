//! Core identifiers and enums shared across the probeflow engine.
//!
//! These are the fundamental domain concepts: how severe a run's findings
//! are, what kind of transition moved the run between nodes, and what state
//! a session record is in. Runtime infrastructure types (prompts, reports)
//! live next to the subsystems that own them.
//!
//! # Examples
//!
//! ```rust
//! use probeflow::types::Severity;
//!
//! // Severity follows blocker > major > minor > info > none.
//! assert!(Severity::Blocker.outranks(Severity::Major));
//! assert_eq!(Severity::parse("blocker"), Some(Severity::Blocker));
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a workflow definition.
pub type WorkflowId = String;

/// Identifier of one logical run of a workflow. A `(WorkflowId, ThreadId)`
/// pair names a run across pauses, resumes, and process restarts.
pub type ThreadId = String;

/// Identifier of a node within a workflow definition.
pub type NodeId = String;

/// Overall strength of the findings accumulated by a run.
///
/// Ordering is weakest-first so that `Ord` agrees with "stronger outranks
/// weaker": `None < Info < Minor < Major < Blocker`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    None,
    Info,
    Minor,
    Major,
    Blocker,
}

impl Severity {
    /// All severities, strongest first. Useful for building routing tables.
    pub const DESCENDING: [Severity; 5] = [
        Severity::Blocker,
        Severity::Major,
        Severity::Minor,
        Severity::Info,
        Severity::None,
    ];

    /// Returns `true` if `self` is strictly stronger than `other`.
    #[must_use]
    pub fn outranks(self, other: Severity) -> bool {
        self > other
    }

    /// The stronger of the two severities.
    #[must_use]
    pub fn max_of(self, other: Severity) -> Severity {
        self.max(other)
    }

    /// Parse the lowercase wire form (`"blocker"`, `"major"`, ...).
    pub fn parse(s: &str) -> Option<Severity> {
        match s {
            "blocker" => Some(Severity::Blocker),
            "major" => Some(Severity::Major),
            "minor" => Some(Severity::Minor),
            "info" => Some(Severity::Info),
            "none" => Some(Severity::None),
            _ => None,
        }
    }

    /// Lowercase wire form used in persisted records and branch conditions.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Blocker => "blocker",
            Severity::Major => "major",
            Severity::Minor => "minor",
            Severity::Info => "info",
            Severity::None => "none",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How execution moved from one node to the next.
///
/// Persisted in the transition audit log; the encoded form is stable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransitionType {
    /// Followed a plain edge.
    Normal,
    /// A declarative branch matched and chose the target.
    Branch,
    /// Loop detection halted the run at this node.
    LoopBreak,
    /// The run suspended at a human node.
    Human,
}

impl TransitionType {
    /// Stable encoded form for the durable transition log.
    #[must_use]
    pub fn encode(self) -> &'static str {
        match self {
            TransitionType::Normal => "normal",
            TransitionType::Branch => "branch",
            TransitionType::LoopBreak => "loop-break",
            TransitionType::Human => "human",
        }
    }

    /// Decode the persisted form; unknown strings fall back to `Normal` so
    /// old logs keep loading after schema additions.
    pub fn decode(s: &str) -> Self {
        match s {
            "branch" => TransitionType::Branch,
            "loop-break" => TransitionType::LoopBreak,
            "human" => TransitionType::Human,
            _ => TransitionType::Normal,
        }
    }
}

impl fmt::Display for TransitionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.encode())
    }
}

/// Lifecycle state of a session record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Active,
    Completed,
    Aborted,
}

impl SessionStatus {
    #[must_use]
    pub fn encode(self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
            SessionStatus::Aborted => "aborted",
        }
    }

    pub fn decode(s: &str) -> Self {
        match s {
            "completed" => SessionStatus::Completed,
            "aborted" => SessionStatus::Aborted,
            _ => SessionStatus::Active,
        }
    }

    /// Terminal sessions reject further resumes and timeouts.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, SessionStatus::Active)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.encode())
    }
}
