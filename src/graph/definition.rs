//! Static workflow graph definitions.
//!
//! A [`GraphDefinition`] is pure data: nodes, edges, branch tables, and an
//! entry point. It is immutable once built and carries no handlers; those
//! are bound at compile time by the
//! [`WorkflowRegistry`](crate::graph::WorkflowRegistry).

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::branching::Branch;
use crate::types::{NodeId, WorkflowId};

/// Sentinel node id that terminates a run. Never registered as a node.
pub const END: &str = "END";

/// What a node does when the orchestrator reaches it.
///
/// A closed set so handler dispatch is exhaustively checked.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum NodeKind {
    /// Invokes the registered plugin handler and merges its output.
    Plugin {
        plugin_id: String,
        /// Opaque arguments forwarded to the handler unmodified.
        #[serde(default)]
        args: serde_json::Value,
    },
    /// Pure routing point; branch evaluation decides the successor.
    Decision,
    /// No-op merge point joining multiple paths.
    Aggregation,
    /// Suspends the run for external input.
    Human,
}

impl NodeKind {
    #[must_use]
    pub fn is_human(&self) -> bool {
        matches!(self, NodeKind::Human)
    }
}

/// One named step in a workflow graph. Immutable after construction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: NodeId,
    pub name: String,
    #[serde(flatten)]
    pub kind: NodeKind,
}

impl NodeSpec {
    pub fn new(id: impl Into<NodeId>, name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
        }
    }
}

/// A plain directed edge. Used for routing when the source node has no
/// branch table, and always used by the visualization engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub from: NodeId,
    pub to: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Edge {
    pub fn new(from: impl Into<NodeId>, to: impl Into<NodeId>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            label: None,
        }
    }

    #[must_use]
    pub fn labeled(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// The static description of a workflow: identity, topology, and branch
/// tables. Node and edge order is preserved from declaration, which keeps
/// rendering deterministic.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GraphDefinition {
    pub id: WorkflowId,
    pub name: String,
    pub entry_point: NodeId,
    pub nodes: Vec<NodeSpec>,
    pub edges: Vec<Edge>,
    /// Branch tables keyed by source node. When present for a node they
    /// take precedence over its plain edges.
    #[serde(default)]
    pub branches: FxHashMap<NodeId, Vec<Branch>>,
    #[serde(default = "default_checkpointing")]
    pub checkpointing_enabled: bool,
}

fn default_checkpointing() -> bool {
    true
}

impl GraphDefinition {
    /// Look up a node spec by id.
    #[must_use]
    pub fn node(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Plain edges leaving `id`, in declaration order.
    pub fn edges_from<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Edge> {
        self.edges.iter().filter(move |e| e.from == id)
    }
}
