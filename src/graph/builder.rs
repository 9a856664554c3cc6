//! Fluent builder for workflow definitions.
//!
//! The builder accumulates nodes, edges, branch tables, and plugin handler
//! bindings, then hands the result to the
//! [`WorkflowRegistry`](crate::graph::WorkflowRegistry) for validation and
//! compilation.
//!
//! # Examples
//!
//! ```rust
//! use probeflow::branching::severity_routing;
//! use probeflow::graph::{WorkflowBuilder, END};
//!
//! let builder = WorkflowBuilder::new("tls-audit", "TLS audit")
//!     .entry_point("probe")
//!     .plugin_node("probe", "Probe endpoint", "tls-probe")
//!     .decision_node("triage", "Triage findings")
//!     .plugin_node("deep-scan", "Deep scan", "tls-deep")
//!     .aggregation_node("report", "Collect results")
//!     .edge("probe", "triage")
//!     .edge("deep-scan", "report")
//!     .edge("report", END)
//!     .branches("triage", severity_routing("deep-scan", "report", "report", "report"));
//! ```

use rustc_hash::FxHashMap;
use std::sync::Arc;

use super::definition::{Edge, GraphDefinition, NodeKind, NodeSpec};
use crate::branching::Branch;
use crate::plugin::PluginHandler;
use crate::types::{NodeId, WorkflowId};

/// Builder for a [`GraphDefinition`] plus its plugin handler bindings.
pub struct WorkflowBuilder {
    id: WorkflowId,
    name: String,
    entry_point: NodeId,
    nodes: Vec<NodeSpec>,
    edges: Vec<Edge>,
    branches: FxHashMap<NodeId, Vec<Branch>>,
    checkpointing_enabled: bool,
    pub(crate) handlers: FxHashMap<String, Arc<dyn PluginHandler>>,
}

impl WorkflowBuilder {
    #[must_use]
    pub fn new(id: impl Into<WorkflowId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            entry_point: NodeId::new(),
            nodes: Vec::new(),
            edges: Vec::new(),
            branches: FxHashMap::default(),
            checkpointing_enabled: true,
            handlers: FxHashMap::default(),
        }
    }

    /// Set the node execution starts from. Must name a declared node.
    #[must_use]
    pub fn entry_point(mut self, node: impl Into<NodeId>) -> Self {
        self.entry_point = node.into();
        self
    }

    /// Add a plugin node with no handler arguments.
    #[must_use]
    pub fn plugin_node(
        self,
        id: impl Into<NodeId>,
        name: impl Into<String>,
        plugin_id: impl Into<String>,
    ) -> Self {
        self.plugin_node_with_args(id, name, plugin_id, serde_json::Value::Null)
    }

    /// Add a plugin node with opaque handler arguments.
    #[must_use]
    pub fn plugin_node_with_args(
        mut self,
        id: impl Into<NodeId>,
        name: impl Into<String>,
        plugin_id: impl Into<String>,
        args: serde_json::Value,
    ) -> Self {
        self.nodes.push(NodeSpec::new(
            id,
            name,
            NodeKind::Plugin {
                plugin_id: plugin_id.into(),
                args,
            },
        ));
        self
    }

    #[must_use]
    pub fn decision_node(mut self, id: impl Into<NodeId>, name: impl Into<String>) -> Self {
        self.nodes.push(NodeSpec::new(id, name, NodeKind::Decision));
        self
    }

    #[must_use]
    pub fn aggregation_node(mut self, id: impl Into<NodeId>, name: impl Into<String>) -> Self {
        self.nodes
            .push(NodeSpec::new(id, name, NodeKind::Aggregation));
        self
    }

    #[must_use]
    pub fn human_node(mut self, id: impl Into<NodeId>, name: impl Into<String>) -> Self {
        self.nodes.push(NodeSpec::new(id, name, NodeKind::Human));
        self
    }

    /// Add a plain edge. The target may be the END sentinel.
    #[must_use]
    pub fn edge(mut self, from: impl Into<NodeId>, to: impl Into<NodeId>) -> Self {
        self.edges.push(Edge::new(from, to));
        self
    }

    /// Add a labeled edge; the label shows up in diagrams.
    #[must_use]
    pub fn labeled_edge(
        mut self,
        from: impl Into<NodeId>,
        to: impl Into<NodeId>,
        label: impl Into<String>,
    ) -> Self {
        self.edges.push(Edge::new(from, to).labeled(label));
        self
    }

    /// Attach a branch table to a node. Branches override the node's plain
    /// edges for routing.
    #[must_use]
    pub fn branches(mut self, node: impl Into<NodeId>, branches: Vec<Branch>) -> Self {
        self.branches.insert(node.into(), branches);
        self
    }

    /// Bind a handler implementation to a plugin id.
    #[must_use]
    pub fn register_plugin(
        mut self,
        plugin_id: impl Into<String>,
        handler: impl PluginHandler + 'static,
    ) -> Self {
        self.handlers.insert(plugin_id.into(), Arc::new(handler));
        self
    }

    /// Toggle durable checkpointing for runs of this workflow.
    #[must_use]
    pub fn checkpointing(mut self, enabled: bool) -> Self {
        self.checkpointing_enabled = enabled;
        self
    }

    /// Produce the immutable definition; validation happens at
    /// `create_workflow`.
    pub(crate) fn into_definition(self) -> (GraphDefinition, FxHashMap<String, Arc<dyn PluginHandler>>) {
        let definition = GraphDefinition {
            id: self.id,
            name: self.name,
            entry_point: self.entry_point,
            nodes: self.nodes,
            edges: self.edges,
            branches: self.branches,
            checkpointing_enabled: self.checkpointing_enabled,
        };
        (definition, self.handlers)
    }
}
