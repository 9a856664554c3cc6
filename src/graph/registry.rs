//! Compiled workflows and the registry that owns them.
//!
//! `create_workflow` is the only path from a [`WorkflowBuilder`] to something
//! the runner will execute: it validates the definition, checks that every
//! plugin node has a bound handler, and stores the compiled artifact under
//! its workflow id.

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::instrument;

use super::builder::WorkflowBuilder;
use super::definition::{Edge, GraphDefinition, NodeKind, NodeSpec};
use super::validation::{validate, ValidationError};
use crate::branching::Branch;
use crate::plugin::PluginHandler;
use crate::types::{NodeId, WorkflowId};

/// Errors raised while registering a workflow.
#[derive(Debug, Error, Diagnostic)]
pub enum RegistryError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Validation(#[from] ValidationError),

    #[error("plugin node '{node}' references plugin '{plugin_id}' but no handler is registered")]
    #[diagnostic(
        code(probeflow::graph::missing_handler),
        help("bind the handler with WorkflowBuilder::register_plugin before create_workflow")
    )]
    MissingHandler { node: NodeId, plugin_id: String },
}

/// An immutable, validated workflow ready for execution.
///
/// Cheap to share: the registry hands out `Arc<CompiledWorkflow>` and the
/// runner never mutates it.
pub struct CompiledWorkflow {
    pub definition: GraphDefinition,
    node_index: FxHashMap<NodeId, usize>,
    handlers: FxHashMap<String, Arc<dyn PluginHandler>>,
}

impl CompiledWorkflow {
    pub fn id(&self) -> &WorkflowId {
        &self.definition.id
    }

    pub fn entry_point(&self) -> &NodeId {
        &self.definition.entry_point
    }

    /// Look up a node spec by id.
    pub fn node(&self, id: &str) -> Option<&NodeSpec> {
        self.node_index.get(id).map(|&i| &self.definition.nodes[i])
    }

    /// Plain edges leaving `node`, in declaration order.
    pub fn edges_from<'a>(&'a self, node: &'a str) -> impl Iterator<Item = &'a Edge> {
        self.definition.edges.iter().filter(move |e| e.from == node)
    }

    /// Branch table for `node`, if one was declared.
    pub fn branches_for(&self, node: &str) -> Option<&[Branch]> {
        self.definition.branches.get(node).map(Vec::as_slice)
    }

    /// Handler bound to a plugin id.
    pub fn handler(&self, plugin_id: &str) -> Option<Arc<dyn PluginHandler>> {
        self.handlers.get(plugin_id).cloned()
    }
}

impl std::fmt::Debug for CompiledWorkflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledWorkflow")
            .field("id", &self.definition.id)
            .field("nodes", &self.definition.nodes.len())
            .field("edges", &self.definition.edges.len())
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// In-process store of compiled workflows, keyed by workflow id.
#[derive(Default)]
pub struct WorkflowRegistry {
    workflows: FxHashMap<WorkflowId, Arc<CompiledWorkflow>>,
}

impl WorkflowRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and compile a builder, replacing any previous registration
    /// under the same id.
    #[instrument(skip(self, builder), fields(workflow))]
    pub fn create_workflow(
        &mut self,
        builder: WorkflowBuilder,
    ) -> Result<Arc<CompiledWorkflow>, RegistryError> {
        let (definition, handlers) = builder.into_definition();
        tracing::Span::current().record("workflow", definition.id.as_str());
        validate(&definition)?;

        for spec in &definition.nodes {
            if let NodeKind::Plugin { plugin_id, .. } = &spec.kind {
                if !handlers.contains_key(plugin_id) {
                    return Err(RegistryError::MissingHandler {
                        node: spec.id.clone(),
                        plugin_id: plugin_id.clone(),
                    });
                }
            }
        }

        let node_index = definition
            .nodes
            .iter()
            .enumerate()
            .map(|(i, spec)| (spec.id.clone(), i))
            .collect();

        let compiled = Arc::new(CompiledWorkflow {
            definition,
            node_index,
            handlers,
        });
        self.workflows
            .insert(compiled.definition.id.clone(), Arc::clone(&compiled));
        tracing::debug!(
            nodes = compiled.definition.nodes.len(),
            edges = compiled.definition.edges.len(),
            "workflow registered"
        );
        Ok(compiled)
    }

    /// Fetch a previously registered workflow.
    pub fn compile_workflow(&self, id: &str) -> Option<Arc<CompiledWorkflow>> {
        self.workflows.get(id).cloned()
    }

    pub fn workflow_ids(&self) -> impl Iterator<Item = &WorkflowId> {
        self.workflows.keys()
    }
}
