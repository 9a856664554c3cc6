//! Structural validation of workflow definitions.
//!
//! Runs once at `create_workflow` time. A definition that passes here can
//! be executed without re-checking topology: every referenced node exists,
//! ids are unique, and the entry point is real.

use miette::Diagnostic;
use rustc_hash::FxHashSet;
use thiserror::Error;

use super::definition::{GraphDefinition, END};
use crate::types::NodeId;

/// A workflow definition violated a structural invariant.
///
/// Each variant names the invariant and the offending identifier so the
/// caller can fix the definition without spelunking.
#[derive(Debug, Error, Diagnostic)]
pub enum ValidationError {
    #[error("entry point '{entry_point}' is not a node in workflow '{workflow}'")]
    #[diagnostic(
        code(probeflow::graph::missing_entry),
        help("The entry point must match the id of a declared node.")
    )]
    MissingEntryPoint {
        workflow: String,
        entry_point: NodeId,
    },

    #[error("duplicate node id '{node}' in workflow '{workflow}'")]
    #[diagnostic(
        code(probeflow::graph::duplicate_node),
        help("Node ids must be unique within a definition.")
    )]
    DuplicateNodeId { workflow: String, node: NodeId },

    #[error("edge references unknown node '{node}' in workflow '{workflow}'")]
    #[diagnostic(
        code(probeflow::graph::dangling_edge),
        help("Every edge endpoint must be a declared node id (or the END sentinel as target).")
    )]
    DanglingEdge { workflow: String, node: NodeId },

    #[error("branch '{branch}' targets unknown node '{node}' in workflow '{workflow}'")]
    #[diagnostic(
        code(probeflow::graph::dangling_branch),
        help("Branch targets must be declared node ids or the END sentinel.")
    )]
    DanglingBranchTarget {
        workflow: String,
        branch: String,
        node: NodeId,
    },
}

/// Check every structural invariant of a definition.
pub fn validate(definition: &GraphDefinition) -> Result<(), ValidationError> {
    let workflow = definition.id.clone();

    let mut seen: FxHashSet<&str> = FxHashSet::default();
    for node in &definition.nodes {
        if !seen.insert(node.id.as_str()) {
            return Err(ValidationError::DuplicateNodeId {
                workflow,
                node: node.id.clone(),
            });
        }
    }

    if !seen.contains(definition.entry_point.as_str()) {
        return Err(ValidationError::MissingEntryPoint {
            workflow,
            entry_point: definition.entry_point.clone(),
        });
    }

    for edge in &definition.edges {
        if !seen.contains(edge.from.as_str()) {
            return Err(ValidationError::DanglingEdge {
                workflow,
                node: edge.from.clone(),
            });
        }
        if edge.to != END && !seen.contains(edge.to.as_str()) {
            return Err(ValidationError::DanglingEdge {
                workflow,
                node: edge.to.clone(),
            });
        }
    }

    for (source, branches) in &definition.branches {
        if !seen.contains(source.as_str()) {
            return Err(ValidationError::DanglingEdge {
                workflow,
                node: source.clone(),
            });
        }
        for branch in branches {
            if branch.target != END && !seen.contains(branch.target.as_str()) {
                return Err(ValidationError::DanglingBranchTarget {
                    workflow,
                    branch: branch.id.clone(),
                    node: branch.target.clone(),
                });
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::branching::Branch;
    use crate::graph::definition::{Edge, NodeKind, NodeSpec};
    use rustc_hash::FxHashMap;

    fn two_node_definition() -> GraphDefinition {
        GraphDefinition {
            id: "wf".into(),
            name: "wf".into(),
            entry_point: "a".into(),
            nodes: vec![
                NodeSpec::new("a", "A", NodeKind::Decision),
                NodeSpec::new("b", "B", NodeKind::Aggregation),
            ],
            edges: vec![Edge::new("a", "b"), Edge::new("b", END)],
            branches: FxHashMap::default(),
            checkpointing_enabled: true,
        }
    }

    #[test]
    fn valid_definition_passes() {
        assert!(validate(&two_node_definition()).is_ok());
    }

    #[test]
    fn missing_entry_point_rejected() {
        let mut def = two_node_definition();
        def.entry_point = "ghost".into();
        assert!(matches!(
            validate(&def),
            Err(ValidationError::MissingEntryPoint { entry_point, .. }) if entry_point == "ghost"
        ));
    }

    #[test]
    fn duplicate_node_id_rejected() {
        let mut def = two_node_definition();
        def.nodes.push(NodeSpec::new("a", "again", NodeKind::Decision));
        assert!(matches!(
            validate(&def),
            Err(ValidationError::DuplicateNodeId { node, .. }) if node == "a"
        ));
    }

    #[test]
    fn dangling_edge_rejected() {
        let mut def = two_node_definition();
        def.edges.push(Edge::new("b", "ghost"));
        assert!(matches!(
            validate(&def),
            Err(ValidationError::DanglingEdge { node, .. }) if node == "ghost"
        ));
    }

    #[test]
    fn end_sentinel_is_a_legal_target() {
        let def = two_node_definition();
        assert!(validate(&def).is_ok());
    }

    #[test]
    fn dangling_branch_target_rejected() {
        let mut def = two_node_definition();
        def.branches
            .insert("a".into(), vec![Branch::new("br", "ghost")]);
        assert!(matches!(
            validate(&def),
            Err(ValidationError::DanglingBranchTarget { node, .. }) if node == "ghost"
        ));
    }
}
