//! Deterministic rendering of workflow graphs and run progress.
//!
//! Everything here is a pure function of its input. Node and edge order in
//! the output follows declaration order in the definition, so two calls on
//! the same definition produce byte-identical text.

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use thiserror::Error;

use crate::graph::{GraphDefinition, NodeKind};
use crate::state::RunState;
use crate::types::NodeId;

/// Supported export formats.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportFormat {
    Mermaid,
    Json,
    Markdown,
}

#[derive(Debug, Error, Diagnostic)]
pub enum VizError {
    #[error("unknown export format '{0}'")]
    #[diagnostic(
        code(probeflow::viz::unknown_format),
        help("supported formats: mermaid, json, markdown")
    )]
    UnknownFormat(String),

    #[error("visualization serialization failed")]
    #[diagnostic(code(probeflow::viz::serde))]
    Serde(#[from] serde_json::Error),
}

impl std::str::FromStr for ExportFormat {
    type Err = VizError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mermaid" => Ok(ExportFormat::Mermaid),
            "json" => Ok(ExportFormat::Json),
            "markdown" => Ok(ExportFormat::Markdown),
            other => Err(VizError::UnknownFormat(other.to_owned())),
        }
    }
}

/// Cumulative execution stats for one node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeMetric {
    pub node: NodeId,
    pub visits: usize,
    pub total_ms: u64,
}

/// Diagram plus run progress, ready for export.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Visualization {
    pub workflow_id: String,
    pub diagram: String,
    pub metrics: Vec<NodeMetric>,
    pub execution_path: Vec<String>,
    pub current_node: NodeId,
}

/// Render the static definition as a mermaid flowchart.
///
/// The output always contains a `START` marker, an `END` marker, every node
/// id, and every edge. Identical definitions render to identical text.
pub fn mermaid_diagram(definition: &GraphDefinition) -> String {
    let mut out = String::from("flowchart TD\n");
    out.push_str("    START([START])\n");
    out.push_str("    END([END])\n");

    for node in &definition.nodes {
        let line = match node.kind {
            NodeKind::Decision => format!("    {}{{\"{}\"}}\n", node.id, node.name),
            NodeKind::Human => format!("    {}([\"{}\"])\n", node.id, node.name),
            NodeKind::Plugin { .. } | NodeKind::Aggregation => {
                format!("    {}[\"{}\"]\n", node.id, node.name)
            }
        };
        out.push_str(&line);
    }

    let _ = writeln!(out, "    START --> {}", definition.entry_point);
    for edge in &definition.edges {
        match &edge.label {
            Some(label) => {
                let _ = writeln!(out, "    {} -->|{}| {}", edge.from, label, edge.to);
            }
            None => {
                let _ = writeln!(out, "    {} --> {}", edge.from, edge.to);
            }
        }
    }
    for (source, branches) in ordered_branches(definition) {
        for branch in branches {
            let _ = writeln!(out, "    {} -->|{}| {}", source, branch.id, branch.target);
        }
    }
    out
}

// Branch tables live in a hash map; iterate sources in node declaration
// order to keep rendering deterministic.
fn ordered_branches<'a>(
    definition: &'a GraphDefinition,
) -> impl Iterator<Item = (&'a NodeId, &'a [crate::branching::Branch])> {
    definition.nodes.iter().filter_map(move |node| {
        definition
            .branches
            .get(&node.id)
            .map(|branches| (&node.id, branches.as_slice()))
    })
}

/// Aggregate per-node visit counts and cumulative timings, ordered by first
/// visit.
pub fn node_metrics(state: &RunState) -> Vec<NodeMetric> {
    let mut metrics: Vec<NodeMetric> = Vec::new();
    for node in &state.visited_nodes {
        if let Some(existing) = metrics.iter_mut().find(|m| &m.node == node) {
            existing.visits += 1;
        } else {
            metrics.push(NodeMetric {
                node: node.clone(),
                visits: 1,
                total_ms: state.node_timings.get(node).copied().unwrap_or(0),
            });
        }
    }
    metrics
}

/// Compose diagram, metrics, and path into one exportable value.
pub fn build_visualization(definition: &GraphDefinition, state: &RunState) -> Visualization {
    Visualization {
        workflow_id: definition.id.clone(),
        diagram: mermaid_diagram(definition),
        metrics: node_metrics(state),
        execution_path: state.execution_path.clone(),
        current_node: state.current_node.clone(),
    }
}

/// Serialize a visualization in the requested format.
pub fn export_visualization(viz: &Visualization, format: ExportFormat) -> Result<String, VizError> {
    match format {
        ExportFormat::Mermaid => Ok(viz.diagram.clone()),
        ExportFormat::Json => Ok(serde_json::to_string_pretty(viz)?),
        ExportFormat::Markdown => {
            let mut out = String::from("# Workflow Visualization\n\n");
            let _ = writeln!(out, "Workflow: `{}`\n", viz.workflow_id);
            out.push_str("```mermaid\n");
            out.push_str(&viz.diagram);
            out.push_str("```\n");
            if !viz.execution_path.is_empty() {
                out.push_str("\n## Execution path\n\n");
                for (i, label) in viz.execution_path.iter().enumerate() {
                    let _ = writeln!(out, "{}. {}", i + 1, label);
                }
            }
            if !viz.metrics.is_empty() {
                out.push_str("\n## Node timings\n\n");
                out.push_str("| Node | Visits | Total ms |\n|---|---|---|\n");
                for metric in &viz.metrics {
                    let _ = writeln!(
                        out,
                        "| {} | {} | {} |",
                        metric.node, metric.visits, metric.total_ms
                    );
                }
            }
            Ok(out)
        }
    }
}
