use serde_json::json;

use probeflow::graph::{
    validate, GraphDefinition, NodeKind, RegistryError, ValidationError, WorkflowBuilder,
    WorkflowRegistry, END,
};
use probeflow::types::Severity;

mod common;
use common::ProbePlugin;

fn valid_builder() -> WorkflowBuilder {
    WorkflowBuilder::new("wf", "Workflow")
        .entry_point("a")
        .plugin_node_with_args("a", "A", "probe", json!({"depth": 2}))
        .aggregation_node("b", "B")
        .edge("a", "b")
        .labeled_edge("b", END, "done")
        .register_plugin(
            "probe",
            ProbePlugin {
                check: "ping",
                severity: Severity::Info,
            },
        )
}

#[test]
fn registry_round_trip() {
    let mut registry = WorkflowRegistry::new();
    let created = registry.create_workflow(valid_builder()).unwrap();
    let fetched = registry.compile_workflow("wf").unwrap();
    assert_eq!(created.definition, fetched.definition);
    assert_eq!(fetched.entry_point(), "a");
    assert!(registry.compile_workflow("missing").is_none());
}

#[test]
fn plugin_args_reach_the_definition() {
    let mut registry = WorkflowRegistry::new();
    let workflow = registry.create_workflow(valid_builder()).unwrap();
    let node = workflow.node("a").unwrap();
    match &node.kind {
        NodeKind::Plugin { plugin_id, args } => {
            assert_eq!(plugin_id, "probe");
            assert_eq!(args["depth"], 2);
        }
        other => panic!("expected plugin node, got {other:?}"),
    }
}

#[test]
fn missing_entry_point_is_rejected() {
    let mut registry = WorkflowRegistry::new();
    let err = registry
        .create_workflow(
            WorkflowBuilder::new("wf", "Workflow")
                .entry_point("ghost")
                .aggregation_node("a", "A"),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        RegistryError::Validation(ValidationError::MissingEntryPoint { .. })
    ));
}

#[test]
fn duplicate_node_ids_are_rejected() {
    let mut registry = WorkflowRegistry::new();
    let err = registry
        .create_workflow(
            WorkflowBuilder::new("wf", "Workflow")
                .entry_point("a")
                .aggregation_node("a", "First")
                .aggregation_node("a", "Second"),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        RegistryError::Validation(ValidationError::DuplicateNodeId { .. })
    ));
}

#[test]
fn dangling_edges_are_rejected() {
    let mut registry = WorkflowRegistry::new();
    let err = registry
        .create_workflow(
            WorkflowBuilder::new("wf", "Workflow")
                .entry_point("a")
                .aggregation_node("a", "A")
                .edge("a", "ghost"),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        RegistryError::Validation(ValidationError::DanglingEdge { .. })
    ));
}

#[test]
fn end_is_a_legal_edge_target() {
    let definition = GraphDefinition {
        id: "wf".into(),
        name: "Workflow".into(),
        entry_point: "a".into(),
        nodes: vec![probeflow::graph::NodeSpec::new(
            "a",
            "A",
            NodeKind::Aggregation,
        )],
        edges: vec![probeflow::graph::Edge::new("a", END)],
        branches: Default::default(),
        checkpointing_enabled: true,
    };
    assert!(validate(&definition).is_ok());
}

#[test]
fn definition_serde_round_trip_keeps_tagged_kinds() {
    let mut registry = WorkflowRegistry::new();
    let workflow = registry.create_workflow(valid_builder()).unwrap();
    let json = serde_json::to_value(&workflow.definition).unwrap();
    assert_eq!(json["nodes"][0]["kind"], "plugin");
    assert_eq!(json["nodes"][1]["kind"], "aggregation");
    assert_eq!(json["edges"][1]["label"], "done");

    let back: GraphDefinition = serde_json::from_value(json).unwrap();
    assert_eq!(back, workflow.definition);
}
