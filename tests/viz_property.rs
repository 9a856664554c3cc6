use proptest::prelude::*;
use rustc_hash::FxHashMap;

use probeflow::branching::Branch;
use probeflow::graph::{Edge, GraphDefinition, NodeKind, NodeSpec, END};
use probeflow::viz::mermaid_diagram;

/// Chain the ids in order, last node to END, with a branch table on the
/// first node so branch rendering is exercised too.
fn chain_definition(ids: &[String]) -> GraphDefinition {
    let nodes = ids
        .iter()
        .enumerate()
        .map(|(i, id)| {
            let kind = match i % 3 {
                0 => NodeKind::Aggregation,
                1 => NodeKind::Decision,
                _ => NodeKind::Human,
            };
            NodeSpec::new(id.clone(), id.to_uppercase(), kind)
        })
        .collect();
    let mut edges: Vec<Edge> = ids
        .windows(2)
        .map(|pair| Edge::new(pair[0].clone(), pair[1].clone()))
        .collect();
    edges.push(Edge::new(ids.last().unwrap().clone(), END));
    let mut branches = FxHashMap::default();
    branches.insert(
        ids[0].clone(),
        vec![Branch::new("bail-out", END).fallback()],
    );
    GraphDefinition {
        id: "prop".into(),
        name: "Property graph".into(),
        entry_point: ids[0].clone(),
        nodes,
        edges,
        branches,
        checkpointing_enabled: true,
    }
}

proptest! {
    // Rendering is a pure function of the definition: repeated calls are
    // byte-identical, and the text mentions the markers, every node id,
    // every chained edge, and the branch label.
    #[test]
    fn mermaid_rendering_is_deterministic_and_complete(
        ids in proptest::collection::btree_set("[a-z]{2,6}", 1..8),
    ) {
        let ids: Vec<String> = ids.into_iter().collect();
        let definition = chain_definition(&ids);

        let first = mermaid_diagram(&definition);
        prop_assert_eq!(&first, &mermaid_diagram(&definition));

        prop_assert!(first.starts_with("flowchart TD"));
        prop_assert!(first.contains("START([START])"));
        prop_assert!(first.contains("END([END])"));
        let entry_edge = format!("START --> {}", ids[0]);
        prop_assert!(first.contains(&entry_edge));
        for id in &ids {
            prop_assert!(first.contains(id.as_str()));
        }
        for pair in ids.windows(2) {
            let chained_edge = format!("{} --> {}", pair[0], pair[1]);
            prop_assert!(first.contains(&chained_edge));
        }
        let branch_edge = format!("{} -->|bail-out| END", ids[0]);
        prop_assert!(first.contains(&branch_edge));
    }
}
