//! Template validation, layering, and run-state materialization.
//!
//! Uses `petgraph` to model node dependencies as a directed graph.
//! Topological sort detects cycles, and depth-based grouping produces the
//! layer view (all nodes in a layer can run concurrently). Validation also
//! checks the template's explicit edge list against the `depends_on`
//! relation and requires a contract for every node.

use std::collections::{HashMap, HashSet};

use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use taskflow_types::run::{NodeStatus, RunDag, RunNode};
use taskflow_types::workflow::{GraphEdge, WorkflowTemplate};
use thiserror::Error;

/// Why a template failed validation.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("template has no nodes")]
    EmptyGraph,

    #[error("duplicate node id '{0}'")]
    DuplicateNode(String),

    #[error("node '{node}' depends on unknown node '{dependency}'")]
    UnknownDependency { node: String, dependency: String },

    #[error("cycle detected involving node '{0}'")]
    CycleDetected(String),

    #[error("edge list does not match depends_on: {0}")]
    EdgeMismatch(String),

    #[error("node '{0}' has no contract")]
    MissingContract(String),
}

// ---------------------------------------------------------------------------
// Validation + layering
// ---------------------------------------------------------------------------

/// Validate a template and compute its topological layers.
///
/// Checks, in order:
/// 1. at least one node, no duplicate IDs;
/// 2. every `depends_on` entry names a known node;
/// 3. the explicit `edges` list matches the `depends_on` relation exactly
///    (no missing edges, no extra edges, no unknown endpoints);
/// 4. every node has a contract entry;
/// 5. the graph is acyclic.
///
/// Returns node IDs grouped by depth: index 0 holds the root nodes, and
/// every node's dependencies live in strictly earlier layers.
pub fn validate_graph(template: &WorkflowTemplate) -> Result<Vec<Vec<String>>, GraphError> {
    let nodes = &template.graph.nodes;
    if nodes.is_empty() {
        return Err(GraphError::EmptyGraph);
    }

    let mut id_to_idx: HashMap<&str, usize> = HashMap::with_capacity(nodes.len());
    for (i, node) in nodes.iter().enumerate() {
        if id_to_idx.insert(node.id.as_str(), i).is_some() {
            return Err(GraphError::DuplicateNode(node.id.clone()));
        }
    }

    // depends_on is authoritative; the edge list must agree with it.
    let mut declared: HashSet<(&str, &str)> = HashSet::new();
    for node in nodes {
        for dep in &node.depends_on {
            if !id_to_idx.contains_key(dep.as_str()) {
                return Err(GraphError::UnknownDependency {
                    node: node.id.clone(),
                    dependency: dep.clone(),
                });
            }
            declared.insert((dep.as_str(), node.id.as_str()));
        }
    }

    let mut listed: HashSet<(&str, &str)> = HashSet::new();
    for edge in &template.graph.edges {
        for endpoint in [&edge.source, &edge.target] {
            if !id_to_idx.contains_key(endpoint.as_str()) {
                return Err(GraphError::EdgeMismatch(format!(
                    "edge references unknown node '{endpoint}'"
                )));
            }
        }
        listed.insert((edge.source.as_str(), edge.target.as_str()));
    }
    if let Some((src, dst)) = declared.difference(&listed).next() {
        return Err(GraphError::EdgeMismatch(format!(
            "missing edge {src} -> {dst}"
        )));
    }
    if let Some((src, dst)) = listed.difference(&declared).next() {
        return Err(GraphError::EdgeMismatch(format!(
            "edge {src} -> {dst} has no matching depends_on entry"
        )));
    }

    for node in nodes {
        if !template.contracts.contains_key(&node.id) {
            return Err(GraphError::MissingContract(node.id.clone()));
        }
    }

    // Build directed graph: edge from dependency -> dependent.
    let mut graph = DiGraph::<&str, ()>::new();
    let node_indices: Vec<_> = nodes.iter().map(|n| graph.add_node(n.id.as_str())).collect();
    for node in nodes {
        let to_idx = id_to_idx[node.id.as_str()];
        for dep in &node.depends_on {
            let from_idx = id_to_idx[dep.as_str()];
            graph.add_edge(node_indices[from_idx], node_indices[to_idx], ());
        }
    }

    // Topological sort -- detects cycles.
    let sorted = toposort(&graph, None).map_err(|cycle| {
        let node_id = graph[cycle.node_id()];
        GraphError::CycleDetected(node_id.to_string())
    })?;

    // Depth per node: root nodes at 0, otherwise max dependency depth + 1.
    let mut depths: HashMap<&str, usize> = HashMap::new();
    for &node_idx in &sorted {
        let node_id = graph[node_idx];
        let node = &nodes[id_to_idx[node_id]];
        let depth = node
            .depends_on
            .iter()
            .map(|dep| depths.get(dep.as_str()).copied().unwrap_or(0) + 1)
            .max()
            .unwrap_or(0);
        depths.insert(node_id, depth);
    }

    let max_depth = depths.values().copied().max().unwrap_or(0);
    let mut layers: Vec<Vec<String>> = vec![vec![]; max_depth + 1];
    for node in nodes {
        layers[depths[node.id.as_str()]].push(node.id.clone());
    }

    Ok(layers)
}

// ---------------------------------------------------------------------------
// Materialization
// ---------------------------------------------------------------------------

/// Deep-copy a template graph into fresh run state.
///
/// Every node starts `Pending` with zero attempts and cleared output/error.
/// Callers validate first; this never aliases template storage.
pub fn materialize(template: &WorkflowTemplate) -> RunDag {
    let nodes = template
        .graph
        .nodes
        .iter()
        .map(|n| RunNode {
            id: n.id.clone(),
            name: n.name.clone(),
            description: n.description.clone(),
            depends_on: n.depends_on.clone(),
            status: NodeStatus::Pending,
            attempts: 0,
            last_output: None,
            last_error: None,
            started_at: None,
            ended_at: None,
        })
        .collect();

    RunDag {
        nodes,
        edges: template.graph.edges.clone(),
        contracts: template.contracts.clone(),
        planner_notes: None,
    }
}

/// Pending nodes forward-reachable from `node_id` over the run's edges.
///
/// BFS over `source -> target` edges. Used by reflection's replan action to
/// decide which descendants to skip after a terminal node failure.
pub fn pending_descendants(dag: &RunDag, node_id: &str) -> Vec<String> {
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for GraphEdge { source, target } in &dag.edges {
        adjacency.entry(source.as_str()).or_default().push(target.as_str());
    }

    let mut visited: HashSet<&str> = HashSet::new();
    let mut queue: Vec<&str> = vec![node_id];
    let mut result = Vec::new();
    while let Some(current) = queue.pop() {
        for &next in adjacency.get(current).into_iter().flatten() {
            if visited.insert(next) {
                queue.push(next);
                if dag.node(next).is_some_and(|n| n.status == NodeStatus::Pending) {
                    result.push(next.to_string());
                }
            }
        }
    }
    result.sort();
    result
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use taskflow_types::workflow::{NodeContract, NodeDefinition, WorkflowGraph};

    fn node(id: &str, depends_on: Vec<&str>) -> NodeDefinition {
        NodeDefinition {
            id: id.to_string(),
            name: id.to_string(),
            description: None,
            depends_on: depends_on.into_iter().map(String::from).collect(),
        }
    }

    /// Helper: build a template whose edge list is derived from depends_on
    /// and whose every node has a default contract.
    fn template(nodes: Vec<NodeDefinition>) -> WorkflowTemplate {
        let edges = nodes
            .iter()
            .flat_map(|n| {
                n.depends_on.iter().map(|dep| GraphEdge {
                    source: dep.clone(),
                    target: n.id.clone(),
                })
            })
            .collect();
        let contracts: HashMap<String, NodeContract> = nodes
            .iter()
            .map(|n| (n.id.clone(), NodeContract::default()))
            .collect();
        WorkflowTemplate {
            id: "template.test.v1".to_string(),
            name: "test".to_string(),
            version: 1,
            description: None,
            graph: WorkflowGraph { nodes, edges },
            contracts,
        }
    }

    #[test]
    fn independent_nodes_single_layer() {
        let t = template(vec![node("a", vec![]), node("b", vec![]), node("c", vec![])]);
        let layers = validate_graph(&t).unwrap();
        assert_eq!(layers.len(), 1);
        assert_eq!(layers[0].len(), 3);
    }

    #[test]
    fn linear_chain_n_layers() {
        // a -> b -> c
        let t = template(vec![
            node("a", vec![]),
            node("b", vec!["a"]),
            node("c", vec!["b"]),
        ]);
        let layers = validate_graph(&t).unwrap();
        assert_eq!(layers.len(), 3);
        assert_eq!(layers[0], vec!["a"]);
        assert_eq!(layers[1], vec!["b"]);
        assert_eq!(layers[2], vec!["c"]);
    }

    #[test]
    fn diamond_three_layers() {
        // a -> {b, c} -> d
        let t = template(vec![
            node("a", vec![]),
            node("b", vec!["a"]),
            node("c", vec!["a"]),
            node("d", vec!["b", "c"]),
        ]);
        let layers = validate_graph(&t).unwrap();
        assert_eq!(layers.len(), 3);
        assert_eq!(layers[1].len(), 2, "b and c share a layer");
        assert_eq!(layers[2], vec!["d"]);
    }

    #[test]
    fn cycle_rejected() {
        let t = template(vec![node("a", vec!["b"]), node("b", vec!["a"])]);
        let err = validate_graph(&t).unwrap_err();
        assert!(matches!(err, GraphError::CycleDetected(_)), "got: {err}");
    }

    #[test]
    fn empty_template_rejected() {
        let t = template(vec![]);
        assert!(matches!(validate_graph(&t).unwrap_err(), GraphError::EmptyGraph));
    }

    #[test]
    fn unknown_dependency_rejected() {
        let t = template(vec![node("a", vec!["missing"])]);
        let err = validate_graph(&t).unwrap_err();
        assert!(err.to_string().contains("unknown node 'missing'"));
    }

    #[test]
    fn duplicate_node_rejected() {
        let t = template(vec![node("a", vec![]), node("a", vec![])]);
        assert!(matches!(
            validate_graph(&t).unwrap_err(),
            GraphError::DuplicateNode(_)
        ));
    }

    #[test]
    fn missing_edge_rejected() {
        let mut t = template(vec![node("a", vec![]), node("b", vec!["a"])]);
        t.graph.edges.clear();
        let err = validate_graph(&t).unwrap_err();
        assert!(err.to_string().contains("missing edge a -> b"), "got: {err}");
    }

    #[test]
    fn extra_edge_rejected() {
        let mut t = template(vec![node("a", vec![]), node("b", vec![])]);
        t.graph.edges.push(GraphEdge {
            source: "a".to_string(),
            target: "b".to_string(),
        });
        let err = validate_graph(&t).unwrap_err();
        assert!(err.to_string().contains("no matching depends_on"), "got: {err}");
    }

    #[test]
    fn missing_contract_rejected() {
        let mut t = template(vec![node("a", vec![]), node("b", vec!["a"])]);
        t.contracts.remove("b");
        assert!(matches!(
            validate_graph(&t).unwrap_err(),
            GraphError::MissingContract(id) if id == "b"
        ));
    }

    #[test]
    fn materialize_resets_node_state() {
        let t = template(vec![node("a", vec![]), node("b", vec!["a"])]);
        let dag = materialize(&t);
        assert_eq!(dag.nodes.len(), 2);
        assert!(dag.nodes.iter().all(|n| n.status == NodeStatus::Pending));
        assert!(dag.nodes.iter().all(|n| n.attempts == 0));
        assert_eq!(dag.edges.len(), 1);
        assert!(dag.contracts.contains_key("a"));
    }

    #[test]
    fn pending_descendants_walks_transitively() {
        // a -> b -> d, a -> c
        let t = template(vec![
            node("a", vec![]),
            node("b", vec!["a"]),
            node("c", vec!["a"]),
            node("d", vec!["b"]),
        ]);
        let dag = materialize(&t);
        let mut skipped = pending_descendants(&dag, "a");
        skipped.sort();
        assert_eq!(skipped, vec!["b", "c", "d"]);

        assert_eq!(pending_descendants(&dag, "d"), Vec::<String>::new());
    }

    #[test]
    fn pending_descendants_ignores_settled_nodes() {
        let t = template(vec![node("a", vec![]), node("b", vec!["a"])]);
        let mut dag = materialize(&t);
        dag.node_mut("b").unwrap().status = NodeStatus::Completed;
        assert!(pending_descendants(&dag, "a").is_empty());
    }

    #[test]
    fn complex_fork_join_layers() {
        //     a
        //    / \
        //   b   c
        //   |   |
        //   d   e
        //    \ /
        //     f
        let t = template(vec![
            node("a", vec![]),
            node("b", vec!["a"]),
            node("c", vec!["a"]),
            node("d", vec!["b"]),
            node("e", vec!["c"]),
            node("f", vec!["d", "e"]),
        ]);
        let layers = validate_graph(&t).unwrap();
        assert_eq!(layers.len(), 4);
        assert_eq!(layers[1].len(), 2);
        assert_eq!(layers[2].len(), 2);
        assert_eq!(layers[3], vec!["f"]);
    }
}
