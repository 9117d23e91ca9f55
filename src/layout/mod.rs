// This module implements the layered layout engine for the currently visible
// subgraph. Four passes, each a full traversal: forward rank propagation over a
// worklist (phi-family nodes follow only their control input, back-edge hosts
// only their first input, and a changed back-edge host requeues its non-first
// outputs at the front so propagation clears loop headers early); late-rank
// compaction by post-order DFS that pulls a node down to just above its
// earliest consumer; a post-order visit numbering used as a stable tie-break
// within a rank; and horizontal placement rank by rank from the bottom up
// through the slot occupation index, with input-edge landings occupied so the
// next rank up cannot overlap live edges. End nodes are forced below every
// rank, and finally each edge pointing upwards into a back-edge host receives
// an ascending back-edge number for routing offset. Layout never fails;
// malformed marking of cycles is the caller's risk.

//! Layered graph layout.

use std::collections::VecDeque;

use crate::graph::{EdgeIdx, Graph, NODE_INPUT_WIDTH};
use crate::resolver::NodeId;

pub mod occupation;

use occupation::OccupationGrid;

/// Minimum clearance between a node footprint and its neighbors.
pub const MINIMUM_EDGE_SEPARATION: f64 = 20.0;
/// Vertical gap between consecutive ranks.
pub const RANK_SEPARATION: f64 = 75.0;

/// Computes rank, order and coordinates for every visible node of `graph`
/// and classifies back edges. Geometry fields are overwritten wholesale.
pub fn layout_graph(graph: &mut Graph) {
    let start_nodes: Vec<NodeId> = graph
        .visible_node_ids()
        .filter(|&id| !has_visible_inputs(graph, id))
        .collect();
    let end_nodes: Vec<NodeId> = graph
        .visible_node_ids()
        .filter(|&id| !has_visible_outputs(graph, id))
        .collect();
    log::trace!(
        "layout: {} start nodes, {} end nodes",
        start_nodes.len(),
        end_nodes.len()
    );

    for id in graph.node_ids().collect::<Vec<_>>() {
        if let Some(node) = graph.node_mut(id) {
            node.rank = 0;
            node.visit_order_within_rank = 0;
            node.x = 0.0;
            node.y = 0.0;
        }
    }

    let max_rank = propagate_ranks(graph, &start_nodes);
    compact_late_ranks(graph, &start_nodes);
    assign_visit_order(graph, &start_nodes);

    // Nodes with no visible outputs sink below everything else.
    for &id in &end_nodes {
        if let Some(node) = graph.node_mut(id) {
            node.rank = max_rank + 1;
        }
    }
    graph.max_rank = max_rank + 1;

    place_nodes(graph);
    number_back_edges(graph);
}

fn has_visible_inputs(graph: &Graph, id: NodeId) -> bool {
    graph
        .node(id)
        .map(|n| n.inputs.iter().any(|&e| graph.edge_is_visible(e)))
        .unwrap_or(false)
}

fn has_visible_outputs(graph: &Graph, id: NodeId) -> bool {
    graph
        .node(id)
        .map(|n| n.outputs.iter().any(|&e| graph.edge_is_visible(e)))
        .unwrap_or(false)
}

fn is_phi_family(opcode: &str) -> bool {
    matches!(opcode, "Phi" | "EffectPhi" | "InductionVariablePhi")
}

/// Pass 1: forward rank propagation over a worklist.
fn propagate_ranks(graph: &mut Graph, start_nodes: &[NodeId]) -> u32 {
    let mut work: VecDeque<NodeId> = start_nodes.iter().copied().collect();
    let mut max_rank = 0;
    while let Some(id) = work.pop_back() {
        let Some(node) = graph.node(id) else { continue };
        if !node.visible {
            continue;
        }

        // Which inputs constrain this node's rank: phi-family nodes follow
        // only their last (control) input so they stay with their merge or
        // loop header; back-edge hosts follow only their first input.
        let input_count = node.inputs.len();
        let has_back = graph.has_back_edges(id);
        let (begin, end) = if is_phi_family(&node.label.opcode) {
            (input_count.saturating_sub(1), input_count)
        } else if has_back {
            (0, input_count.min(1))
        } else {
            (0, input_count)
        };

        let considered: Vec<EdgeIdx> = node.inputs[begin..end].to_vec();
        let outputs: Vec<NodeId> = node
            .outputs
            .iter()
            .map(|&e| graph.edges[e].target)
            .collect();

        let mut rank = node.rank;
        let mut changed = false;
        if rank == 0 {
            rank = 1;
            changed = true;
        }
        for edge_idx in considered {
            let source = graph.edges[edge_idx].source;
            if let Some(input) = graph.node(source) {
                if input.visible && input.rank >= rank {
                    rank = input.rank + 1;
                    changed = true;
                }
            }
        }
        if changed {
            if let Some(node) = graph.node_mut(id) {
                node.rank = rank;
            }
            for (position, &target) in outputs.iter().enumerate().rev() {
                if has_back && position != 0 {
                    // Requeue loop-body successors first so propagation
                    // clears the loop header before circling back.
                    work.push_front(target);
                } else {
                    work.push_back(target);
                }
            }
        }
        max_rank = max_rank.max(rank);
    }
    max_rank
}

/// Pass 2: post-order DFS pulling each node as late as its earliest consumer
/// allows, without violating predecessor ordering.
fn compact_late_ranks(graph: &mut Graph, start_nodes: &[NodeId]) {
    let mut visited = vec![false; graph.id_bound()];
    for &id in start_nodes {
        dfs_find_rank_late(graph, &mut visited, id);
    }
}

fn dfs_find_rank_late(graph: &mut Graph, visited: &mut [bool], id: NodeId) {
    if visited[id as usize] {
        return;
    }
    visited[id as usize] = true;
    let Some(node) = graph.node(id) else { return };
    let original_rank = node.rank;
    let outputs: Vec<NodeId> = node
        .outputs
        .iter()
        .filter(|&&e| graph.edge_is_visible(e))
        .map(|&e| graph.edges[e].target)
        .collect();

    let mut new_rank = original_rank;
    let mut first_output = true;
    for target in outputs {
        dfs_find_rank_late(graph, visited, target);
        let Some(output) = graph.node(target) else {
            continue;
        };
        let output_rank = output.rank;
        if output.visible
            && output_rank > original_rank
            && (first_output || output_rank < new_rank)
        {
            new_rank = output_rank - 1;
        }
        first_output = false;
    }

    // Start and phi-family ranks are pinned by pass 1.
    let opcode = match graph.node(id) {
        Some(node) => node.label.opcode.clone(),
        None => return,
    };
    if opcode != "Start" && !is_phi_family(&opcode) {
        if let Some(node) = graph.node_mut(id) {
            node.rank = new_rank;
        }
    }
}

/// Pass 3: stable visit order within each rank, assigned when a post-order
/// DFS over visible edges finishes with a node.
fn assign_visit_order(graph: &mut Graph, start_nodes: &[NodeId]) {
    let mut visited = vec![false; graph.id_bound()];
    let mut counter = 0;
    for &id in start_nodes {
        dfs_visit_order(graph, &mut visited, id, &mut counter);
    }
}

fn dfs_visit_order(graph: &mut Graph, visited: &mut [bool], id: NodeId, counter: &mut u32) {
    if visited[id as usize] {
        return;
    }
    visited[id as usize] = true;
    let Some(node) = graph.node(id) else { return };
    let outputs: Vec<NodeId> = node
        .outputs
        .iter()
        .filter(|&&e| graph.edge_is_visible(e))
        .map(|&e| graph.edges[e].target)
        .collect();
    for target in outputs {
        dfs_visit_order(graph, visited, target, counter);
    }
    if let Some(node) = graph.node_mut(id) {
        if node.visit_order_within_rank == 0 {
            *counter += 1;
            node.visit_order_within_rank = *counter;
        }
    }
}

/// Pass 4: horizontal placement rank by rank through the occupation grid,
/// processed from the highest rank to the lowest.
fn place_nodes(graph: &mut Graph) {
    let mut rank_sets: Vec<Vec<NodeId>> = vec![Vec::new(); graph.max_rank as usize + 1];
    for id in graph.visible_node_ids().collect::<Vec<_>>() {
        let rank = graph.node(id).map(|n| n.rank).unwrap_or(0);
        if rank > 0 {
            rank_sets[rank as usize].push(id);
        }
    }
    for rank_set in &mut rank_sets {
        rank_set.sort_by_key(|&id| {
            graph
                .node(id)
                .map(|n| n.visit_order_within_rank)
                .unwrap_or(0)
        });
    }

    // Vertical coordinates accumulate top-down.
    let mut y = 0.0;
    for rank_set in rank_sets.iter().skip(1) {
        let mut row_height: f64 = 0.0;
        for &id in rank_set {
            if let Some(node) = graph.node(id) {
                row_height = row_height.max(node.height);
            }
        }
        for &id in rank_set {
            if let Some(node) = graph.node_mut(id) {
                node.y = y;
            }
        }
        y += row_height + RANK_SEPARATION;
    }

    let mut grid = OccupationGrid::new();
    for rank_set in rank_sets.iter().rev() {
        if rank_set.is_empty() {
            continue;
        }
        // The landing marks left by lower ranks for edges out of this rank
        // served their purpose once we get here.
        for &id in rank_set {
            grid.clear_node_outputs(id);
        }
        for &id in rank_set {
            let Some(node) = graph.node(id) else { continue };
            let width = node.width;
            let (direction, hint) = placement_hint(graph, id);
            let padded = width + 2.0 * MINIMUM_EDGE_SEPARATION;
            let target_x = hint - padded + NODE_INPUT_WIDTH / 2.0;
            let x = grid.find_space(target_x, padded, direction) + MINIMUM_EDGE_SEPARATION;
            grid.occupy_node(id, x - MINIMUM_EDGE_SEPARATION, padded);
            if let Some(node) = graph.node_mut(id) {
                node.x = x;
            }
        }
        // Keep the rank above clear of the edges that land here.
        for &id in rank_set {
            grid.occupy_node_inputs(graph, id);
        }
    }
}

/// Placement hint for `id`: the averaged landing x of its visible output
/// edges in already-placed higher ranks, and a growth bias derived from
/// where those edges enter their targets' input rows.
fn placement_hint(graph: &Graph, id: NodeId) -> (i32, f64) {
    let Some(node) = graph.node(id) else {
        return (0, 0.0);
    };
    let mut position = 0.0;
    let mut direction = -1;
    let mut output_edges = 0;
    for &edge_idx in &node.outputs {
        if !graph.edge_is_visible(edge_idx) {
            continue;
        }
        let edge = &graph.edges[edge_idx];
        let Some(target) = graph.node(edge.target) else {
            continue;
        };
        if target.rank <= node.rank {
            continue;
        }
        position += target.x + target.input_x(edge.index) + NODE_INPUT_WIDTH / 2.0;
        output_edges += 1;
        if edge.index as usize >= target.inputs.len() / 2 {
            direction = 1;
        }
    }
    if output_edges != 0 {
        position /= output_edges as f64;
    }
    if output_edges > 1 || direction == -1 {
        direction = 0;
    }
    (direction, position)
}

/// Classifies and numbers back edges so their rendered routing paths fan out
/// instead of overlapping.
fn number_back_edges(graph: &mut Graph) {
    graph.max_back_edge_number = 0;
    for edge_idx in 0..graph.edges.len() {
        let number = if graph.edge_is_visible(edge_idx) && graph.edge_is_back_edge(edge_idx) {
            graph.max_back_edge_number += 1;
            graph.max_back_edge_number
        } else {
            0
        };
        graph.edges[edge_idx].back_edge_number = number;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;
    use crate::resolver::SourceResolver;
    use serde_json::json;

    fn build_and_layout(nodes: serde_json::Value, edges: serde_json::Value) -> Graph {
        let mut resolver = SourceResolver::new();
        let phase = json!({
            "name": "test",
            "type": "graph",
            "data": {"nodes": nodes, "edges": edges}
        });
        resolver.parse_phases(&[phase]).unwrap();
        let (_, phase) = resolver.graph_phases().next().unwrap();
        let mut graph = Graph::from_phase(phase);
        layout_graph(&mut graph);
        graph
    }

    fn diamond() -> Graph {
        build_and_layout(
            json!([
                {"id": 0, "opcode": "Start", "control": true},
                {"id": 1, "opcode": "Int32Add"},
                {"id": 2, "opcode": "Int32Sub"},
                {"id": 3, "opcode": "Return", "control": true}
            ]),
            json!([
                {"source": 0, "target": 1, "index": 0, "type": "value"},
                {"source": 0, "target": 2, "index": 0, "type": "value"},
                {"source": 1, "target": 3, "index": 0, "type": "value"},
                {"source": 2, "target": 3, "index": 1, "type": "value"}
            ]),
        )
    }

    #[test]
    fn test_diamond_ranks() {
        let graph = diamond();
        assert_eq!(graph.node(0).unwrap().rank, 1);
        assert_eq!(graph.node(1).unwrap().rank, 2);
        assert_eq!(graph.node(2).unwrap().rank, 2);
        // The end node sinks one rank below the deepest interior rank.
        assert_eq!(graph.node(3).unwrap().rank, 4);
        assert_eq!(graph.max_rank, 4);
    }

    #[test]
    fn test_rank_monotonic_along_forward_edges() {
        let graph = diamond();
        for edge_idx in 0..graph.edges.len() {
            let edge = &graph.edges[edge_idx];
            if !graph.edge_is_back_edge(edge_idx) {
                assert!(
                    graph.node(edge.source).unwrap().rank
                        < graph.node(edge.target).unwrap().rank,
                    "edge {} -> {} violates rank order",
                    edge.source,
                    edge.target
                );
            }
        }
    }

    #[test]
    fn test_same_rank_nodes_do_not_overlap() {
        let graph = diamond();
        let n1 = graph.node(1).unwrap();
        let n2 = graph.node(2).unwrap();
        assert_eq!(n1.y, n2.y);
        let disjoint = n1.x + n1.width <= n2.x || n2.x + n2.width <= n1.x;
        assert!(disjoint, "rank-mates overlap: {} and {}", n1.x, n2.x);
    }

    #[test]
    fn test_loop_back_edge_numbering() {
        let graph = build_and_layout(
            json!([
                {"id": 0, "opcode": "Start", "control": true},
                {"id": 1, "opcode": "Loop", "control": true},
                {"id": 2, "opcode": "Branch", "control": true},
                {"id": 3, "opcode": "Return", "control": true}
            ]),
            json!([
                {"source": 0, "target": 1, "index": 0, "type": "control"},
                {"source": 1, "target": 2, "index": 0, "type": "control"},
                {"source": 2, "target": 1, "index": 1, "type": "control"},
                {"source": 2, "target": 3, "index": 0, "type": "control"}
            ]),
        );
        // Ranks stay finite and the loop-carried edge is classified back.
        assert!(graph.node(1).unwrap().rank < graph.node(2).unwrap().rank);
        let back: Vec<_> = graph
            .edges
            .iter()
            .filter(|e| e.back_edge_number != 0)
            .collect();
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].source, 2);
        assert_eq!(back[0].target, 1);
        assert_eq!(graph.max_back_edge_number, 1);
    }

    #[test]
    fn test_phi_stays_with_loop_header() {
        let graph = build_and_layout(
            json!([
                {"id": 0, "opcode": "Start", "control": true},
                {"id": 1, "opcode": "Loop", "control": true},
                {"id": 2, "opcode": "Phi"},
                {"id": 3, "opcode": "Int32Add"},
                {"id": 4, "opcode": "Return", "control": true}
            ]),
            json!([
                {"source": 0, "target": 1, "index": 0, "type": "control"},
                {"source": 0, "target": 2, "index": 0, "type": "value"},
                {"source": 3, "target": 2, "index": 1, "type": "value"},
                {"source": 1, "target": 2, "index": 2, "type": "control"},
                {"source": 2, "target": 3, "index": 0, "type": "value"},
                {"source": 3, "target": 4, "index": 0, "type": "value"}
            ]),
        );
        let loop_rank = graph.node(1).unwrap().rank;
        let phi_rank = graph.node(2).unwrap().rank;
        // The phi follows only its control input, directly below the header.
        assert_eq!(phi_rank, loop_rank + 1);
        // The loop-carried value edge 3 -> 2 points upwards and is a back
        // edge; layout still terminated with consistent ranks.
        assert!(graph.node(3).unwrap().rank > phi_rank);
        let back_edge_count = graph
            .edges
            .iter()
            .filter(|e| e.back_edge_number != 0)
            .count();
        assert_eq!(back_edge_count, 1);
    }

    #[test]
    fn test_invisible_nodes_are_ignored() {
        let mut resolver = SourceResolver::new();
        let phase = json!({
            "name": "test",
            "type": "graph",
            "data": {
                "nodes": [
                    {"id": 0, "opcode": "Start", "control": true},
                    {"id": 1, "opcode": "Int32Add"},
                    {"id": 2, "opcode": "Return", "control": true}
                ],
                "edges": [
                    {"source": 0, "target": 1, "index": 0, "type": "value"},
                    {"source": 1, "target": 2, "index": 0, "type": "value"},
                    {"source": 0, "target": 2, "index": 1, "type": "control"}
                ]
            }
        });
        resolver.parse_phases(&[phase]).unwrap();
        let (_, phase) = resolver.graph_phases().next().unwrap();
        let mut graph = Graph::from_phase(phase);
        graph.node_mut(1).unwrap().visible = false;
        layout_graph(&mut graph);
        // The hidden node keeps the unranked sentinel; the rest lay out
        // through the remaining visible edge.
        assert_eq!(graph.node(1).unwrap().rank, 0);
        assert!(graph.node(2).unwrap().rank > graph.node(0).unwrap().rank);
    }
}
