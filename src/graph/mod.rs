// This module implements the layout-facing graph data model. A Graph is rebuilt
// from scratch each time a graph-type phase is selected for display: one GNode
// per dump node (held in an array indexed by id, sparse), one Edge per dump
// edge, linked into both endpoints' input/output lists with inputs ordered by
// their slot index. An edge of type "control" marks its source node as a
// control-flow node. Node classification is computed once at construction into
// a closed NodeKind variant with fixed precedence (control, input, JavaScript,
// simplified, machine) instead of re-probing opcode strings on every query.
// Visibility flags are the only fields mutated after construction; geometry is
// recomputed wholesale by each layout pass.

//! Graph model for one displayed phase.

use std::rc::Rc;

use crate::resolver::phases::{GraphPhase, NodeLabel};
use crate::resolver::NodeId;

/// Width of one node input connector; also the layout engine's slot width.
pub const NODE_INPUT_WIDTH: f64 = 50.0;
/// Approximate rendered width of one label character.
pub const CHAR_WIDTH: f64 = 9.0;
/// Default rendered node height.
pub const DEFAULT_NODE_HEIGHT: f64 = 28.0;

/// Edge type as tagged in the dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    Control,
    Value,
    Effect,
    Context,
    FrameState,
    Other,
}

impl EdgeKind {
    pub fn from_dump(tag: &str) -> EdgeKind {
        match tag {
            "control" => EdgeKind::Control,
            "value" => EdgeKind::Value,
            "effect" => EdgeKind::Effect,
            "context" => EdgeKind::Context,
            "frame-state" => EdgeKind::FrameState,
            _ => EdgeKind::Other,
        }
    }
}

/// Closed node classification, computed once at construction.
///
/// Precedence: control flag, then input opcodes (`Parameter`, `*Constant`),
/// then `JS*`, then the simplified opcode families, else machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Control,
    Input,
    JavaScript,
    Simplified,
    Machine,
}

impl NodeKind {
    pub fn classify(label: &NodeLabel) -> NodeKind {
        if label.control {
            return NodeKind::Control;
        }
        let opcode = label.opcode.as_str();
        if opcode == "Parameter" || opcode.ends_with("Constant") {
            return NodeKind::Input;
        }
        if opcode.starts_with("JS") {
            return NodeKind::JavaScript;
        }
        if is_simplified_opcode(opcode) {
            return NodeKind::Simplified;
        }
        NodeKind::Machine
    }
}

fn is_simplified_opcode(opcode: &str) -> bool {
    const PREFIXES: [&str; 8] = [
        "Phi", "Boolean", "Number", "String", "Change", "Object", "Reference", "Any",
    ];
    opcode.ends_with("ToNumber")
        || opcode == "AnyToBoolean"
        || (opcode.starts_with("Load") && opcode.len() > 4)
        || (opcode.starts_with("Store") && opcode.len() > 5)
        || PREFIXES.iter().any(|prefix| opcode.starts_with(prefix))
}

pub type EdgeIdx = usize;

#[derive(Debug, Clone)]
pub struct Edge {
    pub source: NodeId,
    pub target: NodeId,
    /// Input slot at the target.
    pub index: u32,
    pub kind: EdgeKind,
    pub visible: bool,
    /// Non-zero only for classified back edges, assigned by layout.
    pub back_edge_number: u32,
}

#[derive(Debug, Clone)]
pub struct GNode {
    pub id: NodeId,
    pub label: Rc<NodeLabel>,
    pub kind: NodeKind,
    /// Layout rank; 0 is the "unranked" sentinel, valid ranks start at 1.
    pub rank: u32,
    pub visit_order_within_rank: u32,
    pub visible: bool,
    /// True when some control edge originates here.
    pub cfg: bool,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub inputs: Vec<EdgeIdx>,
    pub outputs: Vec<EdgeIdx>,
}

impl GNode {
    /// X of input connector `index`, relative to the node's left edge.
    pub fn input_x(&self, index: u32) -> f64 {
        index as f64 * NODE_INPUT_WIDTH
    }
}

/// All nodes and edges of one displayed phase. Owns no resolver state.
#[derive(Debug, Default)]
pub struct Graph {
    /// Indexed by node id; ids a phase never used stay `None`.
    nodes: Vec<Option<GNode>>,
    pub edges: Vec<Edge>,
    pub max_rank: u32,
    pub max_back_edge_number: u32,
}

impl Graph {
    /// Builds the model for one graph phase. Every node starts visible and
    /// unranked; geometry is zeroed until a layout pass runs.
    pub fn from_phase(phase: &GraphPhase) -> Graph {
        let capacity = phase
            .nodes
            .iter()
            .map(|label| label.id as usize + 1)
            .max()
            .unwrap_or(0);
        let mut nodes: Vec<Option<GNode>> = Vec::new();
        nodes.resize_with(capacity, || None);

        for label in &phase.nodes {
            let width = estimate_node_width(label);
            nodes[label.id as usize] = Some(GNode {
                id: label.id,
                kind: NodeKind::classify(label),
                label: label.clone(),
                rank: 0,
                visit_order_within_rank: 0,
                visible: true,
                cfg: false,
                x: 0.0,
                y: 0.0,
                width,
                height: DEFAULT_NODE_HEIGHT,
                inputs: Vec::new(),
                outputs: Vec::new(),
            });
        }

        let mut graph = Graph {
            nodes,
            edges: Vec::with_capacity(phase.edges.len()),
            max_rank: 0,
            max_back_edge_number: 0,
        };

        for spec in &phase.edges {
            let kind = EdgeKind::from_dump(&spec.edge_type);
            let edge_idx = graph.edges.len();
            let in_range = (spec.source as usize) < graph.nodes.len()
                && (spec.target as usize) < graph.nodes.len();
            if !in_range
                || graph.node(spec.source).is_none()
                || graph.node(spec.target).is_none()
            {
                log::warn!(
                    "dropping edge {} -> {} referencing unknown node",
                    spec.source,
                    spec.target
                );
                continue;
            }
            graph.edges.push(Edge {
                source: spec.source,
                target: spec.target,
                index: spec.index,
                kind,
                visible: true,
                back_edge_number: 0,
            });
            if let Some(node) = graph.node_mut(spec.source) {
                node.outputs.push(edge_idx);
                if kind == EdgeKind::Control {
                    node.cfg = true;
                }
            }
            if let Some(node) = graph.node_mut(spec.target) {
                node.inputs.push(edge_idx);
            }
        }

        // Input lists must follow slot order; the phi/back-edge rules in
        // layout depend on the last and first inputs being the right ones.
        let edge_indices: Vec<u32> = graph.edges.iter().map(|e| e.index).collect();
        for node in graph.nodes.iter_mut().flatten() {
            node.inputs
                .sort_by_key(|&edge_idx| edge_indices[edge_idx]);
        }
        graph
    }

    pub fn node(&self, id: NodeId) -> Option<&GNode> {
        self.nodes.get(id as usize).and_then(Option::as_ref)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut GNode> {
        self.nodes.get_mut(id as usize).and_then(Option::as_mut)
    }

    /// Upper bound (exclusive) of node ids; for visited arrays.
    pub fn id_bound(&self) -> usize {
        self.nodes.len()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.iter().flatten().map(|n| n.id)
    }

    pub fn visible_node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes
            .iter()
            .flatten()
            .filter(|n| n.visible)
            .map(|n| n.id)
    }

    /// An edge renders only when it and both endpoints are visible.
    pub fn edge_is_visible(&self, edge_idx: EdgeIdx) -> bool {
        let edge = &self.edges[edge_idx];
        edge.visible
            && self.node(edge.source).is_some_and(|n| n.visible)
            && self.node(edge.target).is_some_and(|n| n.visible)
    }

    /// Whether edges may legally point backwards into `id` after layout:
    /// true for `Loop` nodes and for phi-family nodes whose last (control)
    /// input comes from a `Loop` node.
    pub fn has_back_edges(&self, id: NodeId) -> bool {
        let Some(node) = self.node(id) else {
            return false;
        };
        let opcode = node.label.opcode.as_str();
        if opcode == "Loop" {
            return true;
        }
        if matches!(opcode, "Phi" | "EffectPhi" | "InductionVariablePhi") {
            if let Some(&last) = node.inputs.last() {
                let source = self.edges[last].source;
                return self
                    .node(source)
                    .is_some_and(|n| n.label.opcode == "Loop");
            }
        }
        false
    }

    /// `source.rank >= target.rank` into a node that hosts back edges.
    pub fn edge_is_back_edge(&self, edge_idx: EdgeIdx) -> bool {
        let edge = &self.edges[edge_idx];
        let (Some(source), Some(target)) = (self.node(edge.source), self.node(edge.target))
        else {
            return false;
        };
        self.has_back_edges(edge.target) && target.rank < source.rank
    }
}

fn estimate_node_width(label: &NodeLabel) -> f64 {
    let text_width = label.display_label().chars().count() as f64 * CHAR_WIDTH;
    text_width.max(NODE_INPUT_WIDTH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::SourceResolver;
    use serde_json::json;

    pub(crate) fn build_graph(nodes: serde_json::Value, edges: serde_json::Value) -> Graph {
        let mut resolver = SourceResolver::new();
        let phase = json!({
            "name": "test",
            "type": "graph",
            "data": {"nodes": nodes, "edges": edges}
        });
        resolver.parse_phases(&[phase]).unwrap();
        let (_, phase) = resolver.graph_phases().next().unwrap();
        Graph::from_phase(phase)
    }

    #[test]
    fn test_classification_precedence() {
        let classify = |opcode: &str, control: bool| {
            let graph = build_graph(
                json!([{"id": 0, "opcode": opcode, "control": control}]),
                json!([]),
            );
            graph.node(0).unwrap().kind
        };
        assert_eq!(classify("Merge", true), NodeKind::Control);
        assert_eq!(classify("Parameter", false), NodeKind::Input);
        assert_eq!(classify("HeapConstant", false), NodeKind::Input);
        assert_eq!(classify("JSAdd", false), NodeKind::JavaScript);
        assert_eq!(classify("NumberAdd", false), NodeKind::Simplified);
        assert_eq!(classify("ChangeTaggedToInt32", false), NodeKind::Simplified);
        assert_eq!(classify("PlainPrimitiveToNumber", false), NodeKind::Simplified);
        assert_eq!(classify("LoadField", false), NodeKind::Simplified);
        // Bare "Load"/"Store" are machine ops, not simplified field accesses.
        assert_eq!(classify("Load", false), NodeKind::Machine);
        assert_eq!(classify("Store", false), NodeKind::Machine);
        assert_eq!(classify("Int32Add", false), NodeKind::Machine);
        // Control wins over everything.
        assert_eq!(classify("JSAdd", true), NodeKind::Control);
    }

    #[test]
    fn test_cfg_marking_and_linking() {
        let graph = build_graph(
            json!([
                {"id": 0, "opcode": "Start", "control": true},
                {"id": 1, "opcode": "Int32Add"},
                {"id": 2, "opcode": "Return", "control": true}
            ]),
            json!([
                {"source": 0, "target": 1, "index": 0, "type": "value"},
                {"source": 0, "target": 2, "index": 1, "type": "control"},
                {"source": 1, "target": 2, "index": 0, "type": "value"}
            ]),
        );
        assert!(graph.node(0).unwrap().cfg);
        assert!(!graph.node(1).unwrap().cfg);
        assert_eq!(graph.node(0).unwrap().outputs.len(), 2);
        // Inputs are ordered by slot index regardless of dump order.
        let inputs = &graph.node(2).unwrap().inputs;
        assert_eq!(graph.edges[inputs[0]].source, 1);
        assert_eq!(graph.edges[inputs[1]].source, 0);
    }

    #[test]
    fn test_has_back_edges() {
        let graph = build_graph(
            json!([
                {"id": 0, "opcode": "Loop", "control": true},
                {"id": 1, "opcode": "Phi"},
                {"id": 2, "opcode": "Int32Add"},
                {"id": 3, "opcode": "Phi"}
            ]),
            json!([
                {"source": 2, "target": 1, "index": 0, "type": "value"},
                {"source": 0, "target": 1, "index": 1, "type": "control"},
                {"source": 2, "target": 3, "index": 0, "type": "value"},
                {"source": 2, "target": 3, "index": 1, "type": "control"}
            ]),
        );
        assert!(graph.has_back_edges(0));
        // Phi 1's last input comes from the loop header.
        assert!(graph.has_back_edges(1));
        // Phi 3's does not.
        assert!(!graph.has_back_edges(3));
        assert!(!graph.has_back_edges(2));
    }
}
