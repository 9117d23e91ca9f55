// This module defines the phase data model: the tagged Phase variant (graph,
// schedule, sequence, instructions, disassembly) that the resolver produces in
// strict dump order, the serde-facing payload structs for graph and sequence
// phases, and the NodeLabel snapshots the resolver interns across graph phases.
// Later graph phases reuse node ids from earlier ones but may replace a node's
// label in place; interning keeps one immutable NodeLabel per (id, content) and
// marks a superseded label with the phase index at which its replacement first
// appeared, so a view can distinguish "same node, unchanged" from "same node,
// label updated in this phase". Each graph phase retains a snapshot of the
// interning table so it can always be displayed with its historically-correct
// labels.

//! Phase payloads and node label interning.

use std::cell::Cell;
use std::rc::Rc;

use hashbrown::HashMap;
use serde::Deserialize;
use serde_json::Value;

use crate::position::SourcePosition;
use crate::resolver::schedule::SchedulePhase;
use crate::resolver::NodeId;

/// One captured stage of the compilation pipeline, in dump order.
#[derive(Debug, Clone)]
pub enum Phase {
    Graph(GraphPhase),
    Schedule(SchedulePhase),
    Sequence(SequencePhase),
    /// Instruction tables are merged into the resolver's indices; the phase
    /// itself stays in the list as a marker so phase ordering is preserved.
    Instructions(InstructionsPhase),
    Disassembly(DisassemblyPhase),
}

impl Phase {
    pub fn name(&self) -> &str {
        match self {
            Phase::Graph(p) => &p.name,
            Phase::Schedule(p) => &p.name,
            Phase::Sequence(p) => &p.name,
            Phase::Instructions(p) => &p.name,
            Phase::Disassembly(p) => &p.name,
        }
    }
}

/// Immutable snapshot of a node's displayable attributes.
///
/// Structural equality (everything except the in-place update note) decides
/// whether a new occurrence of a node id is a genuine change.
#[derive(Debug)]
pub struct NodeLabel {
    pub id: NodeId,
    pub label: String,
    pub title: String,
    pub live: bool,
    pub properties: String,
    pub source_position: Option<SourcePosition>,
    pub origin: Option<NodeOrigin>,
    pub opcode: String,
    pub control: bool,
    pub opinfo: String,
    pub node_type: String,
    /// Index of the phase that replaced this label in place, if any.
    inplace_update_phase: Cell<Option<usize>>,
}

impl NodeLabel {
    /// Builds a label from a raw dump node, with the node's source position
    /// already resolved from its modern or legacy form.
    pub fn from_spec(spec: &GraphNodeSpec, source_position: Option<SourcePosition>) -> NodeLabel {
        NodeLabel {
            id: spec.id,
            label: spec.label.clone(),
            title: spec.title.clone(),
            live: spec.live,
            properties: spec.properties.clone(),
            source_position,
            origin: spec.origin.clone(),
            opcode: spec.opcode.clone(),
            control: spec.control,
            opinfo: spec.opinfo.clone(),
            node_type: spec.node_type.clone(),
            inplace_update_phase: Cell::new(None),
        }
    }

    /// Structural equality, excluding the update-phase note.
    pub fn equals(&self, other: &NodeLabel) -> bool {
        self.id == other.id
            && self.label == other.label
            && self.title == other.title
            && self.live == other.live
            && self.properties == other.properties
            && self.source_position == other.source_position
            && self.origin == other.origin
            && self.opcode == other.opcode
            && self.control == other.control
            && self.opinfo == other.opinfo
            && self.node_type == other.node_type
    }

    pub fn set_inplace_update_phase(&self, phase_index: usize) {
        self.inplace_update_phase.set(Some(phase_index));
    }

    pub fn inplace_update_phase(&self) -> Option<usize> {
        self.inplace_update_phase.get()
    }

    /// Text a view would render for this node.
    pub fn display_label(&self) -> &str {
        if self.label.is_empty() {
            &self.title
        } else {
            &self.label
        }
    }
}

/// Provenance of a node: the node or bytecode position it was reduced from.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeOrigin {
    #[serde(default)]
    pub node_id: Option<NodeId>,
    #[serde(default)]
    pub bytecode_position: Option<i32>,
    #[serde(default)]
    pub phase: Option<String>,
    #[serde(default)]
    pub reducer: Option<String>,
}

/// Raw graph node as it appears in the dump.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNodeSpec {
    pub id: NodeId,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub live: bool,
    #[serde(default)]
    pub properties: String,
    /// Modern object form or legacy bare offset; resolved leniently.
    #[serde(default)]
    pub source_position: Option<Value>,
    /// Legacy flat script offset.
    #[serde(default)]
    pub pos: Option<i32>,
    #[serde(default)]
    pub origin: Option<NodeOrigin>,
    #[serde(default)]
    pub opcode: String,
    #[serde(default)]
    pub control: bool,
    #[serde(default)]
    pub opinfo: String,
    #[serde(rename = "type", default)]
    pub node_type: String,
}

/// Raw graph edge as it appears in the dump.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphEdgeSpec {
    pub source: NodeId,
    pub target: NodeId,
    /// Input slot at the target.
    #[serde(default)]
    pub index: u32,
    #[serde(rename = "type", default)]
    pub edge_type: String,
}

/// One node/edge graph snapshot with its interned labels.
#[derive(Debug, Clone)]
pub struct GraphPhase {
    pub name: String,
    /// Largest node id occurring in this or any earlier graph phase.
    pub highest_node_id: NodeId,
    /// Interned label per node occurring in this phase, in dump order.
    pub nodes: Vec<Rc<NodeLabel>>,
    pub edges: Vec<GraphEdgeSpec>,
    /// Snapshot of the interning table as of this phase.
    pub labels: HashMap<NodeId, Rc<NodeLabel>>,
}

/// Structured instruction blocks after register allocation.
#[derive(Debug, Clone)]
pub struct SequencePhase {
    pub name: String,
    pub blocks: Vec<SequenceBlock>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceBlock {
    pub id: i32,
    #[serde(default)]
    pub deferred: bool,
    #[serde(default)]
    pub loop_header: Option<i32>,
    #[serde(default)]
    pub predecessors: Vec<i32>,
    #[serde(default)]
    pub successors: Vec<i32>,
    #[serde(default)]
    pub phis: Vec<Value>,
    #[serde(default)]
    pub instructions: Vec<SequenceInstruction>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceInstruction {
    pub id: u32,
    #[serde(default)]
    pub opcode: String,
    #[serde(default)]
    pub flags: Option<String>,
    #[serde(default)]
    pub inputs: Vec<Value>,
    #[serde(default)]
    pub outputs: Vec<Value>,
    #[serde(default)]
    pub temps: Vec<Value>,
}

/// Marker for an id-range table phase after its tables were merged.
#[derive(Debug, Clone)]
pub struct InstructionsPhase {
    pub name: String,
}

/// Raw machine disassembly text.
#[derive(Debug, Clone)]
pub struct DisassemblyPhase {
    pub name: String,
    pub data: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label(id: NodeId, opcode: &str) -> NodeLabel {
        NodeLabel {
            id,
            label: format!("{id}: {opcode}"),
            title: String::new(),
            live: true,
            properties: String::new(),
            source_position: None,
            origin: None,
            opcode: opcode.to_string(),
            control: false,
            opinfo: String::new(),
            node_type: String::new(),
            inplace_update_phase: Cell::new(None),
        }
    }

    #[test]
    fn test_label_equality_ignores_update_note() {
        let a = label(1, "Int32Add");
        let b = label(1, "Int32Add");
        b.set_inplace_update_phase(7);
        assert!(a.equals(&b));
        assert_eq!(b.inplace_update_phase(), Some(7));
    }

    #[test]
    fn test_label_inequality_on_opcode_change() {
        let a = label(1, "Int32Add");
        let b = label(1, "Int64Add");
        assert!(!a.equals(&b));
    }
}
