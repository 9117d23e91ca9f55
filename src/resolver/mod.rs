// This module implements the cross-representation resolver: the per-compilation-unit
// tables that translate between the five identifier spaces a compiler dump uses
// (graph-node id, source position, bytecode position, instruction id, machine PC
// offset). The resolver registers sources and inlinings, normalizes the node
// position map (legacy flat offsets or modern position objects), maintains the
// bidirectional node-id/position index, walks inlining stacks, consumes the phase
// list in order (interning node labels across graph phases and merging instruction
// and PC-offset tables), and answers the address-to-node queries the disassembly
// view needs. Tables are built once per loaded unit and are read-only afterwards;
// incremental phase parsing only appends. Recoverable data gaps (an undefined node
// position, an unmatched lookup key) are logged and treated as "no data"; the one
// fatal condition is an unknown phase type, which aborts the load.

//! Cross-representation resolver.
//!
//! Owns the identifier-space tables for one compilation unit and parses the
//! phase list into normalized in-memory structures. See [`phases`] for the
//! phase payloads and [`schedule`] for the schedule text grammar.

use std::rc::Rc;

use hashbrown::{HashMap, HashSet};
use serde_json::Value;

use crate::core::{ScopeError, ScopeResult};
use crate::position::{Inlining, Source, SourcePosition, NOT_INLINED};

pub mod phases;
pub mod schedule;

use phases::{
    DisassemblyPhase, GraphEdgeSpec, GraphNodeSpec, GraphPhase, InstructionsPhase, NodeLabel,
    Phase, SequenceBlock, SequencePhase,
};
use schedule::SchedulePhase;

/// Graph node identifier, unique within a phase.
pub type NodeId = u32;

/// Half-open instruction id range `[start, end)`; `[start, start)` covers
/// exactly `start`.
pub type InstructionRange = (u32, u32);

#[derive(Debug, Default)]
pub struct SourceResolver {
    sources: HashMap<i32, Source>,
    inlinings: HashMap<i32, Inlining>,
    inlining_by_position: HashMap<SourcePosition, i32>,

    node_to_position: HashMap<NodeId, SourcePosition>,
    position_to_nodes: HashMap<SourcePosition, Vec<NodeId>>,
    line_to_positions: HashMap<usize, Vec<SourcePosition>>,

    node_to_instruction_range: HashMap<NodeId, InstructionRange>,
    block_to_instruction_range: HashMap<i32, InstructionRange>,
    instruction_to_pc: HashMap<u32, u32>,
    /// Distinct PC offsets, pre-sorted descending at table-build time.
    pc_offsets: Vec<u32>,

    /// Running label interning table across graph phases.
    labels: HashMap<NodeId, Rc<NodeLabel>>,
    highest_node_id: NodeId,

    pub phases: Vec<Phase>,
}

impl SourceResolver {
    pub fn new() -> Self {
        SourceResolver::default()
    }

    /// Registers all known source functions. If no source with id -1 exists
    /// afterwards, installs `fallback` as the main source. Absent input is a
    /// no-op.
    pub fn set_sources(&mut self, sources: Vec<Source>, fallback: Option<Source>) {
        for source in sources {
            self.sources.insert(source.source_id, source);
        }
        if !self.sources.contains_key(&-1) {
            if let Some(mut fallback) = fallback {
                fallback.source_id = -1;
                self.sources.insert(-1, fallback);
            }
        }
    }

    /// Registers the inlining table. The sentinel "not inlined" entry is
    /// always installed at id -1, overwriting any existing entry there.
    pub fn set_inlinings(&mut self, inlinings: Vec<(i32, Inlining)>) {
        for (id, inlining) in inlinings {
            if id != NOT_INLINED {
                self.inlining_by_position
                    .insert(inlining.inlining_position, id);
            }
            self.inlinings.insert(id, inlining);
        }
        self.inlinings.insert(NOT_INLINED, Inlining::not_inlined());
    }

    pub fn source(&self, source_id: i32) -> Option<&Source> {
        self.sources.get(&source_id)
    }

    pub fn main_source(&self) -> Option<&Source> {
        self.sources.get(&-1)
    }

    pub fn inlining(&self, inlining_id: i32) -> Option<&Inlining> {
        self.inlinings.get(&inlining_id)
    }

    /// Ingests the node position map in either its legacy flat
    /// `{nodeId: scriptOffset}` form or the modern `{nodeId: position}` form.
    ///
    /// Every resolved position is appended to its owning source's position
    /// list and linked bidirectionally to the node id. An undefined position
    /// is logged and skipped, never an error. Afterwards every source's
    /// position list is re-sorted and de-duplicated.
    pub fn set_node_position_map(&mut self, map: &serde_json::Map<String, Value>) {
        for (key, raw) in map {
            let node_id: NodeId = match key.parse() {
                Ok(id) => id,
                Err(_) => {
                    log::warn!("ignoring non-numeric node id {key:?} in node position map");
                    continue;
                }
            };
            let Some(position) = SourcePosition::from_json(raw) else {
                log::warn!("undefined position for node {node_id}");
                continue;
            };
            self.add_position_to_owning_source(position);
            self.link_node_and_position(node_id, position);
        }
        for source in self.sources.values_mut() {
            source.sort_and_dedup_positions();
        }
    }

    /// Registers the per-source-line bytecode position array.
    pub fn set_source_line_to_bytecode_position(&mut self, lines: &[i32]) {
        for (line, &position) in lines.iter().enumerate() {
            self.line_to_positions
                .entry(line)
                .or_default()
                .push(SourcePosition::bytecode(position));
        }
    }

    /// Positions registered for a source line, if any.
    pub fn line_to_source_positions(&self, line: usize) -> &[SourcePosition] {
        self.line_to_positions
            .get(&line)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Node ids linked to any of `positions`; unmatched positions are skipped.
    pub fn source_positions_to_node_ids(&self, positions: &[SourcePosition]) -> Vec<NodeId> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for position in positions {
            if let Some(nodes) = self.position_to_nodes.get(position) {
                for &node in nodes {
                    if seen.insert(node) {
                        out.push(node);
                    }
                }
            }
        }
        out
    }

    /// Positions linked to any of `node_ids`; nodes without a recorded
    /// position are omitted.
    pub fn node_ids_to_source_positions(&self, node_ids: &[NodeId]) -> Vec<SourcePosition> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for node_id in node_ids {
            if let Some(&position) = self.node_to_position.get(node_id) {
                if seen.insert(position) {
                    out.push(position);
                }
            }
        }
        out
    }

    /// First position in `position`'s inlining stack whose owning source is
    /// `source_id`; the original `position` if no stack entry matches.
    pub fn translate_to_source_id(
        &self,
        source_id: i32,
        position: SourcePosition,
    ) -> SourcePosition {
        for candidate in self.get_inline_stack(position) {
            if self.owning_source_id(candidate) == Some(source_id) {
                return candidate;
            }
        }
        position
    }

    /// The chain of positions from the innermost inlined call site out to the
    /// top-level position (`inlining_id == -1`), which is included.
    ///
    /// A self-referential inlining table would loop here; a visited set
    /// detects that, logs the offending id and truncates the stack.
    pub fn get_inline_stack(&self, position: SourcePosition) -> Vec<SourcePosition> {
        let mut stack = Vec::new();
        let mut visited = HashSet::new();
        let mut current = position;
        loop {
            match current {
                SourcePosition::Script { inlining_id, .. } if inlining_id != NOT_INLINED => {
                    if !visited.insert(inlining_id) {
                        log::warn!("cyclic inlining table at inlining id {inlining_id}");
                        return stack;
                    }
                    stack.push(current);
                    let Some(inlining) = self.inlinings.get(&inlining_id) else {
                        return stack;
                    };
                    current = inlining.inlining_position;
                }
                SourcePosition::Script { .. } => {
                    stack.push(current);
                    return stack;
                }
                SourcePosition::Bytecode { .. } => return stack,
            }
        }
    }

    /// Depth-first appends all positions belonging to the source inlined at
    /// `position` into `out`, recursing into further inlinings at those
    /// positions. Carries the same cycle guard as [`Self::get_inline_stack`].
    pub fn add_inlining_positions(&self, position: SourcePosition, out: &mut Vec<SourcePosition>) {
        let mut visited = HashSet::new();
        self.add_inlining_positions_inner(position, out, &mut visited);
    }

    fn add_inlining_positions_inner(
        &self,
        position: SourcePosition,
        out: &mut Vec<SourcePosition>,
        visited: &mut HashSet<i32>,
    ) {
        let Some(&inlining_id) = self.inlining_by_position.get(&position) else {
            return;
        };
        if !visited.insert(inlining_id) {
            log::warn!("cyclic inlining table at inlining id {inlining_id}");
            return;
        }
        let Some(inlining) = self.inlinings.get(&inlining_id) else {
            return;
        };
        let Some(source) = self.sources.get(&inlining.source_id) else {
            return;
        };
        // The borrow of the source ends before recursing; positions are Copy.
        let positions = source.source_positions.clone();
        for inlined_position in positions {
            out.push(inlined_position);
            self.add_inlining_positions_inner(inlined_position, out, visited);
        }
    }

    /// Positions of `source_id` whose script offset lies in `[start, end)`.
    pub fn source_positions_in_range(
        &self,
        source_id: i32,
        start: i32,
        end: i32,
    ) -> Vec<SourcePosition> {
        self.sources
            .get(&source_id)
            .map(|source| source.positions_in_range(start, end))
            .unwrap_or_default()
    }

    /// Consumes the phase list in dump order, dispatching per phase kind.
    /// An unknown kind aborts the whole load.
    pub fn parse_phases(&mut self, phase_values: &[Value]) -> ScopeResult<()> {
        for value in phase_values {
            let kind = value
                .get("type")
                .and_then(Value::as_str)
                .ok_or(ScopeError::MissingField { field: "type" })?;
            let name = value
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            match kind {
                "graph" => {
                    let phase = self.parse_graph_phase(name, value)?;
                    self.phases.push(Phase::Graph(phase));
                }
                "schedule" => {
                    let text = value.get("data").and_then(Value::as_str).unwrap_or("");
                    self.phases
                        .push(Phase::Schedule(SchedulePhase::parse(&name, text)));
                }
                "sequence" => {
                    let blocks = value
                        .get("blocks")
                        .cloned()
                        .unwrap_or(Value::Array(Vec::new()));
                    let blocks: Vec<SequenceBlock> = serde_json::from_value(blocks)
                        .map_err(|e| ScopeError::MalformedPhase {
                            phase: "sequence",
                            reason: e.to_string(),
                        })?;
                    self.phases
                        .push(Phase::Sequence(SequencePhase { name, blocks }));
                }
                "instructions" => {
                    self.merge_instruction_tables(value);
                    self.phases
                        .push(Phase::Instructions(InstructionsPhase { name }));
                }
                "disassembly" => {
                    let data = value
                        .get("data")
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .to_string();
                    self.phases
                        .push(Phase::Disassembly(DisassemblyPhase { name, data }));
                }
                other => {
                    return Err(ScopeError::UnknownPhaseType {
                        kind: other.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Graph phases indexed into the phase list, for callers that only
    /// display graphs.
    pub fn graph_phases(&self) -> impl Iterator<Item = (usize, &GraphPhase)> {
        self.phases.iter().enumerate().filter_map(|(i, p)| match p {
            Phase::Graph(g) => Some((i, g)),
            _ => None,
        })
    }

    fn parse_graph_phase(&mut self, name: String, value: &Value) -> ScopeResult<GraphPhase> {
        let data = value.get("data").ok_or(ScopeError::MissingField { field: "data" })?;
        let node_specs: Vec<GraphNodeSpec> = data
            .get("nodes")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| ScopeError::MalformedPhase {
                phase: "graph",
                reason: e.to_string(),
            })?
            .unwrap_or_default();
        let edges: Vec<GraphEdgeSpec> = data
            .get("edges")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| ScopeError::MalformedPhase {
                phase: "graph",
                reason: e.to_string(),
            })?
            .unwrap_or_default();

        let phase_index = self.phases.len();
        let mut nodes = Vec::with_capacity(node_specs.len());
        for spec in &node_specs {
            self.highest_node_id = self.highest_node_id.max(spec.id);

            // Origin bytecode positions join the node/position index so a
            // bytecode view can light up graph nodes.
            if let Some(origin) = &spec.origin {
                if let Some(bytecode_position) = origin.bytecode_position {
                    self.link_node_and_position(
                        spec.id,
                        SourcePosition::bytecode(bytecode_position),
                    );
                }
            }

            let source_position = self.resolve_node_position(spec);
            let label = NodeLabel::from_spec(spec, source_position);
            nodes.push(self.intern_label(label, phase_index));
        }

        Ok(GraphPhase {
            name,
            highest_node_id: self.highest_node_id,
            nodes,
            edges,
            labels: self.labels.clone(),
        })
    }

    /// Interns a node label: reuses the previous snapshot when nothing
    /// changed, otherwise marks the superseded snapshot with the phase index
    /// at which its replacement first appeared.
    fn intern_label(&mut self, label: NodeLabel, phase_index: usize) -> Rc<NodeLabel> {
        match self.labels.get(&label.id) {
            Some(previous) if previous.equals(&label) => previous.clone(),
            Some(previous) => {
                previous.set_inplace_update_phase(phase_index);
                let interned = Rc::new(label);
                self.labels.insert(interned.id, interned.clone());
                interned
            }
            None => {
                let interned = Rc::new(label);
                self.labels.insert(interned.id, interned.clone());
                interned
            }
        }
    }

    fn resolve_node_position(&self, spec: &GraphNodeSpec) -> Option<SourcePosition> {
        if let Some(raw) = &spec.source_position {
            return SourcePosition::from_json(raw);
        }
        // Backward compatibility: a bare numeric pos field is a top-level
        // script offset.
        spec.pos.map(|offset| SourcePosition::script(NOT_INLINED, offset))
    }

    fn merge_instruction_tables(&mut self, value: &Value) {
        if let Some(table) = value.get("nodeIdToInstructionRange") {
            for (node_id, range) in iter_range_table(table) {
                self.node_to_instruction_range.insert(node_id as NodeId, range);
            }
        }
        let block_table = value
            .get("blockIdToInstructionRange")
            .or_else(|| value.get("blockIdtoInstructionRange"));
        if let Some(table) = block_table {
            for (block_id, range) in iter_range_table(table) {
                self.block_to_instruction_range.insert(block_id as i32, range);
            }
        }
        if let Some(table) = value.get("instructionOffsetToPCOffset") {
            self.read_instruction_to_pc_offsets(table);
        }
    }

    fn read_instruction_to_pc_offsets(&mut self, table: &Value) {
        let entries: Vec<(u64, &Value)> = match table {
            Value::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, v)| (i as u64, v))
                .collect(),
            Value::Object(map) => map
                .iter()
                .filter_map(|(k, v)| Some((k.parse().ok()?, v)))
                .collect(),
            _ => {
                log::warn!("unrecognized instructionOffsetToPCOffset table shape");
                return;
            }
        };
        for (instruction, raw) in entries {
            let pc = raw
                .as_u64()
                .or_else(|| raw.get("gap").and_then(Value::as_u64));
            match pc {
                Some(pc) => {
                    self.instruction_to_pc.insert(instruction as u32, pc as u32);
                }
                None if raw.is_null() => {}
                None => log::warn!("missing PC offset for instruction {instruction}"),
            }
        }
        let mut offsets: Vec<u32> = self.instruction_to_pc.values().copied().collect();
        offsets.sort_unstable_by(|a, b| b.cmp(a));
        offsets.dedup();
        self.pc_offsets = offsets;
    }

    pub fn instruction_range_for_node(&self, node_id: NodeId) -> Option<InstructionRange> {
        self.node_to_instruction_range.get(&node_id).copied()
    }

    pub fn instruction_range_for_block(&self, block_id: i32) -> Option<InstructionRange> {
        self.block_to_instruction_range.get(&block_id).copied()
    }

    /// Largest registered PC offset that is <= `offset`. `None` when no
    /// registered offset qualifies (the reference's -1).
    pub fn get_key_pc_offset(&self, offset: u32) -> Option<u32> {
        // pc_offsets is sorted descending, so the first qualifying entry is
        // the largest.
        self.pc_offsets.iter().copied().find(|&key| key <= offset)
    }

    /// Instruction ids whose PC offset is the key offset of `offset`.
    pub fn instructions_for_pc_offset(&self, offset: u32) -> Vec<u32> {
        let Some(key) = self.get_key_pc_offset(offset) else {
            return Vec::new();
        };
        let mut instructions: Vec<u32> = self
            .instruction_to_pc
            .iter()
            .filter(|&(_, &pc)| pc == key)
            .map(|(&instruction, _)| instruction)
            .collect();
        instructions.sort_unstable();
        instructions
    }

    /// Nodes whose instruction range covers the instruction(s) at `offset`.
    pub fn nodes_for_pc_offset(&self, offset: u32) -> Vec<NodeId> {
        let instructions = self.instructions_for_pc_offset(offset);
        if instructions.is_empty() {
            return Vec::new();
        }
        let mut nodes: Vec<NodeId> = self
            .node_to_instruction_range
            .iter()
            .filter(|&(_, &range)| {
                instructions
                    .iter()
                    .any(|&instruction| range_covers(range, instruction))
            })
            .map(|(&node, _)| node)
            .collect();
        nodes.sort_unstable();
        nodes
    }

    /// Key PC offsets of every instruction in the half-open `range`.
    pub fn instruction_range_to_key_pc_offsets(&self, range: InstructionRange) -> Vec<u32> {
        let (start, end) = range;
        let instructions: Vec<u32> = if start == end {
            vec![start]
        } else {
            (start..end).collect()
        };
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for instruction in instructions {
            let Some(&pc) = self.instruction_to_pc.get(&instruction) else {
                continue;
            };
            if let Some(key) = self.get_key_pc_offset(pc) {
                if seen.insert(key) {
                    out.push(key);
                }
            }
        }
        out
    }

    /// Key PC offsets covered by the instruction ranges of `node_ids`.
    pub fn nodes_to_key_pc_offsets(&self, node_ids: &[NodeId]) -> Vec<u32> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for node_id in node_ids {
            let Some(&range) = self.node_to_instruction_range.get(node_id) else {
                continue;
            };
            for key in self.instruction_range_to_key_pc_offsets(range) {
                if seen.insert(key) {
                    out.push(key);
                }
            }
        }
        out
    }

    fn owning_source_id(&self, position: SourcePosition) -> Option<i32> {
        match position {
            SourcePosition::Script { inlining_id, .. } if inlining_id == NOT_INLINED => Some(-1),
            SourcePosition::Script { inlining_id, .. } => {
                match self.inlinings.get(&inlining_id) {
                    Some(inlining) => Some(inlining.source_id),
                    None => {
                        log::warn!("position references unknown inlining id {inlining_id}");
                        None
                    }
                }
            }
            SourcePosition::Bytecode { .. } => None,
        }
    }

    fn add_position_to_owning_source(&mut self, position: SourcePosition) {
        let Some(source_id) = self.owning_source_id(position) else {
            return;
        };
        match self.sources.get_mut(&source_id) {
            Some(source) => source.push_position(position),
            None => log::warn!("position {position} owned by unknown source {source_id}"),
        }
    }

    fn link_node_and_position(&mut self, node_id: NodeId, position: SourcePosition) {
        self.node_to_position.insert(node_id, position);
        let nodes = self.position_to_nodes.entry(position).or_default();
        if !nodes.contains(&node_id) {
            nodes.push(node_id);
        }
    }
}

fn range_covers(range: InstructionRange, instruction: u32) -> bool {
    let (start, end) = range;
    if start == end {
        instruction == start
    } else {
        instruction >= start && instruction < end
    }
}

/// Iterates an id -> [start, end] table given either as a sparse array
/// (index = id, null holes) or as an object keyed by id.
fn iter_range_table(table: &Value) -> Vec<(u64, InstructionRange)> {
    let parse_range = |raw: &Value| -> Option<InstructionRange> {
        let items = raw.as_array()?;
        let start = items.first()?.as_u64()? as u32;
        let end = items.get(1)?.as_u64()? as u32;
        Some((start, end))
    };
    match table {
        Value::Array(items) => items
            .iter()
            .enumerate()
            .filter_map(|(id, raw)| Some((id as u64, parse_range(raw)?)))
            .collect(),
        Value::Object(map) => map
            .iter()
            .filter_map(|(key, raw)| Some((key.parse().ok()?, parse_range(raw)?)))
            .collect(),
        _ => {
            log::warn!("unrecognized instruction range table shape");
            Vec::new()
        }
    }
}
