// This module parses the textual basic-block dump of a schedule phase. The input
// is one logical record per line and three line shapes are recognized, tried in
// order: a node definition `ID: LABEL(ARGS)` with an optional `-> BLOCKLIST`
// tail naming the current block's successors, a block header
// `--- BLOCK B<id> [(deferred)] [<- PREDLIST] ---` opening a new current block,
// and an unconditional jump `Goto -> B<id>`. A line matching none of the shapes
// is logged as a warning and dropped; the parse itself never fails. The parser
// is a hand-written cursor scanner instead of a regex rule table so each shape
// and its precedence stays auditable and testable on its own.

//! Schedule phase text parser.

use hashbrown::HashMap;

use crate::resolver::NodeId;

/// Parsed schedule phase: blocks in dump order plus a node index by id.
#[derive(Debug, Clone, Default)]
pub struct SchedulePhase {
    pub name: String,
    pub blocks: Vec<ScheduleBlock>,
    /// Node id to (block position, node position within block).
    node_index: HashMap<NodeId, (usize, usize)>,
}

#[derive(Debug, Clone, Default)]
pub struct ScheduleBlock {
    pub id: u32,
    pub deferred: bool,
    /// Predecessor block ids, sorted ascending.
    pub predecessors: Vec<u32>,
    pub successors: Vec<u32>,
    pub nodes: Vec<ScheduleNode>,
}

#[derive(Debug, Clone)]
pub struct ScheduleNode {
    pub id: NodeId,
    pub label: String,
    /// Argument node ids, possibly empty.
    pub inputs: Vec<NodeId>,
    /// Owning block id.
    pub block: u32,
}

impl SchedulePhase {
    pub fn parse(name: &str, text: &str) -> SchedulePhase {
        let mut phase = SchedulePhase {
            name: name.to_string(),
            ..SchedulePhase::default()
        };
        for line in text.lines() {
            phase.parse_line(line);
        }
        phase
    }

    pub fn node(&self, id: NodeId) -> Option<&ScheduleNode> {
        let &(block_pos, node_pos) = self.node_index.get(&id)?;
        Some(&self.blocks[block_pos].nodes[node_pos])
    }

    pub fn block(&self, id: u32) -> Option<&ScheduleBlock> {
        self.blocks.iter().find(|b| b.id == id)
    }

    fn parse_line(&mut self, line: &str) {
        if line.trim().is_empty() {
            return;
        }
        // Rule order matters: node definition, block header, goto.
        if let Some((id, label, inputs, successors)) = parse_node_definition(line) {
            self.add_node(id, label, inputs, line);
            if let Some(successors) = successors {
                self.set_successors(successors, line);
            }
            return;
        }
        if let Some((id, deferred, predecessors)) = parse_block_header(line) {
            let mut predecessors = predecessors;
            predecessors.sort_unstable();
            self.blocks.push(ScheduleBlock {
                id,
                deferred,
                predecessors,
                successors: Vec::new(),
                nodes: Vec::new(),
            });
            return;
        }
        if let Some(target) = parse_goto(line) {
            self.set_successors(vec![target], line);
            return;
        }
        log::warn!("dropping unrecognized schedule line: {line:?}");
    }

    fn add_node(&mut self, id: NodeId, label: String, inputs: Vec<NodeId>, line: &str) {
        let block_pos = match self.blocks.len().checked_sub(1) {
            Some(pos) => pos,
            None => {
                log::warn!("schedule node before any block header, dropping: {line:?}");
                return;
            }
        };
        let block = &mut self.blocks[block_pos];
        block.nodes.push(ScheduleNode {
            id,
            label,
            inputs,
            block: block.id,
        });
        self.node_index.insert(id, (block_pos, block.nodes.len() - 1));
    }

    fn set_successors(&mut self, successors: Vec<u32>, line: &str) {
        match self.blocks.last_mut() {
            Some(block) => block.successors = successors,
            None => log::warn!("schedule successors before any block header: {line:?}"),
        }
    }
}

/// `ID: LABEL(ARGS)` optionally followed by `-> BLOCKLIST`.
fn parse_node_definition(line: &str) -> Option<(NodeId, String, Vec<NodeId>, Option<Vec<u32>>)> {
    let line = line.trim();
    let (id_text, rest) = line.split_once(':')?;
    let id: NodeId = id_text.trim().parse().ok()?;

    // An optional successor list follows the closing paren.
    let (body, successors) = match rest.rsplit_once("->") {
        Some((body, tail)) if body.trim_end().ends_with(')') => {
            (body.trim(), Some(parse_block_list(tail)?))
        }
        _ => (rest.trim(), None),
    };

    let body = body.strip_suffix(')')?;
    // The label may itself contain parentheses; the argument list starts at
    // the last opening paren.
    let open = body.rfind('(')?;
    let label = body[..open].trim().to_string();
    if label.is_empty() {
        return None;
    }
    let args = body[open + 1..].trim();
    let inputs = if args.is_empty() {
        Vec::new()
    } else {
        parse_id_list(args)?
    };
    Some((id, label, inputs, successors))
}

/// `--- BLOCK B<id> [(deferred)] [<- PREDLIST] ---`
fn parse_block_header(line: &str) -> Option<(u32, bool, Vec<u32>)> {
    let line = line.trim();
    let rest = line.strip_prefix("---")?.trim_start();
    let rest = rest.strip_prefix("BLOCK")?.trim_start();
    let rest = rest.strip_prefix('B')?;
    let digits_end = rest.find(|c: char| !c.is_ascii_digit())?;
    if digits_end == 0 {
        return None;
    }
    let id: u32 = rest[..digits_end].parse().ok()?;
    let mut rest = rest[digits_end..].trim_start();

    let deferred = if let Some(tail) = rest.strip_prefix("(deferred)") {
        rest = tail.trim_start();
        true
    } else {
        false
    };

    let rest = rest.strip_suffix("---")?.trim_end();
    let predecessors = if let Some(tail) = rest.strip_prefix("<-") {
        parse_block_list(tail)?
    } else if rest.is_empty() {
        Vec::new()
    } else {
        return None;
    };
    Some((id, deferred, predecessors))
}

/// `Goto -> B<id>`
fn parse_goto(line: &str) -> Option<u32> {
    let line = line.trim();
    let rest = line.strip_prefix("Goto")?.trim_start();
    let rest = rest.strip_prefix("->")?.trim_start();
    let rest = rest.strip_prefix('B')?.trim_end();
    if rest.is_empty() || !rest.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    rest.parse().ok()
}

/// Comma-separated `B<digits>` ids.
fn parse_block_list(text: &str) -> Option<Vec<u32>> {
    text.split(',')
        .map(|part| part.trim().strip_prefix('B')?.parse().ok())
        .collect()
}

/// Comma-separated integer node ids.
fn parse_id_list(text: &str) -> Option<Vec<NodeId>> {
    text.split(',')
        .map(|part| part.trim().parse().ok())
        .collect()
}
