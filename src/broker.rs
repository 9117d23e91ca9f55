// This module implements the selection broker that keeps every registered view
// in sync. Views register under one of four selection domains (graph nodes,
// source positions, basic blocks, instructions) and receive a monotonically
// increasing handler id; a broadcast in one domain notifies every other handler
// of that domain plus, for the node and position domains, the cross-translated
// selection in the paired domain. The initiating handler is excluded in both
// domains so a view never echoes its own selection back to itself. Handler
// lists live in RefCells so a notified view may issue a nested broadcast;
// broadcasts therefore only ever take shared borrows of the registries.

//! Selection broker with cross-domain translation.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::position::SourcePosition;
use crate::resolver::{InstructionRange, NodeId, SourceResolver};

pub type HandlerId = usize;

/// Every handler can at least drop its selection.
pub trait ClearableHandler {
    fn broker_id(&self) -> HandlerId;
    fn clear(&self);
}

pub trait NodeSelectionHandler: ClearableHandler {
    fn select_nodes(&self, nodes: &[NodeId], selected: bool);
}

pub trait SourcePositionSelectionHandler: ClearableHandler {
    fn select_positions(&self, positions: &[SourcePosition], selected: bool);
}

pub trait BlockSelectionHandler: ClearableHandler {
    fn select_blocks(&self, blocks: &[u32], selected: bool);
}

pub trait InstructionSelectionHandler: ClearableHandler {
    fn select_instructions(&self, ranges: &[InstructionRange], selected: bool);
}

/// Routes selection events between registered views, translating between the
/// node and source-position domains through the resolver.
pub struct SelectionBroker {
    resolver: Rc<SourceResolver>,
    next_id: Cell<HandlerId>,
    all: RefCell<Vec<Rc<dyn ClearableHandler>>>,
    node_handlers: RefCell<Vec<Rc<dyn NodeSelectionHandler>>>,
    position_handlers: RefCell<Vec<Rc<dyn SourcePositionSelectionHandler>>>,
    block_handlers: RefCell<Vec<Rc<dyn BlockSelectionHandler>>>,
    instruction_handlers: RefCell<Vec<Rc<dyn InstructionSelectionHandler>>>,
}

impl SelectionBroker {
    pub fn new(resolver: Rc<SourceResolver>) -> SelectionBroker {
        SelectionBroker {
            resolver,
            next_id: Cell::new(1),
            all: RefCell::new(Vec::new()),
            node_handlers: RefCell::new(Vec::new()),
            position_handlers: RefCell::new(Vec::new()),
            block_handlers: RefCell::new(Vec::new()),
            instruction_handlers: RefCell::new(Vec::new()),
        }
    }

    fn fresh_id(&self) -> HandlerId {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }

    pub fn register_node_handler(&self, handler: Rc<dyn NodeSelectionHandler>) -> HandlerId {
        let id = self.fresh_id();
        self.all.borrow_mut().push(handler.clone());
        self.node_handlers.borrow_mut().push(handler);
        id
    }

    pub fn register_source_position_handler(
        &self,
        handler: Rc<dyn SourcePositionSelectionHandler>,
    ) -> HandlerId {
        let id = self.fresh_id();
        self.all.borrow_mut().push(handler.clone());
        self.position_handlers.borrow_mut().push(handler);
        id
    }

    pub fn register_block_handler(&self, handler: Rc<dyn BlockSelectionHandler>) -> HandlerId {
        let id = self.fresh_id();
        self.all.borrow_mut().push(handler.clone());
        self.block_handlers.borrow_mut().push(handler);
        id
    }

    pub fn register_instruction_handler(
        &self,
        handler: Rc<dyn InstructionSelectionHandler>,
    ) -> HandlerId {
        let id = self.fresh_id();
        self.all.borrow_mut().push(handler.clone());
        self.instruction_handlers.borrow_mut().push(handler);
        id
    }

    /// Drops a handler from every registry it appears in.
    ///
    /// Must not be called from inside a handler: broadcasts hold shared
    /// borrows of the registries for their whole duration, and the removal
    /// needs exclusive ones. Unregister between broadcasts only.
    pub fn unregister(&self, id: HandlerId) {
        self.all.borrow_mut().retain(|h| h.broker_id() != id);
        self.node_handlers.borrow_mut().retain(|h| h.broker_id() != id);
        self.position_handlers
            .borrow_mut()
            .retain(|h| h.broker_id() != id);
        self.block_handlers
            .borrow_mut()
            .retain(|h| h.broker_id() != id);
        self.instruction_handlers
            .borrow_mut()
            .retain(|h| h.broker_id() != id);
    }

    /// A node selection from `from`: other node views hear the node ids,
    /// position views hear the resolved source positions. `from` itself is
    /// excluded in both domains.
    pub fn broadcast_node_select(&self, from: HandlerId, nodes: &[NodeId], selected: bool) {
        log::debug!(
            "broadcast node select: {} node(s), selected={}",
            nodes.len(),
            selected
        );
        for handler in self.node_handlers.borrow().iter() {
            if handler.broker_id() != from {
                handler.select_nodes(nodes, selected);
            }
        }
        let positions = self.resolver.node_ids_to_source_positions(nodes);
        for handler in self.position_handlers.borrow().iter() {
            if handler.broker_id() != from {
                handler.select_positions(&positions, selected);
            }
        }
    }

    /// The mirror of `broadcast_node_select` for a source-position origin.
    pub fn broadcast_source_position_select(
        &self,
        from: HandlerId,
        positions: &[SourcePosition],
        selected: bool,
    ) {
        log::debug!(
            "broadcast position select: {} position(s), selected={}",
            positions.len(),
            selected
        );
        for handler in self.position_handlers.borrow().iter() {
            if handler.broker_id() != from {
                handler.select_positions(positions, selected);
            }
        }
        let nodes = self.resolver.source_positions_to_node_ids(positions);
        for handler in self.node_handlers.borrow().iter() {
            if handler.broker_id() != from {
                handler.select_nodes(&nodes, selected);
            }
        }
    }

    /// Block selections stay within the block domain.
    pub fn broadcast_block_select(&self, from: HandlerId, blocks: &[u32], selected: bool) {
        for handler in self.block_handlers.borrow().iter() {
            if handler.broker_id() != from {
                handler.select_blocks(blocks, selected);
            }
        }
    }

    /// Instruction selections stay within the instruction domain.
    pub fn broadcast_instruction_select(
        &self,
        from: HandlerId,
        ranges: &[InstructionRange],
        selected: bool,
    ) {
        for handler in self.instruction_handlers.borrow().iter() {
            if handler.broker_id() != from {
                handler.select_instructions(ranges, selected);
            }
        }
    }

    /// Clears every selection everywhere except at the initiator.
    pub fn broadcast_clear(&self, from: HandlerId) {
        for handler in self.all.borrow().iter() {
            if handler.broker_id() != from {
                handler.clear();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // A recording view usable in any domain.
    struct Probe {
        id: Cell<HandlerId>,
        nodes_seen: RefCell<Vec<Vec<NodeId>>>,
        positions_seen: RefCell<Vec<Vec<SourcePosition>>>,
        cleared: Cell<u32>,
    }

    impl Probe {
        fn new() -> Rc<Probe> {
            Rc::new(Probe {
                id: Cell::new(0),
                nodes_seen: RefCell::new(Vec::new()),
                positions_seen: RefCell::new(Vec::new()),
                cleared: Cell::new(0),
            })
        }
    }

    impl ClearableHandler for Probe {
        fn broker_id(&self) -> HandlerId {
            self.id.get()
        }
        fn clear(&self) {
            self.cleared.set(self.cleared.get() + 1);
        }
    }

    impl NodeSelectionHandler for Probe {
        fn select_nodes(&self, nodes: &[NodeId], _selected: bool) {
            self.nodes_seen.borrow_mut().push(nodes.to_vec());
        }
    }

    impl SourcePositionSelectionHandler for Probe {
        fn select_positions(&self, positions: &[SourcePosition], _selected: bool) {
            self.positions_seen.borrow_mut().push(positions.to_vec());
        }
    }

    fn resolver_with_node_map() -> Rc<SourceResolver> {
        let mut resolver = SourceResolver::new();
        let map = json!({
            "7": {"scriptOffset": 10, "inliningId": -1},
            "8": {"scriptOffset": 20, "inliningId": -1}
        });
        resolver.set_node_position_map(map.as_object().unwrap());
        Rc::new(resolver)
    }

    #[test]
    fn test_node_select_translates_and_skips_origin() {
        let broker = SelectionBroker::new(resolver_with_node_map());

        let origin = Probe::new();
        origin.id.set(broker.register_node_handler(origin.clone()));
        let other_nodes = Probe::new();
        other_nodes
            .id
            .set(broker.register_node_handler(other_nodes.clone()));
        let positions = Probe::new();
        positions
            .id
            .set(broker.register_source_position_handler(positions.clone()));

        broker.broadcast_node_select(origin.id.get(), &[7], true);

        assert!(origin.nodes_seen.borrow().is_empty());
        assert_eq!(other_nodes.nodes_seen.borrow().as_slice(), &[vec![7]]);
        assert_eq!(
            positions.positions_seen.borrow().as_slice(),
            &[vec![SourcePosition::script(crate::position::NOT_INLINED, 10)]]
        );
    }

    #[test]
    fn test_position_origin_excluded_in_both_domains() {
        let broker = SelectionBroker::new(resolver_with_node_map());

        // One view registered in both domains under a single id.
        let dual = Probe::new();
        dual.id.set(broker.register_node_handler(dual.clone()));
        broker.register_source_position_handler(dual.clone());
        // The second registration minted an id dual never adopted; reuse of
        // dual.id in both registries is what the echo rule keys on.
        let listener = Probe::new();
        listener
            .id
            .set(broker.register_node_handler(listener.clone()));

        let position = SourcePosition::script(crate::position::NOT_INLINED, 20);
        broker.broadcast_source_position_select(dual.id.get(), &[position], true);

        // Dual initiated, so it hears nothing in either domain.
        assert!(dual.positions_seen.borrow().is_empty());
        assert!(dual.nodes_seen.borrow().is_empty());
        // The listener hears the translated node selection.
        assert_eq!(listener.nodes_seen.borrow().as_slice(), &[vec![8]]);
    }

    #[test]
    fn test_clear_reaches_all_but_origin() {
        let broker = SelectionBroker::new(Rc::new(SourceResolver::new()));
        let a = Probe::new();
        a.id.set(broker.register_node_handler(a.clone()));
        let b = Probe::new();
        b.id.set(broker.register_source_position_handler(b.clone()));

        broker.broadcast_clear(a.id.get());
        assert_eq!(a.cleared.get(), 0);
        assert_eq!(b.cleared.get(), 1);
    }

    #[test]
    fn test_unregister_stops_delivery() {
        let broker = SelectionBroker::new(Rc::new(SourceResolver::new()));
        let a = Probe::new();
        a.id.set(broker.register_node_handler(a.clone()));
        let b = Probe::new();
        b.id.set(broker.register_node_handler(b.clone()));

        broker.unregister(b.id.get());
        broker.broadcast_node_select(a.id.get(), &[1], true);
        assert!(b.nodes_seen.borrow().is_empty());
    }
}
