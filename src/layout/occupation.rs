// This module implements the slot occupation index the placement pass leans on.
// The horizontal axis is modeled as fixed-width slots, one per node input
// connector. The index tracks which slots are filled, remembers each placed
// node's footprint by id, and keeps the transient marks left where a node's
// input edges land so the rank above cannot overlap a live incoming edge.
// find_space scans alternately right then left in increasing radius from the
// slot nearest the requested position, with independent left/right "still need
// N free slots" counters; a non-zero bias collapses the search to grow in one
// direction only.

//! Horizontal slot occupation for node placement.

use hashbrown::{HashMap, HashSet};

use crate::graph::{Graph, NODE_INPUT_WIDTH};
use crate::resolver::NodeId;

/// Slot range `(first, last)`, inclusive on both ends.
pub type SlotRange = (i32, i32);

#[derive(Debug, Default)]
pub struct OccupationGrid {
    filled: HashSet<i32>,
    /// Footprint of every placed node, by id.
    node_occupation: HashMap<NodeId, SlotRange>,
    /// Transient input-edge landing marks, keyed by the edge's source node so
    /// they can be cleared when the source itself is placed.
    edge_marks: HashMap<NodeId, Vec<SlotRange>>,
}

impl OccupationGrid {
    pub fn new() -> OccupationGrid {
        OccupationGrid::default()
    }

    pub fn position_to_slot(&self, position: f64) -> i32 {
        (position / NODE_INPUT_WIDTH).floor() as i32
    }

    pub fn slot_to_position(&self, slot: i32) -> f64 {
        slot as f64 * NODE_INPUT_WIDTH
    }

    fn occupy_slot_range(&mut self, range: SlotRange) {
        for slot in range.0..=range.1 {
            self.filled.insert(slot);
        }
    }

    fn clear_slot_range(&mut self, range: SlotRange) {
        for slot in range.0..=range.1 {
            self.filled.remove(&slot);
        }
    }

    fn position_range_to_slots(&self, from: f64, to: f64) -> SlotRange {
        (self.position_to_slot(from), self.position_to_slot(to))
    }

    /// Marks a placed node's footprint.
    pub fn occupy_node(&mut self, id: NodeId, x: f64, width: f64) {
        let range = self.position_range_to_slots(x, x + width);
        self.occupy_slot_range(range);
        self.node_occupation.insert(id, range);
    }

    /// Footprints of all placed nodes, for overlap checks.
    pub fn node_occupations(&self) -> impl Iterator<Item = (NodeId, SlotRange)> + '_ {
        self.node_occupation.iter().map(|(&id, &range)| (id, range))
    }

    /// Marks the landing position of every visible input edge of `id`,
    /// remembering each mark under the edge's source node.
    pub fn occupy_node_inputs(&mut self, graph: &Graph, id: NodeId) {
        let Some(node) = graph.node(id) else {
            return;
        };
        let margin = NODE_INPUT_WIDTH / 2.0;
        let marks: Vec<(NodeId, SlotRange)> = node
            .inputs
            .iter()
            .filter(|&&edge_idx| graph.edge_is_visible(edge_idx))
            .map(|&edge_idx| {
                let edge = &graph.edges[edge_idx];
                let landing = node.x + node.input_x(edge.index) + NODE_INPUT_WIDTH / 2.0;
                let range = self.position_range_to_slots(landing - margin, landing + margin);
                (edge.source, range)
            })
            .collect();
        for (source, range) in marks {
            self.occupy_slot_range(range);
            self.edge_marks.entry(source).or_default().push(range);
        }
    }

    /// Clears the landing marks left for edges that originate at `id`.
    /// Called right before `id`'s own rank is placed.
    pub fn clear_node_outputs(&mut self, id: NodeId) {
        if let Some(ranges) = self.edge_marks.remove(&id) {
            for range in ranges {
                self.clear_slot_range(range);
            }
        }
    }

    /// Finds a free stretch of `width` near `position`.
    ///
    /// Scans alternately right then left in increasing radius from the slot
    /// nearest `position`; each side keeps its own count of slots still
    /// needed, reset whenever that side hits a filled slot. A positive
    /// `direction` only grows rightwards, a negative one only leftwards,
    /// zero accepts whichever side (or their combination around the start
    /// slot) completes first. Returns the left edge of the found stretch.
    pub fn find_space(&self, position: f64, width: f64, direction: i32) -> f64 {
        let width_slots =
            (((width + NODE_INPUT_WIDTH - 1.0) / NODE_INPUT_WIDTH) as i32).max(1);
        let start_slot = self.position_to_slot(position + width / 2.0);
        let mut remaining_left = width_slots;
        let mut remaining_right = width_slots;
        let mut slots_checked: i32 = 0;
        loop {
            let scan_left = slots_checked % 2 == 1;
            slots_checked += 1;
            let scan_slot = start_slot
                + if scan_left {
                    -(slots_checked >> 1)
                } else {
                    slots_checked >> 1
                };
            if !self.filled.contains(&scan_slot) {
                if scan_left {
                    if direction <= 0 {
                        remaining_left -= 1;
                    }
                } else if direction >= 0 {
                    remaining_right -= 1;
                }
                if remaining_left == 0
                    || remaining_right == 0
                    || (remaining_left + remaining_right == width_slots
                        && width_slots == slots_checked)
                {
                    return if scan_left {
                        self.slot_to_position(scan_slot)
                    } else {
                        self.slot_to_position(scan_slot - width_slots + 1)
                    };
                }
            } else if scan_left {
                remaining_left = width_slots;
            } else {
                remaining_right = width_slots;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_space_empty_grid_centers() {
        let grid = OccupationGrid::new();
        // One-slot node at position 0 lands on the slot containing its
        // midpoint.
        let x = grid.find_space(0.0, NODE_INPUT_WIDTH, 0);
        assert_eq!(x, 0.0);
    }

    #[test]
    fn test_find_space_skips_occupied() {
        let mut grid = OccupationGrid::new();
        grid.occupy_node(1, 0.0, NODE_INPUT_WIDTH - 1.0);
        let x = grid.find_space(0.0, NODE_INPUT_WIDTH, 0);
        // Slot 0 is taken; the scan settles on a neighboring slot.
        assert_ne!(grid.position_to_slot(x), 0);
    }

    #[test]
    fn test_find_space_respects_direction() {
        let mut grid = OccupationGrid::new();
        grid.occupy_node(1, 0.0, NODE_INPUT_WIDTH - 1.0);
        let right = grid.find_space(0.0, NODE_INPUT_WIDTH, 1);
        assert!(grid.position_to_slot(right) > 0);
        let left = grid.find_space(0.0, NODE_INPUT_WIDTH, -1);
        assert!(grid.position_to_slot(left) < 0);
    }

    #[test]
    fn test_clear_node_outputs_drops_marks() {
        let mut grid = OccupationGrid::new();
        // Simulate an input-edge mark recorded under source node 7.
        grid.occupy_slot_range((2, 3));
        grid.edge_marks.entry(7).or_default().push((2, 3));
        assert!(grid.filled.contains(&2));
        grid.clear_node_outputs(7);
        assert!(!grid.filled.contains(&2));
        assert!(!grid.filled.contains(&3));
    }
}
