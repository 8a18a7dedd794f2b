//! Block visitation orders for dataflow passes
//!
//! An iterator snapshots the block ids of the requested order when it is
//! created, so a pass may mutate the graph while walking it. Repeating
//! orders restart from the beginning whenever any visit in the last pass
//! reported a change.

use super::{BlockId, MirGraph};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IterationOrder {
    PreOrder,
    RepeatingPreOrder,
    PostOrder,
    RepeatingPostOrder,
    ReversePostOrder,
    RepeatingReversePostOrder,
    /// Post-order over the dominator tree.
    PostOrderDom,
    /// Every visible block by id, reachable or not.
    AllNodes,
}

impl IterationOrder {
    fn is_repeating(self) -> bool {
        matches!(
            self,
            IterationOrder::RepeatingPreOrder
                | IterationOrder::RepeatingPostOrder
                | IterationOrder::RepeatingReversePostOrder
        )
    }
}

#[derive(Debug, Clone)]
pub struct DataflowIterator {
    blocks: Vec<BlockId>,
    idx: usize,
    repeating: bool,
    changed: bool,
    repeats: usize,
}

impl DataflowIterator {
    pub fn new(graph: &MirGraph, order: IterationOrder) -> Self {
        let blocks = match order {
            IterationOrder::PreOrder | IterationOrder::RepeatingPreOrder => {
                graph.dfs_order().to_vec()
            }
            IterationOrder::PostOrder | IterationOrder::RepeatingPostOrder => {
                graph.dfs_post_order().to_vec()
            }
            IterationOrder::ReversePostOrder | IterationOrder::RepeatingReversePostOrder => {
                graph.dfs_post_order().iter().rev().copied().collect()
            }
            IterationOrder::PostOrderDom => graph.dom_post_order().to_vec(),
            IterationOrder::AllNodes => graph
                .blocks()
                .iter()
                .filter(|bb| !bb.is_hidden())
                .map(|bb| bb.id)
                .collect(),
        };
        Self {
            blocks,
            idx: 0,
            repeating: order.is_repeating(),
            changed: false,
            repeats: 0,
        }
    }

    /// Next block to visit. `had_change` reports whether visiting the
    /// previous block changed anything; repeating orders use it to decide
    /// whether to start another pass.
    pub fn next(&mut self, had_change: bool) -> Option<BlockId> {
        self.changed |= had_change;
        if self.idx < self.blocks.len() {
            let bb = self.blocks[self.idx];
            self.idx += 1;
            return Some(bb);
        }
        if self.repeating && self.changed && !self.blocks.is_empty() {
            self.idx = 1;
            self.repeats += 1;
            self.changed = false;
            return Some(self.blocks[0]);
        }
        None
    }

    /// Completed passes beyond the first.
    pub fn repeats(&self) -> usize {
        self.repeats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::BlockType;
    use crate::config::CompilerOptions;

    fn diamond() -> MirGraph {
        let mut graph = MirGraph::new(&CompilerOptions::default());
        graph.create_sentinels();
        let head = graph.new_block(BlockType::DalvikByteCode);
        let left = graph.new_block(BlockType::DalvikByteCode);
        let right = graph.new_block(BlockType::DalvikByteCode);
        graph.link_fall_through(graph.entry_block(), head);
        graph.link_fall_through(head, left);
        graph.link_taken(head, right);
        graph.link_fall_through(left, graph.exit_block());
        graph.link_fall_through(right, graph.exit_block());
        graph.compute_dfs_orders();
        graph
    }

    #[test]
    fn test_reverse_post_order_starts_at_entry() {
        let graph = diamond();
        let mut iter = DataflowIterator::new(&graph, IterationOrder::ReversePostOrder);
        assert_eq!(iter.next(false), Some(graph.entry_block()));
        let mut seen = 1;
        while iter.next(false).is_some() {
            seen += 1;
        }
        assert_eq!(seen, graph.num_reachable_blocks());
    }

    #[test]
    fn test_repeating_order_restarts_after_change() {
        let graph = diamond();
        let mut iter = DataflowIterator::new(&graph, IterationOrder::RepeatingPostOrder);
        let mut visits = 0;
        let mut first_pass = true;
        let mut bb = iter.next(false);
        while bb.is_some() {
            visits += 1;
            // Report one change during the first pass only.
            let change = first_pass && visits == 1;
            if visits == graph.num_reachable_blocks() {
                first_pass = false;
            }
            bb = iter.next(change);
        }
        assert_eq!(visits, 2 * graph.num_reachable_blocks());
        assert_eq!(iter.repeats(), 1);
    }
}
