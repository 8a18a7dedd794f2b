//! DFS orders, dominators, dominance frontiers and loop nesting
//!
//! Immediate dominators are computed with the Cooper-Harvey-Kennedy
//! iterative algorithm over reverse post-order, using post-order numbers
//! (`dfs_id`) so that the entry block has the highest number. Everything
//! here is recomputed from scratch; block edits mark it stale.

use super::{BlockFlags, BlockId, BlockType, DataflowIterator, IterationOrder, MethodAttributes, MirGraph};
use crate::error::{Error, Result};
use crate::utils::BitSet;

impl MirGraph {
    /// Records pre-order, post-order and `dfs_id` for every block reachable
    /// from the entry, and hides the rest.
    pub fn compute_dfs_orders(&mut self) {
        self.dfs_order.clear();
        self.dfs_post_order.clear();
        self.clear_all_visited_flags();
        for bb in &mut self.blocks {
            bb.dfs_id = None;
        }

        let entry = self.entry_block();
        let mut stack: Vec<BlockId> = vec![entry];
        self.mark_pre_order(entry);
        while let Some(&cur) = stack.last() {
            let next = self
                .block(cur)
                .successor_ids()
                .find(|succ| !self.block(*succ).visited());
            if let Some(succ) = next {
                self.mark_pre_order(succ);
                stack.push(succ);
                continue;
            }
            self.block_mut(cur).dfs_id = Some(self.dfs_post_order.len());
            self.dfs_post_order.push(cur);
            stack.pop();
        }
        self.num_reachable_blocks = self.dfs_order.len();

        if self.num_reachable_blocks != self.blocks.len() {
            let hidden: Vec<BlockId> = self
                .blocks
                .iter()
                .filter(|bb| !bb.visited() && !bb.is_hidden())
                .map(|bb| bb.id)
                .collect();
            for id in hidden {
                self.hide_block(id);
            }
        }
        self.dfs_orders_up_to_date = true;
    }

    fn mark_pre_order(&mut self, block: BlockId) {
        self.block_mut(block).flags.insert(BlockFlags::VISITED);
        self.dfs_order.push(block);
    }

    /// Detaches an unreachable block. Its instructions and type are kept for
    /// dumps.
    fn hide_block(&mut self, id: BlockId) {
        let children: Vec<BlockId> = self.block(id).successor_ids().collect();
        for child in children {
            self.block_mut(child).erase_predecessor(id);
            self.erase_phi_operands(child, id);
        }
        let bb = self.block_mut(id);
        bb.flags.insert(BlockFlags::HIDDEN);
        bb.fall_through = None;
        bb.taken = None;
        bb.successors.clear();
        bb.predecessors.clear();
        bb.i_dom = None;
        log::trace!("hiding unreachable block {}", id);
    }

    /// Computes immediate dominators, dominator sets, the dominator tree
    /// post-order, dominance frontiers and loop nesting.
    pub fn compute_dominators(&mut self) -> Result<()> {
        if !self.dfs_orders_up_to_date {
            self.compute_dfs_orders();
        }
        let num_blocks = self.blocks.len();
        let reachable = self.num_reachable_blocks;
        for bb in &mut self.blocks {
            // Hidden blocks are outside the dominator tree.
            bb.dominators = if bb.is_hidden() {
                BitSet::new(num_blocks)
            } else {
                BitSet::full(num_blocks)
            };
            bb.i_dominated = BitSet::new(num_blocks);
            bb.dom_frontier = BitSet::new(num_blocks);
            bb.i_dom = None;
        }

        let entry = self.entry_block();
        let entry_dfs = self.dfs_id(entry)?;
        if entry_dfs + 1 != reachable {
            return Err(Error::internal("entry block is not last in post-order"));
        }
        self.i_dom_list = vec![None; reachable];
        self.i_dom_list[entry_dfs] = Some(entry_dfs);

        let mut iter = DataflowIterator::new(self, IterationOrder::RepeatingReversePostOrder);
        let mut change = false;
        while let Some(bb) = iter.next(change) {
            if iter.repeats() > reachable + 2 {
                return Err(Error::malformed(
                    self.block(bb).start_offset,
                    "immediate dominators did not converge",
                ));
            }
            change = self.compute_block_idom(bb)?;
        }
        let passes = iter.repeats() + 1;

        {
            let bb = self.block_mut(entry);
            bb.dominators.clear();
            bb.dominators.insert(entry.index());
            bb.i_dom = None;
        }
        let pre_order = self.dfs_order.clone();
        for &bb in &pre_order {
            self.set_dominators(bb)?;
        }
        let rpo: Vec<BlockId> = self.dfs_post_order.iter().rev().copied().collect();
        for &bb in &rpo {
            if bb == entry {
                continue;
            }
            if let Some(idom) = self.block(bb).i_dom {
                let dominators = self.block(idom).dominators.clone();
                let block = self.block_mut(bb);
                block.dominators = dominators;
                block.dominators.insert(bb.index());
            }
        }

        self.compute_dom_post_order_traversal();
        let mut dom_iter = DataflowIterator::new(self, IterationOrder::PostOrderDom);
        while let Some(bb) = dom_iter.next(false) {
            self.compute_dominance_frontier(bb);
        }

        self.compute_loop_info();
        self.domination_up_to_date = true;
        log::trace!(
            "dominators of {}: {} reachable blocks, {} passes",
            self.method_name(),
            reachable,
            passes
        );
        Ok(())
    }

    /// DFS orders and dominance in one step, as every structural edit needs.
    pub fn compute_dominance(&mut self) -> Result<()> {
        self.compute_dfs_orders();
        self.compute_dominators()
    }

    fn dfs_id(&self, block: BlockId) -> Result<usize> {
        self.block(block)
            .dfs_id
            .ok_or_else(|| Error::internal(format!("block {} has no dfs id", block)))
    }

    fn compute_block_idom(&mut self, bb: BlockId) -> Result<bool> {
        if bb == self.entry_block() {
            return Ok(false);
        }
        let mut idom: Option<usize> = None;
        for &pred in &self.block(bb).predecessors {
            let Some(pred_dfs) = self.block(pred).dfs_id else {
                continue;
            };
            if self.i_dom_list[pred_dfs].is_none() {
                continue;
            }
            idom = Some(match idom {
                None => pred_dfs,
                Some(current) => self.find_common_parent(pred_dfs, current)?,
            });
        }
        let Some(idom) = idom else {
            return Err(Error::internal(format!(
                "block {} has no processed predecessor",
                bb
            )));
        };
        let dfs = self.dfs_id(bb)?;
        if self.i_dom_list[dfs] != Some(idom) {
            self.i_dom_list[dfs] = Some(idom);
            return Ok(true);
        }
        Ok(false)
    }

    /// Walks both fingers up the current idom chains until they meet.
    fn find_common_parent(&self, mut block1: usize, mut block2: usize) -> Result<usize> {
        let up = |b: usize| {
            self.i_dom_list[b].ok_or_else(|| Error::internal("idom chain reaches an unprocessed block"))
        };
        while block1 != block2 {
            while block1 < block2 {
                block1 = up(block1)?;
            }
            while block2 < block1 {
                block2 = up(block2)?;
            }
        }
        Ok(block1)
    }

    fn set_dominators(&mut self, bb: BlockId) -> Result<()> {
        if bb == self.entry_block() {
            return Ok(());
        }
        let dfs = self.dfs_id(bb)?;
        let idom_dfs = self.i_dom_list[dfs]
            .ok_or_else(|| Error::internal(format!("block {} has no idom", bb)))?;
        let idom = self.dfs_post_order[idom_dfs];
        self.block_mut(bb).i_dom = Some(idom);
        self.block_mut(idom).i_dominated.insert(bb.index());
        Ok(())
    }

    fn compute_dom_post_order_traversal(&mut self) {
        self.dom_post_order_traversal.clear();
        let entry = self.entry_block();
        // (block, its dominated children, next child to visit)
        let children = self.block(entry).i_dominated.iter().collect();
        let mut stack: Vec<(BlockId, Vec<usize>, usize)> = vec![(entry, children, 0)];
        while let Some(frame) = stack.last_mut() {
            let bb = frame.0;
            match frame.1.get(frame.2).copied() {
                Some(child) => {
                    frame.2 += 1;
                    let child = BlockId(child as u32);
                    let children = self.block(child).i_dominated.iter().collect();
                    stack.push((child, children, 0));
                }
                None => {
                    stack.pop();
                    self.dom_post_order_traversal.push(bb);
                }
            }
        }
    }

    fn compute_dominance_frontier(&mut self, bb: BlockId) {
        let mut frontier = BitSet::new(self.blocks.len());
        for succ in self.block(bb).successor_ids() {
            self.check_for_dominance_frontier(bb, succ, &mut frontier);
        }
        for dominated in self.block(bb).i_dominated.iter() {
            for df_up in self.blocks[dominated].dom_frontier.iter() {
                self.check_for_dominance_frontier(bb, BlockId(df_up as u32), &mut frontier);
            }
        }
        self.block_mut(bb).dom_frontier = frontier;
    }

    fn check_for_dominance_frontier(&self, dom: BlockId, succ: BlockId, frontier: &mut BitSet) {
        let succ_bb = self.block(succ);
        if succ_bb.i_dom != Some(dom)
            && succ_bb.block_type == BlockType::DalvikByteCode
            && !succ_bb.is_hidden()
        {
            frontier.insert(succ.index());
        }
    }

    /// Finds back edges (edges to a dominator), marks the method as having
    /// a loop and sets each block's nesting depth to the number of natural
    /// loops containing it.
    fn compute_loop_info(&mut self) {
        let num_blocks = self.blocks.len();
        let mut loops: Vec<(BlockId, BitSet)> = Vec::new();
        for &bb in &self.dfs_order {
            for succ in self.block(bb).successor_ids() {
                if !self.block(bb).dominators.contains(succ.index()) {
                    continue;
                }
                let body = match loops.iter().position(|(header, _)| *header == succ) {
                    Some(pos) => pos,
                    None => {
                        let mut body = BitSet::new(num_blocks);
                        body.insert(succ.index());
                        loops.push((succ, body));
                        loops.len() - 1
                    }
                };
                let body = &mut loops[body].1;
                let mut work = vec![bb];
                while let Some(node) = work.pop() {
                    if body.insert(node.index()) {
                        work.extend(self.block(node).predecessors.iter().copied());
                    }
                }
            }
        }

        for bb in &mut self.blocks {
            bb.nesting_depth = 0;
        }
        for (_, body) in &loops {
            for idx in body.iter() {
                self.blocks[idx].nesting_depth += 1;
            }
        }
        if loops.is_empty() {
            self.attributes.remove(MethodAttributes::HAS_LOOP);
        } else {
            self.attributes.insert(MethodAttributes::HAS_LOOP);
        }
    }

    /// Whether `a` dominates `b`. Needs up-to-date dominance.
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        self.block(b).dominators.contains(a.index())
    }

    pub fn i_dom(&self, block: BlockId) -> Option<BlockId> {
        self.block(block).i_dom
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompilerOptions;

    /// entry -> a; a -> b (fall), a -> c (taken); b -> d; c -> d; d -> a
    /// (taken, loop), d -> exit (fall); plus an unreachable block.
    fn loop_graph() -> (MirGraph, [BlockId; 5]) {
        let mut graph = MirGraph::new(&CompilerOptions::default());
        graph.create_sentinels();
        let ids: Vec<BlockId> = (0..5)
            .map(|i| {
                let bb = graph.new_block(BlockType::DalvikByteCode);
                graph.block_mut(bb).start_offset = i * 2;
                bb
            })
            .collect();
        let [a, b, c, d, dead] = [ids[0], ids[1], ids[2], ids[3], ids[4]];
        graph.link_fall_through(graph.entry_block(), a);
        graph.link_fall_through(a, b);
        graph.link_taken(a, c);
        graph.link_fall_through(b, d);
        graph.link_fall_through(c, d);
        graph.link_taken(d, a);
        graph.link_fall_through(d, graph.exit_block());
        graph.link_fall_through(dead, d);
        (graph, [a, b, c, d, dead])
    }

    #[test]
    fn test_unreachable_blocks_are_hidden() {
        let (mut graph, [_, _, _, d, dead]) = loop_graph();
        graph.compute_dfs_orders();
        assert_eq!(graph.num_reachable_blocks(), 6);
        assert!(graph.block(dead).is_hidden());
        assert!(!graph.block(d).predecessors.contains(&dead));
        assert_eq!(graph.dfs_order()[0], graph.entry_block());
        assert_eq!(graph.dfs_post_order().last(), Some(&graph.entry_block()));
    }

    #[test]
    fn test_idoms_frontiers_and_loops() {
        let (mut graph, [a, b, c, d, _]) = loop_graph();
        graph.compute_dominance().unwrap();
        let entry = graph.entry_block();
        assert_eq!(graph.i_dom(entry), None);
        assert_eq!(graph.i_dom(a), Some(entry));
        assert_eq!(graph.i_dom(b), Some(a));
        assert_eq!(graph.i_dom(c), Some(a));
        assert_eq!(graph.i_dom(d), Some(a));
        assert_eq!(graph.i_dom(graph.exit_block()), Some(d));

        assert!(graph.block(b).dom_frontier.contains(d.index()));
        assert!(graph.block(c).dom_frontier.contains(d.index()));
        assert!(graph.block(d).dom_frontier.contains(a.index()));
        assert!(graph.block(a).dom_frontier.contains(a.index()));

        assert!(graph.attributes().contains(MethodAttributes::HAS_LOOP));
        assert_eq!(graph.block(b).nesting_depth, 1);
        assert_eq!(graph.block(entry).nesting_depth, 0);
        assert_eq!(graph.dom_post_order().last(), Some(&entry));
    }

    #[test]
    fn test_recomputation_is_idempotent() {
        let (mut graph, _) = loop_graph();
        graph.compute_dominance().unwrap();
        let snapshot = |graph: &MirGraph| -> Vec<_> {
            graph
                .blocks()
                .iter()
                .map(|bb| (bb.i_dom, bb.dominators.clone(), bb.dom_frontier.clone()))
                .collect()
        };
        let first = snapshot(&graph);
        graph.compute_dominance().unwrap();
        assert_eq!(first, snapshot(&graph));
    }

    #[test]
    fn test_dom_post_order_visits_children_first() {
        let (mut graph, [a, b, c, d, dead]) = loop_graph();
        graph.compute_dominance().unwrap();
        let order = graph.dom_post_order().to_vec();
        assert_eq!(order.len(), graph.num_reachable_blocks());
        assert!(!order.contains(&dead));
        let position = |id: BlockId| order.iter().position(|bb| *bb == id).unwrap();
        for child in [b, c, d] {
            assert!(position(child) < position(a));
        }
        for bb in &order {
            assert_eq!(order.iter().filter(|other| *other == bb).count(), 1);
            for child in graph.block(*bb).i_dominated.iter() {
                assert!(position(BlockId(child as u32)) < position(*bb));
            }
        }
    }

    #[test]
    fn test_hidden_blocks_have_no_dominators() {
        let (mut graph, [_, _, _, d, dead]) = loop_graph();
        graph.compute_dominance().unwrap();
        assert!(graph.block(dead).is_hidden());
        assert_eq!(graph.block(dead).dominators.iter().count(), 0);
        assert!(!graph.dominates(d, dead));
        assert!(graph.dominates(graph.entry_block(), d));
    }
}
