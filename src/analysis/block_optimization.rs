//! Block-level clean-ups run after check elimination
//!
//! - use counting, raw and scaled by loop depth
//! - block combining: a `Check` whose checks were all eliminated loses its
//!   exception edges and merges with its work half; plain single-successor
//!   chains merge too
//! - compare-and-branch fusing
//! - extended basic block discovery
//! - branch inversion so a private taken target becomes the fall-through

use crate::cfg::{
    BasicBlockDataFlow, BlockFlags, BlockId, BlockType, ConditionCode, MirGraph, MirId, MirMeta,
    MirOpcode, OptimizationFlags,
};
use crate::dex::{DataFlowAttributes, Format, Opcode};

impl MirGraph {
    /// Counts the uses of every SSA name. Each use inside a loop weighs
    /// `1 << nesting_depth`; instructions reading the method pointer count
    /// as a use of it.
    pub fn count_uses(&mut self) {
        let num_ssa = self.num_ssa_regs();
        let mut raw = vec![0u32; num_ssa];
        let mut weighted = vec![0u32; num_ssa];
        let method_sreg = self.method_sreg;

        for bb in self.blocks.iter() {
            if bb.is_hidden() || bb.block_type != BlockType::DalvikByteCode {
                continue;
            }
            let weight = self.use_weight(bb.id);
            for (_, mir) in self.block_mirs(bb.id) {
                let Some(rep) = mir.ssa_rep.as_ref() else {
                    continue;
                };
                let implicit = mir
                    .dataflow_attributes()
                    .contains(DataFlowAttributes::UMS)
                    .then_some(method_sreg)
                    .flatten();
                for name in rep.uses.iter().copied().chain(implicit) {
                    if let Ok(idx) = usize::try_from(name) {
                        if idx < num_ssa {
                            raw[idx] += 1;
                            weighted[idx] = weighted[idx].saturating_add(weight);
                        }
                    }
                }
            }
        }
        self.raw_use_counts = raw;
        self.use_counts = weighted;
    }

    /// Whether the only ways `work` can throw are checks that were proven
    /// unnecessary.
    fn checks_all_eliminated(&self, work: MirId) -> bool {
        type Df = DataFlowAttributes;
        let mir = self.mir(work);
        let MirOpcode::Dalvik(op) = mir.opcode else {
            return false;
        };
        let only_checks = matches!(
            op,
            Opcode::Aget
                | Opcode::AgetWide
                | Opcode::AgetObject
                | Opcode::AgetBoolean
                | Opcode::AgetByte
                | Opcode::AgetChar
                | Opcode::AgetShort
                | Opcode::Aput
                | Opcode::AputWide
                | Opcode::AputBoolean
                | Opcode::AputByte
                | Opcode::AputChar
                | Opcode::AputShort
                | Opcode::ArrayLength
        );
        let attrs = mir.dataflow_attributes();
        let flags = mir.optimization_flags;
        only_checks
            && (!attrs.intersects(Df::HAS_NULL_CHKS)
                || flags.contains(OptimizationFlags::IGNORE_NULL_CHECK))
            && (!attrs.intersects(Df::HAS_RANGE_CHKS)
                || flags.contains(OptimizationFlags::IGNORE_RANGE_CHECK))
    }

    /// Removes the exception edges of `block`: its handler list and any
    /// synthetic exception block on the taken edge.
    fn drop_exception_edges(&mut self, block: BlockId) {
        let handlers: Vec<BlockId> = self
            .block(block)
            .successors
            .blocks
            .iter()
            .map(|s| s.block)
            .collect();
        for handler in handlers {
            self.block_mut(handler).erase_predecessor(block);
            self.erase_phi_operands(handler, block);
        }
        self.block_mut(block).successors.clear();

        if let Some(taken) = self.block(block).taken {
            if self.block(taken).block_type == BlockType::ExceptionHandling {
                self.block_mut(block).taken = None;
                let eh = self.block_mut(taken);
                eh.predecessors.clear();
                eh.block_type = BlockType::Dead;
                eh.flags.insert(BlockFlags::HIDDEN);
            }
        }
    }

    /// Moves everything of `next` onto the end of `block` and retires
    /// `next` as a hidden dead block.
    fn absorb_fall_through(&mut self, block: BlockId, next: BlockId) {
        for id in self.mir_ids(next) {
            self.link_mir_at_end(block, id);
        }

        let (fall_through, taken, successors, carried_flags, info) = {
            let nb = self.block_mut(next);
            let carried = nb.flags
                & (BlockFlags::TERMINATED_BY_RETURN
                    | BlockFlags::CONDITIONAL_BRANCH
                    | BlockFlags::EXPLICIT_THROW);
            (
                nb.fall_through.take(),
                nb.taken.take(),
                std::mem::take(&mut nb.successors),
                carried,
                nb.data_flow_info.take(),
            )
        };
        let children: Vec<BlockId> = fall_through
            .into_iter()
            .chain(taken)
            .chain(successors.blocks.iter().map(|s| s.block))
            .collect();

        {
            let bb = self.block_mut(block);
            bb.fall_through = fall_through;
            bb.taken = taken;
            bb.successors = successors;
            bb.flags.remove(
                BlockFlags::TERMINATED_BY_RETURN
                    | BlockFlags::CONDITIONAL_BRANCH
                    | BlockFlags::EXPLICIT_THROW,
            );
            bb.flags.insert(carried_flags);
            if let (Some(own), Some(absorbed)) = (bb.data_flow_info.as_mut(), info) {
                merge_exit_state(own, absorbed);
            }
        }

        for child in children {
            self.block_mut(child).replace_predecessor(next, block);
            for id in self.mir_ids(child) {
                let mir = self.mir_mut(id);
                if !mir.is_phi() {
                    break;
                }
                if let MirMeta::PhiIncoming(preds) = &mut mir.meta {
                    preds.iter_mut().filter(|p| **p == next).for_each(|p| *p = block);
                }
            }
        }
        for target in self.dex_pc_to_block_map.values_mut() {
            if *target == next {
                *target = block;
            }
        }

        let nb = self.block_mut(next);
        nb.first_mir = None;
        nb.last_mir = None;
        nb.predecessors.clear();
        nb.block_type = BlockType::Dead;
        nb.flags.insert(BlockFlags::HIDDEN);
        self.dfs_orders_up_to_date = false;
        self.domination_up_to_date = false;
    }

    /// Merges blocks where nothing separates them any more. Returns the
    /// number of blocks absorbed.
    pub fn combine_blocks(&mut self) -> usize {
        let mut merged = 0;
        for idx in 0..self.blocks.len() {
            let block = BlockId(idx as u32);
            while let Some(next) = self.combinable_successor(block) {
                if let Some(check) = self.block(block).last_mir {
                    if self.mir(check).opcode == MirOpcode::Check {
                        self.drop_exception_edges(block);
                        if self.remove_mir(block, check).is_err() {
                            break;
                        }
                    }
                }
                self.absorb_fall_through(block, next);
                merged += 1;
            }
        }
        if merged > 0 {
            log::debug!("{}: combined {} blocks", self.method_name(), merged);
        }
        merged
    }

    fn combinable_successor(&self, block: BlockId) -> Option<BlockId> {
        let bb = self.block(block);
        if bb.is_hidden() || bb.block_type != BlockType::DalvikByteCode {
            return None;
        }
        let next = bb.fall_through?;
        let nb = self.block(next);
        if next == block
            || nb.is_hidden()
            || nb.block_type != BlockType::DalvikByteCode
            || nb.is_catch_entry()
            || nb.predecessors != [block]
        {
            return None;
        }
        let ends_in_check = bb
            .last_mir
            .filter(|last| self.mir(*last).opcode == MirOpcode::Check);
        match ends_in_check {
            Some(check) => {
                let work = self.mir(check).throw_insn()?;
                (nb.first_mir == Some(work) && self.checks_all_eliminated(work)).then_some(next)
            }
            None => (bb.taken.is_none() && !bb.successors.is_used()).then_some(next),
        }
    }

    /// Replaces `cmp*` followed by an `if-*z` on its result with one fused
    /// compare-and-branch, when the comparison result has no other use.
    /// Needs current use counts.
    pub fn fuse_branches(&mut self, block: BlockId) -> usize {
        let mut fused = 0;
        for id in self.mir_ids(block) {
            let fused_op = match self.mir(id).opcode {
                MirOpcode::Dalvik(Opcode::CmplFloat) => MirOpcode::FusedCmplFloat,
                MirOpcode::Dalvik(Opcode::CmpgFloat) => MirOpcode::FusedCmpgFloat,
                MirOpcode::Dalvik(Opcode::CmplDouble) => MirOpcode::FusedCmplDouble,
                MirOpcode::Dalvik(Opcode::CmpgDouble) => MirOpcode::FusedCmpgDouble,
                MirOpcode::Dalvik(Opcode::CmpLong) => MirOpcode::FusedCmpLong,
                _ => continue,
            };
            let Some(branch) = self.mir(id).next else {
                continue;
            };
            let MirOpcode::Dalvik(branch_op) = self.mir(branch).opcode else {
                continue;
            };
            let Some(cc) = ConditionCode::for_if_z(branch_op) else {
                continue;
            };
            let Some(result) = self.mir(id).defs().first().copied() else {
                continue;
            };
            if self.mir(branch).uses().first() != Some(&result) || self.raw_use_count(result) != 1 {
                continue;
            }

            let Some(cmp_rep) = self.mir_mut(id).ssa_rep.take() else {
                continue;
            };
            {
                let cmp = self.mir_mut(id);
                cmp.opcode = MirOpcode::Nop;
                cmp.ssa_rep = Some(Default::default());
            }
            let fused_mir = self.mir_mut(branch);
            fused_mir.opcode = fused_op;
            fused_mir.meta = MirMeta::Condition(cc);
            if let Some(rep) = fused_mir.ssa_rep.as_mut() {
                rep.uses = cmp_rep.uses;
                rep.fp_use = cmp_rep.fp_use;
                rep.defs.clear();
                rep.fp_def.clear();
            }
            fused += 1;
        }
        fused
    }

    /// Groups blocks into extended basic blocks: a head followed by the
    /// chain of single-predecessor blocks it reaches by fall-through or an
    /// unconditional branch. Members of a chain containing a return are
    /// marked `DOMINATES_RETURN`.
    pub fn build_extended_bb_list(&mut self) {
        if !self.dfs_orders_up_to_date {
            self.compute_dfs_orders();
        }
        self.clear_all_visited_flags();
        self.extended_basic_blocks.clear();

        for block in self.dfs_order.clone() {
            let bb = self.block(block);
            if bb.visited() {
                continue;
            }
            if !matches!(
                bb.block_type,
                BlockType::Entry | BlockType::DalvikByteCode | BlockType::Exit
            ) {
                self.block_mut(block).flags.insert(BlockFlags::VISITED);
                continue;
            }
            self.extended_basic_blocks.push(block);
            let mut members = Vec::new();
            let mut cur = Some(block);
            let mut terminated_by_return = false;
            while let Some(member) = cur {
                let bb = self.block_mut(member);
                bb.flags.insert(BlockFlags::VISITED);
                terminated_by_return |= bb.flags.contains(BlockFlags::TERMINATED_BY_RETURN);
                members.push(member);
                cur = self.next_dominated_block(member);
            }
            if terminated_by_return {
                for member in members {
                    self.block_mut(member).flags.insert(BlockFlags::DOMINATES_RETURN);
                }
            }
        }
    }

    fn next_dominated_block(&self, block: BlockId) -> Option<BlockId> {
        let bb = self.block(block);
        if bb.block_type == BlockType::Dead {
            return None;
        }
        let next = match (bb.taken, bb.fall_through) {
            (Some(taken), None)
                if matches!(
                    self.block(taken).block_type,
                    BlockType::DalvikByteCode | BlockType::Exit
                ) =>
            {
                taken
            }
            (None, Some(fall)) => fall,
            _ => return None,
        };
        let nb = self.block(next);
        (nb.predecessors.len() == 1 && !nb.visited()).then_some(next)
    }

    /// Inverts conditional branches whose taken target has no other
    /// predecessor while the fall-through is a join, so the private block
    /// becomes the fall-through. Returns the number of branches inverted.
    pub fn layout_blocks(&mut self) -> usize {
        let mut inverted = 0;
        for idx in 0..self.blocks.len() {
            let block = BlockId(idx as u32);
            let bb = self.block(block);
            if bb.is_hidden() || !bb.flags.contains(BlockFlags::CONDITIONAL_BRANCH) {
                continue;
            }
            let (Some(taken), Some(fall), Some(last)) = (bb.taken, bb.fall_through, bb.last_mir) else {
                continue;
            };
            let tb = self.block(taken);
            let fb = self.block(fall);
            if taken == fall
                || taken == block
                || tb.block_type != BlockType::DalvikByteCode
                || tb.predecessors.len() != 1
                || fb.predecessors.len() < 2
                || tb.start_offset < bb.start_offset
            {
                continue;
            }
            let fall_offset = fb.start_offset;
            if self.invert_branch(last, fall_offset) {
                let bb = self.block_mut(block);
                bb.taken = Some(fall);
                bb.fall_through = Some(taken);
                inverted += 1;
            }
        }
        if inverted > 0 {
            self.dfs_orders_up_to_date = false;
            self.domination_up_to_date = false;
            log::debug!("{}: inverted {} branches", self.method_name(), inverted);
        }
        inverted
    }

    /// Negates the condition of `branch` and retargets it at `target`.
    fn invert_branch(&mut self, branch: MirId, target: u32) -> bool {
        let mir = self.mir_mut(branch);
        let Some(negated) = mir.dalvik_insn.opcode.negated_branch() else {
            return false;
        };
        match (&mut mir.opcode, &mut mir.meta) {
            (MirOpcode::Dalvik(op), _) => *op = negated,
            (_, MirMeta::Condition(cc)) => *cc = cc.negate(),
            _ => return false,
        }
        mir.dalvik_insn.opcode = negated;
        let rel = (target as i64 - mir.offset as i64) as i32 as u32;
        match negated.format() {
            Format::K21t => mir.dalvik_insn.v_b = rel,
            Format::K22t => mir.dalvik_insn.v_c = rel,
            _ => return false,
        }
        true
    }
}

/// The merged block now exits where the absorbed one did.
fn merge_exit_state(own: &mut BasicBlockDataFlow, absorbed: BasicBlockDataFlow) {
    own.use_v.union_with(&absorbed.use_v);
    own.def_v.union_with(&absorbed.def_v);
    own.vreg_to_ssa_map_exit = absorbed.vreg_to_ssa_map_exit;
    own.ending_null_check_v = absorbed.ending_null_check_v;
    own.ending_range_checks = absorbed.ending_range_checks;
}
