//! Null-check elimination
//!
//! Each block ends with the set of SSA names known to be non-null on every
//! path reaching its exit. A block starts from the intersection of its
//! predecessors' exit sets; a check on a name already in the set is marked
//! `IGNORE_NULL_CHECK`.

use crate::cfg::{BlockId, BlockType, MirGraph, OptimizationFlags};
use crate::dex::DataFlowAttributes;
use crate::utils::BitSet;

impl MirGraph {
    /// Non-null names on entry to `block`. Predecessors not yet visited in
    /// this sweep do not constrain the result.
    fn null_check_entry_state(&self, block: BlockId) -> BitSet {
        let num_ssa = self.num_ssa_regs();
        let bb = self.block(block);
        if bb.block_type == BlockType::Entry || bb.is_catch_entry() {
            return BitSet::new(num_ssa);
        }
        let mut state: Option<BitSet> = None;
        for &pred in &bb.predecessors {
            let pred_bb = self.block(pred);
            if pred_bb.is_hidden() {
                continue;
            }
            let Some(ending) = pred_bb
                .data_flow_info
                .as_ref()
                .and_then(|info| info.ending_null_check_v.as_ref())
            else {
                continue;
            };
            match state.as_mut() {
                Some(state) => {
                    state.intersect_with(ending);
                }
                None => state = Some(ending.clone()),
            }
        }
        state.unwrap_or_else(|| BitSet::new(num_ssa))
    }

    /// Whether `name`, as it leaves `pred`, is known to be non-null.
    fn non_null_leaving(&self, pred: BlockId, name: i32) -> bool {
        match self
            .block(pred)
            .data_flow_info
            .as_ref()
            .and_then(|info| info.ending_null_check_v.as_ref())
        {
            Some(ending) => ending.contains(name as usize),
            // Unvisited: optimistic until the sweep reaches it.
            None => true,
        }
    }

    /// One block of the null-check pass. Returns whether the block's exit
    /// state changed.
    pub(crate) fn eliminate_null_checks(&mut self, block: BlockId) -> bool {
        type Df = DataFlowAttributes;
        if self.block(block).data_flow_info.is_none() {
            return false;
        }
        let mut non_null = self.null_check_entry_state(block);

        for id in self.mir_ids(block) {
            let mir = self.mir(id);
            let Some(rep) = mir.ssa_rep.as_ref() else {
                continue;
            };
            let attrs = mir.dataflow_attributes();
            let defs = rep.defs.clone();
            let uses = rep.uses.clone();

            if attrs.contains(Df::NON_NULL_DST) {
                if let Some(&def) = defs.first() {
                    non_null.insert(def as usize);
                }
            }

            if attrs.contains(Df::NON_NULL_RET) {
                if let Some(result) = self.find_move_result(block, id) {
                    if let Some(&def) = self.mir(result).defs().first() {
                        non_null.insert(def as usize);
                    }
                }
            }

            if attrs.contains(Df::NULL_TRANSFER_0) {
                if let (Some(&def), Some(&src)) = (defs.first(), uses.first()) {
                    if non_null.contains(src as usize) {
                        non_null.insert(def as usize);
                    }
                }
            }

            if attrs.contains(Df::NULL_TRANSFER_N) {
                if let Some(&def) = defs.first() {
                    let incoming = self.mir(id).phi_incoming().to_vec();
                    let all_non_null = !uses.is_empty()
                        && uses.len() == incoming.len()
                        && uses
                            .iter()
                            .zip(&incoming)
                            .all(|(&name, &pred)| self.non_null_leaving(pred, name));
                    if all_non_null {
                        non_null.insert(def as usize);
                    }
                }
            }

            if let Some(pos) = attrs.null_check_operand() {
                if let Some(&checked) = uses.get(pos) {
                    let redundant = non_null.contains(checked as usize);
                    let flags = &mut self.mir_mut(id).optimization_flags;
                    if redundant {
                        flags.insert(OptimizationFlags::IGNORE_NULL_CHECK);
                    } else {
                        flags.remove(OptimizationFlags::IGNORE_NULL_CHECK);
                        // Past the check the value cannot be null.
                        non_null.insert(checked as usize);
                    }
                }
            }
        }

        let Some(info) = self.block_mut(block).data_flow_info.as_mut() else {
            return false;
        };
        if info.ending_null_check_v.as_ref() == Some(&non_null) {
            return false;
        }
        info.ending_null_check_v = Some(non_null);
        true
    }
}
