//! Array bounds-check elimination
//!
//! A fact is an `(array, index)` pair of SSA names already proven in
//! bounds. Facts come from a bounds check that was performed, or from a
//! constant index into an array allocated with a constant length. Block
//! entry facts are the intersection over predecessors, as for null checks.

use crate::cfg::{BlockId, BlockType, MirGraph, MirOpcode, OptimizationFlags};
use crate::dex::{DataFlowAttributes, Opcode};
use std::collections::BTreeSet;

type RangeFacts = BTreeSet<(i32, i32)>;

impl MirGraph {
    fn range_check_entry_state(&self, block: BlockId) -> RangeFacts {
        let bb = self.block(block);
        if bb.block_type == BlockType::Entry || bb.is_catch_entry() {
            return RangeFacts::new();
        }
        let mut state: Option<RangeFacts> = None;
        for &pred in &bb.predecessors {
            let Some(ending) = self
                .block(pred)
                .data_flow_info
                .as_ref()
                .and_then(|info| info.ending_range_checks.as_ref())
            else {
                continue;
            };
            state = Some(match state {
                Some(state) => state.intersection(ending).copied().collect(),
                None => ending.clone(),
            });
        }
        state.unwrap_or_default()
    }

    /// Whether a constant `index` lies inside an array of known length.
    fn index_within_known_length(&self, array: i32, index: i32) -> bool {
        let Some(&length) = self.array_lengths.get(&array) else {
            return false;
        };
        self.constant_value(index)
            .is_some_and(|value| value >= 0 && value < length)
    }

    /// One block of the bounds-check pass. Returns whether the block's exit
    /// facts changed.
    pub(crate) fn eliminate_range_checks(&mut self, block: BlockId) -> bool {
        if self.block(block).data_flow_info.is_none() {
            return false;
        }
        let mut facts = self.range_check_entry_state(block);

        for id in self.mir_ids(block) {
            let mir = self.mir(id);
            let Some(rep) = mir.ssa_rep.as_ref() else {
                continue;
            };
            let attrs = mir.dataflow_attributes();

            if mir.opcode == MirOpcode::Dalvik(Opcode::NewArray) {
                if let (Some(&array), Some(&size)) = (rep.defs.first(), rep.uses.first()) {
                    if let Some(length) = self.constant_value(size) {
                        self.array_lengths.insert(array, length);
                    }
                }
                continue;
            }

            let Some(index_pos) = attrs.range_check_operand() else {
                continue;
            };
            let (Some(&array), Some(&index)) = (rep.uses.get(index_pos - 1), rep.uses.get(index_pos))
            else {
                continue;
            };
            let proven =
                facts.contains(&(array, index)) || self.index_within_known_length(array, index);
            let flags = &mut self.mir_mut(id).optimization_flags;
            if proven {
                flags.insert(OptimizationFlags::IGNORE_RANGE_CHECK);
            } else {
                flags.remove(OptimizationFlags::IGNORE_RANGE_CHECK);
            }
            facts.insert((array, index));
        }

        let Some(info) = self.block_mut(block).data_flow_info.as_mut() else {
            return false;
        };
        if info.ending_range_checks.as_ref() == Some(&facts) {
            return false;
        }
        info.ending_range_checks = Some(facts);
        true
    }
}

#[cfg(test)]
mod tests {
    use crate::cfg::builder::build;
    use crate::cfg::{MirGraph, MirOpcode, OptimizationFlags};
    use crate::config::CompilerOptions;
    use crate::dex::{AccessFlags, DecodedInstruction, MethodAssembler, MethodUnit, Opcode};

    fn flags_of(graph: &MirGraph, opcode: Opcode) -> Vec<OptimizationFlags> {
        graph
            .blocks()
            .iter()
            .filter(|bb| !bb.is_hidden())
            .flat_map(|bb| graph.mir_ids(bb.id))
            .map(|id| graph.mir(id))
            .filter(|mir| mir.opcode == MirOpcode::Dalvik(opcode))
            .map(|mir| mir.optimization_flags)
            .collect()
    }

    #[test]
    fn test_repeated_and_constant_indices() {
        // int[] a = new int[4]; a[1] = i; return a[i] + a[i];
        let mut asm = MethodAssembler::new("int T.f(int)", "II", 5, 1);
        asm.push(DecodedInstruction::literal(Opcode::Const4, 0, 4));
        asm.push(DecodedInstruction::new(Opcode::NewArray, 1, 0, 0));
        asm.push(DecodedInstruction::literal(Opcode::Const4, 2, 1));
        asm.push(DecodedInstruction::new(Opcode::Aput, 4, 1, 2));
        asm.push(DecodedInstruction::new(Opcode::Aget, 3, 1, 4));
        asm.push(DecodedInstruction::new(Opcode::Aget, 0, 1, 4));
        asm.push(DecodedInstruction::new(Opcode::AddInt2addr, 0, 3, 0));
        asm.push(DecodedInstruction::unary(Opcode::Return, 0));
        let unit = MethodUnit::from_body(asm.finish(), AccessFlags::STATIC);
        let mut graph = build(&unit, &CompilerOptions::default()).unwrap();
        graph.build_ssa().unwrap();
        graph.run_type_and_check_elimination().unwrap();

        let aput = flags_of(&graph, Opcode::Aput);
        assert!(aput[0].contains(OptimizationFlags::IGNORE_RANGE_CHECK));
        let agets = flags_of(&graph, Opcode::Aget);
        assert!(!agets[0].contains(OptimizationFlags::IGNORE_RANGE_CHECK));
        assert!(agets[1].contains(OptimizationFlags::IGNORE_RANGE_CHECK));
        // The array came from an allocation, so no null checks remain.
        assert!(agets
            .iter()
            .chain(&aput)
            .all(|f| f.contains(OptimizationFlags::IGNORE_NULL_CHECK)));
    }
}
