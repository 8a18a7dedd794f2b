use crate::cfg::{BasicBlockDataFlow, BlockId, BlockType, DataflowIterator, IterationOrder, MirGraph};
use crate::dex::DataFlowAttributes;
use crate::utils::BitSet;

impl MirGraph {
    /// Gives every visible entry, exit and code block a fresh dataflow
    /// record sized for the method's vregs.
    pub(crate) fn allocate_dataflow_info(&mut self) {
        let num_vregs = self.num_vregs();
        for bb in &mut self.blocks {
            bb.data_flow_info = match bb.block_type {
                BlockType::Entry | BlockType::Exit | BlockType::DalvikByteCode
                    if !bb.is_hidden() =>
                {
                    Some(BasicBlockDataFlow::new(num_vregs))
                }
                _ => None,
            };
        }
    }

    /// Fills `use_v`, `def_v` and the local part of `live_in_v` with one
    /// scan of the block. Uses are recorded before the defs of the same
    /// instruction.
    pub(crate) fn find_local_live_in(&mut self, block: BlockId) {
        let Some(mut info) = self.block_mut(block).data_flow_info.take() else {
            return;
        };
        let handle_use = |info: &mut BasicBlockDataFlow, v_reg: u32| {
            let v_reg = v_reg as usize;
            info.use_v.insert(v_reg);
            if !info.def_v.contains(v_reg) {
                info.live_in_v.insert(v_reg);
            }
        };

        for (_, mir) in self.block_mirs(block) {
            type Df = DataFlowAttributes;
            let attrs = mir.dataflow_attributes();
            let insn = &mir.dalvik_insn;
            if attrs.contains(Df::UA) {
                handle_use(&mut info, insn.v_a);
                if attrs.contains(Df::A_WIDE) {
                    handle_use(&mut info, insn.v_a + 1);
                }
            }
            if attrs.contains(Df::UB) {
                handle_use(&mut info, insn.v_b);
                if attrs.contains(Df::B_WIDE) {
                    handle_use(&mut info, insn.v_b + 1);
                }
            }
            if attrs.contains(Df::UC) {
                handle_use(&mut info, insn.v_c);
                if attrs.contains(Df::C_WIDE) {
                    handle_use(&mut info, insn.v_c + 1);
                }
            }
            if attrs.intersects(Df::FORMAT_35C | Df::FORMAT_3RC) {
                for v_reg in insn.invoke_args() {
                    handle_use(&mut info, v_reg);
                }
            }
            if attrs.contains(Df::DA) {
                info.def_v.insert(insn.v_a as usize);
                if attrs.contains(Df::A_WIDE) {
                    info.def_v.insert(insn.v_a as usize + 1);
                }
            }
        }
        self.block_mut(block).data_flow_info = Some(info);
    }

    /// Local liveness for every block, then one row per vreg listing the
    /// blocks that define it. Incoming arguments are defined by the entry.
    pub(crate) fn compute_def_block_matrix(&mut self) {
        let num_vregs = self.num_vregs();
        let num_blocks = self.num_blocks();
        self.def_block_matrix = vec![BitSet::new(num_blocks); num_vregs];

        let mut iter = DataflowIterator::new(self, IterationOrder::AllNodes);
        while let Some(bb) = iter.next(false) {
            self.find_local_live_in(bb);
        }
        for bb in &self.blocks {
            if let Some(info) = &bb.data_flow_info {
                for v_reg in info.def_v.iter() {
                    self.def_block_matrix[v_reg].insert(bb.id.index());
                }
            }
        }
        let entry = self.entry_block().index();
        for v_reg in self.first_in_vreg()..num_vregs {
            self.def_block_matrix[v_reg].insert(entry);
        }
    }

    /// `live_in(B) |= live_in(S) - def(B)` for every successor `S`.
    /// Returns whether the block's live-in set grew.
    pub(crate) fn compute_block_live_ins(&mut self, block: BlockId) -> bool {
        let Some(info) = self.block(block).data_flow_info.as_ref() else {
            return false;
        };
        let mut live_in = info.live_in_v.clone();
        for succ in self.block(block).successor_ids() {
            if let Some(succ_info) = self.block(succ).data_flow_info.as_ref() {
                live_in.union_with_difference(&succ_info.live_in_v, &info.def_v);
            }
        }
        if live_in == info.live_in_v {
            return false;
        }
        if let Some(info) = self.block_mut(block).data_flow_info.as_mut() {
            info.live_in_v = live_in;
        }
        true
    }

    /// Iterates live-in sets to a fixed point over post-order.
    pub(crate) fn compute_live_ins(&mut self) {
        let mut iter = DataflowIterator::new(self, IterationOrder::RepeatingPostOrder);
        let mut change = false;
        while let Some(bb) = iter.next(change) {
            change = self.compute_block_live_ins(bb);
        }
    }

    /// Live-in vregs of `block`, if it carries dataflow information.
    pub fn live_in(&self, block: BlockId) -> Option<&BitSet> {
        self.block(block)
            .data_flow_info
            .as_ref()
            .map(|info| &info.live_in_v)
    }
}
