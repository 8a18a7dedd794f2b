use crate::cfg::{BlockId, MethodAttributes, MirGraph, MirMeta, OptimizationFlags, SsaRepresentation};
use crate::dex::{DataFlowAttributes, InstructionFlags};
use crate::error::{Error, Result};

impl MirGraph {
    /// Renames every vreg reference to an SSA name by a pre-order walk of the
    /// dominator tree. Each child starts from its dominator's exit state, so
    /// a sibling never sees names defined in another subtree.
    pub(crate) fn rename_ssa(&mut self) {
        let mut stack: Vec<(BlockId, Vec<i32>)> =
            vec![(self.entry_block(), self.vreg_to_ssa_map.clone())];
        while let Some((bb, incoming)) = stack.pop() {
            self.vreg_to_ssa_map = incoming;
            self.do_ssa_conversion(bb);
            let children: Vec<BlockId> = self
                .block(bb)
                .i_dominated
                .iter()
                .map(|idx| BlockId(idx as u32))
                .collect();
            for child in children.into_iter().rev() {
                stack.push((child, self.vreg_to_ssa_map.clone()));
            }
        }
    }

    /// Builds the SSA operands of every instruction in `block` and records
    /// the reaching names at block entry and exit.
    fn do_ssa_conversion(&mut self, block: BlockId) {
        if self.block(block).data_flow_info.is_none() {
            return;
        }
        let entry_map = self.vreg_to_ssa_map.clone();
        if let Some(info) = self.block_mut(block).data_flow_info.as_mut() {
            info.vreg_to_ssa_map = entry_map;
        }

        for id in self.mir_ids(block) {
            type Df = DataFlowAttributes;
            let (opcode, attrs, insn, inlined) = {
                let mir = self.mir(id);
                (
                    mir.opcode,
                    mir.dataflow_attributes(),
                    mir.dalvik_insn.clone(),
                    mir.optimization_flags.contains(OptimizationFlags::INLINED),
                )
            };
            if !opcode.is_pseudo() && opcode.flags().contains(InstructionFlags::INVOKE) && !inlined
            {
                self.attributes.remove(MethodAttributes::IS_LEAF);
            }

            let mut rep = SsaRepresentation::default();
            if attrs.intersects(Df::FORMAT_35C | Df::FORMAT_3RC) {
                for v_reg in insn.invoke_args() {
                    rep.uses.push(self.vreg_to_ssa_map[v_reg as usize]);
                    rep.fp_use.push(false);
                }
                self.mir_mut(id).ssa_rep = Some(rep);
                continue;
            }

            let slots = [
                (Df::UA, Df::A_WIDE, Df::FP_A, insn.v_a),
                (Df::UB, Df::B_WIDE, Df::FP_B, insn.v_b),
                (Df::UC, Df::C_WIDE, Df::FP_C, insn.v_c),
            ];
            for (used, wide, fp, v_reg) in slots {
                if !attrs.contains(used) {
                    continue;
                }
                let is_fp = attrs.contains(fp);
                rep.uses.push(self.vreg_to_ssa_map[v_reg as usize]);
                rep.fp_use.push(is_fp);
                if attrs.contains(wide) {
                    rep.uses.push(self.vreg_to_ssa_map[v_reg as usize + 1]);
                    rep.fp_use.push(is_fp);
                }
            }
            if attrs.contains(Df::DA) {
                let is_fp = attrs.contains(Df::FP_A);
                rep.defs.push(self.handle_ssa_def(insn.v_a));
                rep.fp_def.push(is_fp);
                if attrs.contains(Df::A_WIDE) {
                    rep.defs.push(self.handle_ssa_def(insn.v_a + 1));
                    rep.fp_def.push(is_fp);
                }
            }
            self.mir_mut(id).ssa_rep = Some(rep);
        }

        let exit_map = self.vreg_to_ssa_map.clone();
        if let Some(info) = self.block_mut(block).data_flow_info.as_mut() {
            info.vreg_to_ssa_map_exit = exit_map;
        }
    }

    fn handle_ssa_def(&mut self, v_reg: u32) -> i32 {
        let s_reg = self.add_new_sreg(v_reg as i32);
        self.vreg_to_ssa_map[v_reg as usize] = s_reg;
        s_reg
    }

    /// Gives each phi one operand per predecessor edge, taken from that
    /// predecessor's exit map, and records the predecessor alongside.
    pub(crate) fn insert_phi_node_operands(&mut self) -> Result<()> {
        for idx in 0..self.blocks.len() {
            let bb = BlockId(idx as u32);
            if self.block(bb).is_hidden() || self.block(bb).data_flow_info.is_none() {
                continue;
            }
            let preds = self.block(bb).predecessors.clone();
            for id in self.mir_ids(bb) {
                if !self.mir(id).is_phi() {
                    break;
                }
                let def = self.mir(id).defs().first().copied().ok_or_else(|| {
                    Error::invalid_ssa(format!("phi in block {} has no definition", bb))
                })?;
                let v_reg = self.sreg_to_vreg(def) as usize;
                let mut uses = smallvec::SmallVec::with_capacity(preds.len());
                for &pred in &preds {
                    let name = self
                        .block(pred)
                        .data_flow_info
                        .as_ref()
                        .and_then(|info| info.vreg_to_ssa_map_exit.get(v_reg).copied())
                        .ok_or_else(|| {
                            Error::invalid_ssa(format!(
                                "predecessor {} of block {} has no exit map",
                                pred, bb
                            ))
                        })?;
                    uses.push(name);
                }
                let mir = self.mir_mut(id);
                if let Some(rep) = mir.ssa_rep.as_mut() {
                    rep.fp_use = smallvec::smallvec![false; uses.len()];
                    rep.uses = uses;
                }
                mir.meta = MirMeta::PhiIncoming(preds.clone());
            }
        }
        Ok(())
    }
}
