use crate::cfg::{BlockId, MirGraph};
use crate::error::{Error, Result};
use std::collections::HashMap;

impl MirGraph {
    /// Checks the SSA invariants: one definition per name, one phi operand
    /// per predecessor, and every use dominated by its definition. Phi
    /// operands count as uses at the end of the matching predecessor.
    pub fn verify_dataflow(&self) -> Result<()> {
        if !self.domination_up_to_date {
            return Err(Error::invalid_ssa("dominance information is stale"));
        }
        self.verify_pred_info()?;

        // name -> (block, position in block)
        let mut def_sites: HashMap<i32, (BlockId, usize)> = HashMap::new();
        for bb in self.blocks.iter().filter(|bb| !bb.is_hidden()) {
            for (pos, (_, mir)) in self.block_mirs(bb.id).enumerate() {
                for &def in mir.defs() {
                    if def_sites.insert(def, (bb.id, pos)).is_some() {
                        return Err(Error::invalid_ssa(format!(
                            "{} is defined more than once",
                            self.get_ssa_name(def)
                        )));
                    }
                }
            }
        }

        for bb in self.blocks.iter().filter(|bb| !bb.is_hidden()) {
            for (pos, (_, mir)) in self.block_mirs(bb.id).enumerate() {
                if mir.is_phi() {
                    let incoming = mir.phi_incoming();
                    if mir.uses().len() != bb.predecessors.len() || incoming != bb.predecessors {
                        return Err(Error::invalid_ssa(format!(
                            "phi for v{} in block {} has {} operands for {} predecessors",
                            mir.dalvik_insn.v_a,
                            bb.id,
                            mir.uses().len(),
                            bb.predecessors.len()
                        )));
                    }
                    for (&name, &pred) in mir.uses().iter().zip(incoming) {
                        if let Some(&(def_block, _)) = def_sites.get(&name) {
                            if !self.dominates(def_block, pred) {
                                return Err(self.dominance_violation(name, bb.id));
                            }
                        }
                    }
                    continue;
                }
                for &name in mir.uses() {
                    match def_sites.get(&name) {
                        Some(&(def_block, def_pos)) if def_block == bb.id => {
                            if def_pos >= pos {
                                return Err(self.dominance_violation(name, bb.id));
                            }
                        }
                        Some(&(def_block, _)) => {
                            if !self.dominates(def_block, bb.id) {
                                return Err(self.dominance_violation(name, bb.id));
                            }
                        }
                        // Generation-0 names and the method pointer are
                        // defined on entry.
                        None => {}
                    }
                }
            }
        }
        Ok(())
    }

    fn dominance_violation(&self, name: i32, block: BlockId) -> Error {
        Error::invalid_ssa(format!(
            "use of {} in block {} is not dominated by its definition",
            self.get_ssa_name(name),
            block
        ))
    }
}
