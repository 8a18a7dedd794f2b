//! SSA construction over the MIR graph
//!
//! Conversion runs in the classic order: local liveness and the def-block
//! matrix, global live-ins, phi placement on the iterated dominance
//! frontier, then renaming along the dominator tree. Names are plain `i32`
//! indices into `ssa_base_vregs`/`ssa_subscripts`; the first `num_vregs`
//! names are the generation-0 values live on entry.

pub mod liveness;
pub mod phi_placement;
pub mod renaming;
pub mod types;
pub mod verify;

pub use types::*;

use crate::cfg::MirGraph;
use crate::config::DebugFlags;
use crate::error::Result;
use crate::utils::BitSet;

impl MirGraph {
    /// Puts the method into SSA form, recomputing dominance first if it is
    /// stale. Any earlier SSA state, phis included, is discarded.
    pub fn build_ssa(&mut self) -> Result<()> {
        if !self.dfs_orders_up_to_date || !self.domination_up_to_date {
            self.compute_dominance()?;
        }
        self.strip_phi_nodes();
        self.initialize_ssa_conversion();
        self.compute_def_block_matrix();
        self.compute_live_ins();
        self.insert_phi_nodes();
        self.clear_all_visited_flags();
        self.rename_ssa();
        self.insert_phi_node_operands()?;

        let num_ssa = self.num_ssa_regs();
        self.is_constant_v = BitSet::new(num_ssa);
        self.constant_values = vec![0; num_ssa];

        if self.debug.contains(DebugFlags::VERIFY_DATAFLOW) {
            self.verify_dataflow()?;
        }
        log::debug!(
            "{}: {} SSA names for {} vregs",
            self.method_name(),
            num_ssa,
            self.num_vregs()
        );
        Ok(())
    }

    /// Generation-0 names for every vreg plus the method pointer name, and
    /// fresh dataflow records on every block.
    fn initialize_ssa_conversion(&mut self) {
        let num_vregs = self.num_vregs();
        self.ssa_base_vregs = (0..num_vregs as i32).collect();
        self.ssa_subscripts = vec![0; num_vregs];
        self.vreg_to_ssa_map = (0..num_vregs as i32).collect();
        self.ssa_last_defs = vec![0; num_vregs];
        self.method_sreg = Some(self.add_new_sreg(SSA_METHOD_BASEREG));

        self.reg_location.clear();
        self.use_counts.clear();
        self.raw_use_counts.clear();
        self.array_lengths.clear();
        self.type_conflicts.clear();
        for mir in &mut self.mirs {
            mir.ssa_rep = None;
        }
        self.allocate_dataflow_info();
    }
}

#[cfg(test)]
mod tests {
    use crate::cfg::builder::build;
    use crate::cfg::{BlockType, MirGraph};
    use crate::config::CompilerOptions;
    use crate::dex::{AccessFlags, DecodedInstruction, MethodAssembler, MethodUnit, Opcode};

    /// `v0 = arg ? 1 : 2; return v0`
    fn diamond() -> MirGraph {
        let mut asm = MethodAssembler::new("int T.pick(int)", "II", 2, 1);
        let else_idx = 3;
        let join_idx = 4;
        asm.push_branch(DecodedInstruction::if_z(Opcode::IfEqz, 1, 0), else_idx);
        asm.push(DecodedInstruction::literal(Opcode::Const4, 0, 1));
        asm.push_branch(DecodedInstruction::goto(0), join_idx);
        asm.push(DecodedInstruction::literal(Opcode::Const4, 0, 2));
        asm.push(DecodedInstruction::unary(Opcode::Return, 0));
        let unit = MethodUnit::from_body(asm.finish(), AccessFlags::STATIC);
        let mut graph = build(&unit, &CompilerOptions::default()).unwrap();
        graph.build_ssa().unwrap();
        graph
    }

    fn phis(graph: &MirGraph) -> Vec<crate::cfg::MirId> {
        graph
            .blocks()
            .iter()
            .filter(|bb| bb.block_type == BlockType::DalvikByteCode && !bb.is_hidden())
            .flat_map(|bb| graph.mir_ids(bb.id))
            .filter(|id| graph.mir(*id).is_phi())
            .collect()
    }

    #[test]
    fn test_diamond_merges_with_one_phi() {
        let graph = diamond();
        let phis = phis(&graph);
        assert_eq!(phis.len(), 1);

        let phi = graph.mir(phis[0]);
        assert_eq!(phi.dalvik_insn.v_a, 0);
        assert_eq!(graph.sreg_to_vreg(phi.defs()[0]), 0);
        let join = phi.bb.unwrap();
        assert_eq!(phi.phi_incoming(), graph.block(join).predecessors.as_slice());
        for (&name, &pred) in phi.uses().iter().zip(phi.phi_incoming()) {
            assert!(graph
                .mir_ids(pred)
                .iter()
                .any(|id| graph.mir(*id).defs().contains(&name)));
        }

        // The return reads the phi, the branch reads the incoming argument.
        let ret = *graph.mir_ids(join).last().unwrap();
        assert_eq!(graph.mir(ret).uses(), phi.defs());
        let first = graph.block(graph.entry_block()).fall_through.unwrap();
        let branch = graph.mir_ids(first)[0];
        assert_eq!(graph.mir(branch).uses(), &[1]);

        // 2 vregs, the method pointer, two constants and the phi.
        assert_eq!(graph.num_ssa_regs(), 6);
        assert_eq!(graph.method_sreg(), Some(2));
        assert!(graph.verify_dataflow().is_ok());
    }

    #[test]
    fn test_rebuilding_ssa_discards_previous_names() {
        let mut graph = diamond();
        graph.build_ssa().unwrap();
        assert_eq!(phis(&graph).len(), 1);
        assert_eq!(graph.num_ssa_regs(), 6);
    }

    #[test]
    fn test_verify_rejects_phi_with_missing_operand() {
        let mut graph = diamond();
        let phi = phis(&graph)[0];
        if let Some(rep) = graph.mir_mut(phi).ssa_rep.as_mut() {
            rep.uses.pop();
        }
        assert!(graph.verify_dataflow().is_err());
    }
}
