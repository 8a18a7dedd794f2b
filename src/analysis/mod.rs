//! Analyses and clean-ups over the SSA graph
//!
//! The central piece is the type and check-elimination engine: constant
//! propagation, type inference, null-check and bounds-check elimination
//! share one repeating reverse-post-order walk until no block changes.
//! Block-level clean-ups and the compiler filter live alongside.

pub mod block_optimization;
pub mod constant_propagation;
pub mod method_stats;
pub mod null_check;
pub mod passes;
pub mod range_check;
pub mod type_inference;

pub use method_stats::MethodStats;
pub use passes::{default_pipeline, run_passes, Pass};
pub use type_inference::{TypeCategory, TypeConflict};

use crate::cfg::{DataflowIterator, IterationOrder, MirGraph, OptimizationFlags};
use crate::config::{DebugFlags, DisabledOptimizations};
use crate::error::{Error, Result};
use serde::Serialize;

/// How many runtime checks a method contains and how many were proven
/// unnecessary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CheckStats {
    pub null_checks: u32,
    pub null_checks_eliminated: u32,
    pub range_checks: u32,
    pub range_checks_eliminated: u32,
}

impl MirGraph {
    /// Runs constant propagation, type inference and check elimination to
    /// a fixed point. Needs SSA form.
    pub fn run_type_and_check_elimination(&mut self) -> Result<()> {
        if self.method_sreg.is_none() {
            return Err(Error::internal(format!(
                "{}: check elimination needs SSA form",
                self.method_name()
            )));
        }
        if self.reg_location.len() != self.num_ssa_regs() {
            self.init_reg_locations();
        }
        if !self.dfs_orders_up_to_date {
            self.compute_dfs_orders();
        }
        for bb in self.blocks.iter_mut() {
            if let Some(info) = bb.data_flow_info.as_mut() {
                info.ending_null_check_v = None;
                info.ending_range_checks = None;
            }
        }
        self.array_lengths.clear();

        let null_checks = !self
            .disable_opt
            .contains(DisabledOptimizations::NULL_CHECK_ELIMINATION);
        let range_checks = !self
            .disable_opt
            .contains(DisabledOptimizations::RANGE_CHECK_ELIMINATION);
        let max_repeats = 2 * (self.num_ssa_regs() + self.num_blocks()) + 8;

        let mut iter = DataflowIterator::new(self, IterationOrder::RepeatingReversePostOrder);
        let mut changed = false;
        while let Some(block) = iter.next(changed) {
            changed = self.propagate_constants(block);
            changed |= self.infer_types(block);
            if null_checks {
                changed |= self.eliminate_null_checks(block);
            }
            if range_checks {
                changed |= self.eliminate_range_checks(block);
            }
            if iter.repeats() > max_repeats {
                return Err(Error::internal(format!(
                    "{}: check elimination did not converge after {} passes",
                    self.method_name(),
                    iter.repeats()
                )));
            }
        }
        log::debug!(
            "{}: check elimination converged after {} passes",
            self.method_name(),
            iter.repeats()
        );

        self.remap_reg_locations();
        if self.debug.contains(DebugFlags::DUMP_CHECK_STATS) {
            let stats = self.count_checks();
            log::info!(
                "{}: null checks {}/{} eliminated, range checks {}/{} eliminated",
                self.method_name(),
                stats.null_checks_eliminated,
                stats.null_checks,
                stats.range_checks_eliminated,
                stats.range_checks
            );
        }
        Ok(())
    }

    /// Tallies the null and bounds checks of reachable code and stores the
    /// result for [`MirGraph::check_stats`].
    pub fn count_checks(&mut self) -> CheckStats {
        let mut stats = CheckStats::default();
        for bb in self.blocks.iter().filter(|bb| !bb.is_hidden()) {
            for (_, mir) in self.block_mirs(bb.id) {
                let attrs = mir.dataflow_attributes();
                if attrs.null_check_operand().is_some() {
                    stats.null_checks += 1;
                    if mir.optimization_flags.contains(OptimizationFlags::IGNORE_NULL_CHECK) {
                        stats.null_checks_eliminated += 1;
                    }
                }
                if attrs.range_check_operand().is_some() {
                    stats.range_checks += 1;
                    if mir.optimization_flags.contains(OptimizationFlags::IGNORE_RANGE_CHECK) {
                        stats.range_checks_eliminated += 1;
                    }
                }
            }
        }
        self.check_stats = Some(stats);
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::builder::build;
    use crate::cfg::{MirId, MirOpcode};
    use crate::config::CompilerOptions;
    use crate::dex::{AccessFlags, DecodedInstruction, MethodAssembler, MethodUnit, Opcode};

    fn analysed(asm: MethodAssembler, options: &CompilerOptions) -> MirGraph {
        let unit = MethodUnit::from_body(asm.finish(), AccessFlags::STATIC);
        let mut graph = build(&unit, options).unwrap();
        graph.build_ssa().unwrap();
        graph.run_type_and_check_elimination().unwrap();
        graph
    }

    fn find(graph: &MirGraph, opcode: Opcode) -> MirId {
        graph
            .blocks()
            .iter()
            .filter(|bb| !bb.is_hidden())
            .flat_map(|bb| graph.mir_ids(bb.id))
            .find(|id| graph.mir(*id).opcode == MirOpcode::Dalvik(opcode))
            .unwrap()
    }

    fn alloc_then_read() -> MethodAssembler {
        // Object o = new T(); if (x != 0) y = 0; return o.f;
        let mut asm = MethodAssembler::new("int T.a(int)", "II", 3, 1);
        asm.push(DecodedInstruction::new(Opcode::NewInstance, 0, 0, 0));
        asm.push_branch(DecodedInstruction::if_z(Opcode::IfEqz, 2, 0), 3);
        asm.push(DecodedInstruction::literal(Opcode::Const4, 1, 0));
        asm.push(DecodedInstruction::new(Opcode::Iget, 1, 0, 0));
        asm.push(DecodedInstruction::unary(Opcode::Return, 1));
        asm
    }

    #[test]
    fn test_allocation_proves_non_null_across_blocks() {
        let mut graph = analysed(alloc_then_read(), &CompilerOptions::default());
        let iget = find(&graph, Opcode::Iget);
        assert!(graph
            .mir(iget)
            .optimization_flags
            .contains(OptimizationFlags::IGNORE_NULL_CHECK));

        let stats = graph.count_checks();
        assert_eq!(stats.null_checks, 1);
        assert_eq!(stats.null_checks_eliminated, 1);
        assert_eq!(stats.range_checks, 0);
        assert_eq!(graph.check_stats(), Some(&stats));
    }

    #[test]
    fn test_disabled_null_check_elimination_keeps_checks() {
        let mut options = CompilerOptions::default();
        options.disable_opt |= DisabledOptimizations::NULL_CHECK_ELIMINATION;
        let graph = analysed(alloc_then_read(), &options);
        let iget = find(&graph, Opcode::Iget);
        assert!(!graph
            .mir(iget)
            .optimization_flags
            .contains(OptimizationFlags::IGNORE_NULL_CHECK));
    }

    #[test]
    fn test_one_armed_allocation_stays_nullable() {
        // if (x != 0) o = new T(); return o.f;
        let mut asm = MethodAssembler::new("int T.b(java.lang.Object, int)", "ILI", 3, 2);
        asm.push_branch(DecodedInstruction::if_z(Opcode::IfEqz, 2, 0), 2);
        asm.push(DecodedInstruction::new(Opcode::NewInstance, 1, 0, 0));
        asm.push(DecodedInstruction::new(Opcode::Iget, 0, 1, 0));
        asm.push(DecodedInstruction::unary(Opcode::Return, 0));
        let graph = analysed(asm, &CompilerOptions::default());

        let iget = find(&graph, Opcode::Iget);
        let block = graph.mir(iget).bb.unwrap();
        assert!(graph.block_mirs(block).any(|(_, mir)| mir.is_phi()));
        assert!(!graph
            .mir(iget)
            .optimization_flags
            .contains(OptimizationFlags::IGNORE_NULL_CHECK));
    }

    #[test]
    fn test_conflicting_types_keep_first_and_disable_promotion() {
        let mut asm = MethodAssembler::new("void T.c()", "V", 3, 0);
        asm.push(DecodedInstruction::literal(Opcode::Const4, 0, 0));
        asm.push(DecodedInstruction::new(Opcode::AddFloat, 1, 0, 0));
        asm.push(DecodedInstruction::new(Opcode::AddInt, 2, 0, 0));
        asm.push(DecodedInstruction::unary(Opcode::ReturnVoid, 0));
        let graph = analysed(asm, &CompilerOptions::default());

        let conflict = graph.type_conflicts().iter().next().copied().unwrap();
        assert_eq!(conflict.kept, TypeCategory::Fp);
        assert_eq!(conflict.rejected, TypeCategory::Core);
        assert!(graph
            .disabled_optimizations()
            .contains(DisabledOptimizations::PROMOTE_REGS));
        assert!(graph.reg_location(conflict.s_reg).fp);
    }

    #[test]
    fn test_requires_ssa() {
        let unit = MethodUnit::from_body(alloc_then_read().finish(), AccessFlags::STATIC);
        let mut graph = build(&unit, &CompilerOptions::default()).unwrap();
        assert!(matches!(
            graph.run_type_and_check_elimination(),
            Err(Error::Internal { .. })
        ));
    }
}
