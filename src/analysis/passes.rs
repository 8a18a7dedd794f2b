//! Pass entry points in their default order
//!
//! Pass scheduling belongs to the driver; this is only the fixed sequence a
//! plain compile runs.

use crate::cfg::{BlockId, BlockType, MirGraph};
use crate::config::{DebugFlags, DisabledOptimizations};
use crate::error::Result;
use std::time::Instant;

/// One whole-method transformation or analysis.
pub trait Pass: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Check if this pass should run on `graph`
    fn gate(&self, _graph: &MirGraph) -> bool {
        true
    }

    fn run(&self, graph: &mut MirGraph) -> Result<()>;
}

fn enabled(graph: &MirGraph, opt: DisabledOptimizations) -> bool {
    !graph.disabled_optimizations().contains(opt)
}

/// Inverts branches so single-predecessor targets fall through.
pub struct CodeLayout;

impl Pass for CodeLayout {
    fn name(&self) -> &'static str {
        "CodeLayout"
    }

    fn gate(&self, graph: &MirGraph) -> bool {
        enabled(graph, DisabledOptimizations::BB_OPT)
    }

    fn run(&self, graph: &mut MirGraph) -> Result<()> {
        graph.layout_blocks();
        Ok(())
    }
}

pub struct SsaConversion;

impl Pass for SsaConversion {
    fn name(&self) -> &'static str {
        "SsaConversion"
    }

    fn run(&self, graph: &mut MirGraph) -> Result<()> {
        graph.build_ssa()
    }
}

/// Constants, types, null and bounds checks in one fixed point.
pub struct TypeAndCheckElimination;

impl Pass for TypeAndCheckElimination {
    fn name(&self) -> &'static str {
        "TypeAndCheckElimination"
    }

    fn run(&self, graph: &mut MirGraph) -> Result<()> {
        graph.run_type_and_check_elimination()
    }
}

pub struct UseCounting;

impl Pass for UseCounting {
    fn name(&self) -> &'static str {
        "UseCounting"
    }

    fn run(&self, graph: &mut MirGraph) -> Result<()> {
        graph.count_uses();
        Ok(())
    }
}

pub struct BranchFusing;

impl Pass for BranchFusing {
    fn name(&self) -> &'static str {
        "BranchFusing"
    }

    fn gate(&self, graph: &MirGraph) -> bool {
        enabled(graph, DisabledOptimizations::BRANCH_FUSING)
    }

    fn run(&self, graph: &mut MirGraph) -> Result<()> {
        let mut fused = 0;
        for idx in 0..graph.num_blocks() {
            let block = BlockId(idx as u32);
            let bb = graph.block(block);
            if !bb.is_hidden() && bb.block_type == BlockType::DalvikByteCode {
                fused += graph.fuse_branches(block);
            }
        }
        if fused > 0 {
            log::debug!("{}: fused {} compare-and-branch pairs", graph.method_name(), fused);
        }
        Ok(())
    }
}

pub struct BlockCombine;

impl Pass for BlockCombine {
    fn name(&self) -> &'static str {
        "BlockCombine"
    }

    fn gate(&self, graph: &MirGraph) -> bool {
        enabled(graph, DisabledOptimizations::BB_OPT)
    }

    fn run(&self, graph: &mut MirGraph) -> Result<()> {
        if graph.combine_blocks() > 0 {
            graph.compute_dominance()?;
        }
        Ok(())
    }
}

pub struct ExtendedBlocks;

impl Pass for ExtendedBlocks {
    fn name(&self) -> &'static str {
        "ExtendedBlocks"
    }

    fn run(&self, graph: &mut MirGraph) -> Result<()> {
        graph.build_extended_bb_list();
        Ok(())
    }
}

/// The sequence a plain compile runs.
pub fn default_pipeline() -> Vec<Box<dyn Pass>> {
    vec![
        Box::new(CodeLayout),
        Box::new(SsaConversion),
        Box::new(TypeAndCheckElimination),
        Box::new(UseCounting),
        Box::new(BranchFusing),
        Box::new(BlockCombine),
        Box::new(ExtendedBlocks),
    ]
}

/// Runs `passes` in order, skipping those whose gate is closed.
pub fn run_passes(graph: &mut MirGraph, passes: &[Box<dyn Pass>]) -> Result<()> {
    let timings = graph.debug_flags().contains(DebugFlags::TIMINGS);
    for pass in passes {
        if !pass.gate(graph) {
            log::trace!("{}: skipping {}", graph.method_name(), pass.name());
            continue;
        }
        let start = Instant::now();
        pass.run(graph)?;
        if timings {
            log::info!(
                "{}: {} took {:?}",
                graph.method_name(),
                pass.name(),
                start.elapsed()
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::builder::build;
    use crate::cfg::MirOpcode;
    use crate::config::CompilerOptions;
    use crate::dex::{AccessFlags, DecodedInstruction, MethodAssembler, MethodUnit, Opcode};

    #[test]
    fn test_default_pipeline_fuses_long_compare() {
        // if (a < b) return 1; return 0;
        let mut asm = MethodAssembler::new("int T.lt(long, long)", "IJJ", 5, 4);
        asm.push(DecodedInstruction::new(Opcode::CmpLong, 0, 1, 3));
        asm.push_branch(DecodedInstruction::if_z(Opcode::IfGez, 0, 0), 4);
        asm.push(DecodedInstruction::literal(Opcode::Const4, 0, 1));
        asm.push(DecodedInstruction::unary(Opcode::Return, 0));
        asm.push(DecodedInstruction::literal(Opcode::Const4, 0, 0));
        asm.push(DecodedInstruction::unary(Opcode::Return, 0));
        let unit = MethodUnit::from_body(asm.finish(), AccessFlags::STATIC);
        let mut graph = build(&unit, &CompilerOptions::default()).unwrap();
        run_passes(&mut graph, &default_pipeline()).unwrap();

        let mirs: Vec<_> = graph
            .blocks()
            .iter()
            .filter(|bb| !bb.is_hidden())
            .flat_map(|bb| graph.block_mirs(bb.id).map(|(_, mir)| mir.opcode))
            .collect();
        assert!(mirs.contains(&MirOpcode::FusedCmpLong));
        assert!(mirs.contains(&MirOpcode::Nop));
        assert!(!graph.extended_basic_blocks().is_empty());
    }
}
