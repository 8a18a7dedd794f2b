//! Compiler filter heuristics
//!
//! A quick scan of the block graph estimates how much a method would gain
//! from compilation. Instructions inside simple loops count 25 times.

use crate::cfg::{BlockFlags, BlockId, BlockType, MirGraph};
use crate::config::{CompilerFilter, DebugFlags, MethodThresholds};
use crate::dex::AnalysisAttributes;
use serde::Serialize;

const LOOP_SCALE_FACTOR: u32 = 25;

/// Weighted instruction mix of one method.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MethodStats {
    pub dex_instructions: u32,
    pub math_ops: u32,
    pub fp_ops: u32,
    pub array_ops: u32,
    pub branch_ops: u32,
    pub heavyweight_ops: u32,
    pub has_computational_loop: bool,
    pub has_switch: bool,
    pub math_ratio: f32,
    pub fp_ratio: f32,
    pub array_ratio: f32,
    pub branch_ratio: f32,
    pub heavyweight_ratio: f32,
}

impl MethodStats {
    fn compute_ratios(&mut self) {
        let count = self.dex_instructions.max(1) as f32;
        self.math_ratio = self.math_ops as f32 / count;
        self.fp_ratio = self.fp_ops as f32 / count;
        self.array_ratio = self.array_ops as f32 / count;
        self.branch_ratio = self.branch_ops as f32 / count;
        self.heavyweight_ratio = self.heavyweight_ops as f32 / count;
    }
}

impl MirGraph {
    /// Analysis attributes of the last real instruction of `block`.
    fn ending_attributes(&self, block: BlockId) -> AnalysisAttributes {
        self.block_mirs(block)
            .filter(|(_, mir)| !mir.opcode.is_pseudo())
            .last()
            .map_or(AnalysisAttributes::empty(), |(_, mir)| mir.opcode.analysis_attributes())
    }

    /// Last block of the fall-through chain starting at `block`: the first
    /// one ending in a branch, or the block before a join.
    fn chain_end(&self, block: BlockId) -> BlockId {
        let mut end = block;
        for _ in 0..self.blocks.len() {
            if self.ending_attributes(end).contains(AnalysisAttributes::BRANCH) {
                break;
            }
            match self.block(end).fall_through {
                Some(next) if next != block && self.block(next).predecessors.len() == 1 => {
                    end = next
                }
                _ => break,
            }
        }
        end
    }

    fn analyze_block(&mut self, block: BlockId, stats: &mut MethodStats) {
        let end = self.chain_end(block);
        let ending = self.block(end);
        let mut scale = 1;
        if let (Some(taken), None) = (ending.taken, ending.fall_through) {
            let tb = self.block(taken);
            if tb.taken == Some(block) || tb.fall_through == Some(block) {
                // for / while
                scale = LOOP_SCALE_FACTOR;
            }
        }
        if ending.taken == Some(block) {
            // do-while
            scale = LOOP_SCALE_FACTOR;
        }

        let mut computational = true;
        let mut cur = block;
        for _ in 0..self.blocks.len() {
            self.block_mut(cur).flags.insert(BlockFlags::VISITED);
            for (_, mir) in self.block_mirs(cur) {
                if mir.opcode.is_pseudo() {
                    continue;
                }
                let flags = mir.opcode.analysis_attributes();
                stats.dex_instructions += scale;
                if flags.contains(AnalysisAttributes::BRANCH) {
                    stats.branch_ops += scale;
                } else {
                    computational &= flags.intersects(AnalysisAttributes::COMPUTATIONAL);
                }
                if flags.contains(AnalysisAttributes::MATH) {
                    stats.math_ops += scale;
                }
                if flags.contains(AnalysisAttributes::FP) {
                    stats.fp_ops += scale;
                }
                if flags.contains(AnalysisAttributes::ARRAY_OP) {
                    stats.array_ops += scale;
                }
                if flags.contains(AnalysisAttributes::HEAVYWEIGHT) {
                    stats.heavyweight_ops += scale;
                }
                if flags.contains(AnalysisAttributes::SWITCH) {
                    stats.has_switch = true;
                }
            }
            if cur == end {
                break;
            }
            match self.block(cur).fall_through {
                Some(next) => cur = next,
                None => break,
            }
        }
        if computational && scale > 1 {
            stats.has_computational_loop = true;
        }
    }

    /// Scans every reachable bytecode block once.
    pub fn method_stats(&mut self) -> MethodStats {
        self.clear_all_visited_flags();
        let mut stats = MethodStats::default();
        for idx in 0..self.blocks.len() {
            let block = BlockId(idx as u32);
            let bb = self.block(block);
            if bb.visited() || bb.is_hidden() || bb.block_type != BlockType::DalvikByteCode {
                continue;
            }
            self.analyze_block(block, &mut stats);
        }
        self.clear_all_visited_flags();
        stats.compute_ratios();
        stats
    }

    /// Whether compiling this method is not worth it under `filter`.
    pub fn skip_compilation(&mut self, filter: CompilerFilter, thresholds: &MethodThresholds) -> bool {
        let (small_cutoff, default_cutoff) = match filter {
            CompilerFilter::InterpretOnly => return true,
            CompilerFilter::Everything => return false,
            CompilerFilter::Space => (thresholds.tiny, thresholds.small),
            CompilerFilter::Balanced => (thresholds.small, thresholds.large),
            CompilerFilter::Speed => (thresholds.huge, thresholds.huge),
        };
        let size = self.num_dalvik_insns();
        let mut skip = size >= default_cutoff;

        if size > thresholds.huge {
            skip = true;
            // Machine generated, most likely; not worth a closer look.
            if self.num_blocks() as u32 > thresholds.huge / 2 {
                return true;
            }
        } else if size > thresholds.large && self.punt_to_interpreter {
            return true;
        }

        if self.current_unit().is_some_and(|unit| unit.is_class_initializer()) {
            return true;
        }
        if size < small_cutoff {
            return false;
        }

        let stats = self.method_stats();
        if self.debug.contains(DebugFlags::SHOW_FILTER_STATS) {
            log::info!(
                "{}: {} weighted insns, math {:.2} fp {:.2} array {:.2} branch {:.2} heavy {:.2}{}",
                self.method_name(),
                stats.dex_instructions,
                stats.math_ratio,
                stats.fp_ratio,
                stats.array_ratio,
                stats.branch_ratio,
                stats.heavyweight_ratio,
                if stats.has_computational_loop { ", computational loop" } else { "" }
            );
        }
        decide(&stats, size, thresholds, skip)
    }
}

fn decide(stats: &MethodStats, size: u32, thresholds: &MethodThresholds, skip_default: bool) -> bool {
    if stats.has_computational_loop && stats.heavyweight_ratio < 0.04 {
        return false;
    }
    if size > thresholds.small && stats.heavyweight_ratio > 0.3 {
        return true;
    }
    skip_default
}

#[cfg(test)]
mod tests {
    use crate::cfg::builder::build;
    use crate::cfg::MirGraph;
    use crate::config::{CompilerFilter, CompilerOptions, MethodThresholds};
    use crate::dex::{AccessFlags, DecodedInstruction, MethodAssembler, MethodUnit, Opcode};

    fn counting_loop() -> MirGraph {
        // for (i = 0; i != n; i++) {}
        let mut asm = MethodAssembler::new("void T.spin(int)", "VI", 2, 1);
        asm.push(DecodedInstruction::literal(Opcode::Const4, 0, 0));
        asm.push(DecodedInstruction::new(Opcode::AddIntLit8, 0, 0, 1));
        asm.push_branch(DecodedInstruction::if_cmp(Opcode::IfNe, 0, 1, 0), 1);
        asm.push(DecodedInstruction::unary(Opcode::ReturnVoid, 0));
        let unit = MethodUnit::from_body(asm.finish(), AccessFlags::STATIC);
        build(&unit, &CompilerOptions::default()).unwrap()
    }

    #[test]
    fn test_loop_is_scaled_and_computational() {
        let mut graph = counting_loop();
        let stats = graph.method_stats();
        assert!(stats.has_computational_loop);
        // const + return once, add + branch 25 times each.
        assert_eq!(stats.dex_instructions, 2 + 2 * 25);
        assert_eq!(stats.branch_ops, 25 + 1);
        assert!(!graph.blocks().iter().any(|bb| bb.visited()));
    }

    #[test]
    fn test_filter_extremes() {
        let mut graph = counting_loop();
        let thresholds = MethodThresholds::default();
        assert!(graph.skip_compilation(CompilerFilter::InterpretOnly, &thresholds));
        assert!(!graph.skip_compilation(CompilerFilter::Everything, &thresholds));
        assert!(!graph.skip_compilation(CompilerFilter::Balanced, &thresholds));
    }
}
