//! The MIR graph: blocks, instructions and the per-method analysis state
//!
//! A [`MirGraph`] owns every block and every MIR of one method. Blocks and
//! instructions live in flat arenas and refer to each other by id, so passes
//! can walk and rewrite the graph without shared ownership. Analyses (DFS
//! orders, dominance, SSA, types) store their results on the graph and are
//! recomputed on demand.

pub mod block;
pub mod builder;
pub mod dominance;
pub mod iterator;
pub mod mir;
pub mod ssa;
pub mod visualization;

pub use block::{
    BasicBlock, BasicBlockDataFlow, BlockFlags, BlockId, BlockListType, BlockType, EdgeKind,
    SuccessorBlockInfo, SuccessorList,
};
pub use iterator::{DataflowIterator, IterationOrder};
pub use mir::{
    ConditionCode, Mir, MirId, MirMeta, MirOpcode, OptimizationFlags, SsaRepresentation,
};
pub use ssa::{RegLocation, RegLocationType};

use crate::analysis::{CheckStats, TypeConflict};
use crate::config::{CompilerOptions, DebugFlags, DisabledOptimizations};
use crate::dex::{MethodBody, MethodUnit, Opcode};
use crate::error::{Error, Result};
use crate::utils::BitSet;
use bitflags::bitflags;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{BTreeSet, HashMap};

bitflags! {
    /// Whole-method facts discovered while building and analysing.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MethodAttributes: u32 {
        /// No non-inlined invokes.
        const IS_LEAF  = 1 << 0;
        const HAS_LOOP = 1 << 1;
    }
}

/// Block graph plus analysis results for one method.
#[derive(Debug)]
pub struct MirGraph {
    pub(crate) blocks: Vec<BasicBlock>,
    pub(crate) mirs: Vec<Mir>,
    pub(crate) entry_block: Option<BlockId>,
    pub(crate) exit_block: Option<BlockId>,
    pub(crate) m_units: Vec<MethodUnit>,
    pub(crate) current_method: usize,
    /// Offset -> block starting at (or, mid-build, containing) that offset.
    pub(crate) dex_pc_to_block_map: HashMap<u32, BlockId>,
    pub(crate) try_block_addr: BitSet,
    pub(crate) disable_opt: DisabledOptimizations,
    pub(crate) debug: DebugFlags,

    pub(crate) dfs_order: Vec<BlockId>,
    pub(crate) dfs_post_order: Vec<BlockId>,
    pub(crate) dom_post_order_traversal: Vec<BlockId>,
    /// Immediate dominator of each block, indexed by `dfs_id`.
    pub(crate) i_dom_list: Vec<Option<usize>>,
    pub(crate) num_reachable_blocks: usize,
    pub(crate) dfs_orders_up_to_date: bool,
    pub(crate) domination_up_to_date: bool,
    pub(crate) extended_basic_blocks: Vec<BlockId>,

    pub(crate) ssa_base_vregs: Vec<i32>,
    pub(crate) ssa_subscripts: Vec<i32>,
    pub(crate) vreg_to_ssa_map: Vec<i32>,
    pub(crate) ssa_last_defs: Vec<i32>,
    pub(crate) def_block_matrix: Vec<BitSet>,
    pub(crate) method_sreg: Option<i32>,
    pub(crate) is_constant_v: BitSet,
    pub(crate) constant_values: Vec<i32>,
    pub(crate) reg_location: Vec<RegLocation>,
    pub(crate) use_counts: Vec<u32>,
    pub(crate) raw_use_counts: Vec<u32>,
    /// Array names allocated with a constant length, by SSA name.
    pub(crate) array_lengths: HashMap<i32, i32>,
    pub(crate) type_conflicts: BTreeSet<TypeConflict>,
    pub(crate) punt_to_interpreter: bool,

    pub(crate) attributes: MethodAttributes,
    pub(crate) opcode_count: Option<Vec<u32>>,
    pub(crate) check_stats: Option<CheckStats>,
    pub(crate) num_forward_branches: u32,
    pub(crate) num_backward_branches: u32,
    pub(crate) def_count: u32,
    /// Start offsets of every catch handler reached by an exception edge.
    pub(crate) catches: BTreeSet<u32>,
}

impl MirGraph {
    /// An empty graph. Blocks appear once a method is inlined.
    pub fn new(options: &CompilerOptions) -> Self {
        let mut graph = Self {
            blocks: Vec::new(),
            mirs: Vec::new(),
            entry_block: None,
            exit_block: None,
            m_units: Vec::new(),
            current_method: 0,
            dex_pc_to_block_map: HashMap::new(),
            try_block_addr: BitSet::default(),
            disable_opt: options.disable_opt,
            debug: options.debug,
            dfs_order: Vec::new(),
            dfs_post_order: Vec::new(),
            dom_post_order_traversal: Vec::new(),
            i_dom_list: Vec::new(),
            num_reachable_blocks: 0,
            dfs_orders_up_to_date: false,
            domination_up_to_date: false,
            extended_basic_blocks: Vec::new(),
            ssa_base_vregs: Vec::new(),
            ssa_subscripts: Vec::new(),
            vreg_to_ssa_map: Vec::new(),
            ssa_last_defs: Vec::new(),
            def_block_matrix: Vec::new(),
            method_sreg: None,
            is_constant_v: BitSet::default(),
            constant_values: Vec::new(),
            reg_location: Vec::new(),
            use_counts: Vec::new(),
            raw_use_counts: Vec::new(),
            array_lengths: HashMap::new(),
            type_conflicts: BTreeSet::new(),
            punt_to_interpreter: false,
            attributes: MethodAttributes::IS_LEAF,
            opcode_count: None,
            check_stats: None,
            num_forward_branches: 0,
            num_backward_branches: 0,
            def_count: 0,
            catches: BTreeSet::new(),
        };
        if options.debug.contains(DebugFlags::COUNT_OPCODES) {
            graph.enable_opcode_counting();
        }
        graph
    }

    /// A graph for `unit` with only the entry and exit sentinels, ready to
    /// be populated through the editing API.
    pub fn for_method(unit: MethodUnit, options: &CompilerOptions) -> Self {
        let mut graph = Self::new(options);
        graph.m_units.push(unit);
        graph.create_sentinels();
        graph
    }

    pub(crate) fn create_sentinels(&mut self) {
        let entry = self.new_block(BlockType::Entry);
        let exit = self.new_block(BlockType::Exit);
        self.entry_block = Some(entry);
        self.exit_block = Some(exit);
    }

    pub fn enable_opcode_counting(&mut self) {
        self.opcode_count = Some(vec![0; 256]);
    }

    // ---- accessors --------------------------------------------------------

    pub fn entry_block(&self) -> BlockId {
        self.entry_block.unwrap_or(BlockId(0))
    }

    pub fn exit_block(&self) -> BlockId {
        self.exit_block.unwrap_or(BlockId(1))
    }

    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.index()]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        &mut self.blocks[id.index()]
    }

    pub fn blocks(&self) -> &[BasicBlock] {
        &self.blocks
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn mir(&self, id: MirId) -> &Mir {
        &self.mirs[id.index()]
    }

    pub fn mir_mut(&mut self, id: MirId) -> &mut Mir {
        &mut self.mirs[id.index()]
    }

    /// Instructions of `block` in list order.
    pub fn block_mirs(&self, block: BlockId) -> MirIter<'_> {
        MirIter {
            mirs: &self.mirs,
            next: self.block(block).first_mir,
        }
    }

    /// Snapshot of the instruction ids of `block`, for loops that mutate.
    pub fn mir_ids(&self, block: BlockId) -> Vec<MirId> {
        self.block_mirs(block).map(|(id, _)| id).collect()
    }

    pub fn method_units(&self) -> &[MethodUnit] {
        &self.m_units
    }

    pub fn current_unit(&self) -> Option<&MethodUnit> {
        self.m_units.get(self.current_method)
    }

    pub fn method_body(&self) -> Option<&MethodBody> {
        self.current_unit().map(|unit| unit.body.as_ref())
    }

    pub fn method_name(&self) -> &str {
        self.method_body().map_or("<unknown>", |body| body.name.as_str())
    }

    pub fn shorty(&self) -> &str {
        self.method_body().map_or("V", |body| body.shorty.as_str())
    }

    pub fn is_static(&self) -> bool {
        self.current_unit().map_or(true, MethodUnit::is_static)
    }

    /// Virtual registers of the method being compiled.
    pub fn num_vregs(&self) -> usize {
        self.method_body().map_or(0, |body| body.registers_size as usize)
    }

    pub fn first_in_vreg(&self) -> usize {
        self.method_body().map_or(0, |body| body.first_in_vreg() as usize)
    }

    /// Code units across every inlined unit.
    pub fn num_dalvik_insns(&self) -> u32 {
        self.m_units.iter().map(|unit| unit.body.insns_size).sum()
    }

    pub fn disabled_optimizations(&self) -> DisabledOptimizations {
        self.disable_opt
    }

    pub fn debug_flags(&self) -> DebugFlags {
        self.debug
    }

    pub fn attributes(&self) -> MethodAttributes {
        self.attributes
    }

    pub fn num_reachable_blocks(&self) -> usize {
        self.num_reachable_blocks
    }

    pub fn dfs_order(&self) -> &[BlockId] {
        &self.dfs_order
    }

    pub fn dfs_post_order(&self) -> &[BlockId] {
        &self.dfs_post_order
    }

    pub fn dom_post_order(&self) -> &[BlockId] {
        &self.dom_post_order_traversal
    }

    pub fn extended_basic_blocks(&self) -> &[BlockId] {
        &self.extended_basic_blocks
    }

    pub fn dfs_orders_up_to_date(&self) -> bool {
        self.dfs_orders_up_to_date
    }

    pub fn domination_up_to_date(&self) -> bool {
        self.domination_up_to_date
    }

    pub fn num_forward_branches(&self) -> u32 {
        self.num_forward_branches
    }

    pub fn num_backward_branches(&self) -> u32 {
        self.num_backward_branches
    }

    pub fn def_count(&self) -> u32 {
        self.def_count
    }

    pub fn catches(&self) -> &BTreeSet<u32> {
        &self.catches
    }

    pub fn opcode_stats(&self) -> Option<&[u32]> {
        self.opcode_count.as_deref()
    }

    pub fn check_stats(&self) -> Option<&CheckStats> {
        self.check_stats.as_ref()
    }

    pub fn punt_to_interpreter(&self) -> bool {
        self.punt_to_interpreter
    }

    pub fn type_conflicts(&self) -> &BTreeSet<TypeConflict> {
        &self.type_conflicts
    }

    // ---- SSA name table ---------------------------------------------------

    pub fn num_ssa_regs(&self) -> usize {
        self.ssa_base_vregs.len()
    }

    pub fn sreg_to_vreg(&self, s_reg: i32) -> i32 {
        self.ssa_base_vregs[s_reg as usize]
    }

    pub fn ssa_subscript(&self, s_reg: i32) -> i32 {
        self.ssa_subscripts[s_reg as usize]
    }

    pub fn method_sreg(&self) -> Option<i32> {
        self.method_sreg
    }

    pub fn reg_locations(&self) -> &[RegLocation] {
        &self.reg_location
    }

    pub fn reg_location(&self, s_reg: i32) -> &RegLocation {
        &self.reg_location[s_reg as usize]
    }

    pub fn is_constant(&self, s_reg: i32) -> bool {
        s_reg >= 0 && self.is_constant_v.contains(s_reg as usize)
    }

    pub fn constant_value(&self, s_reg: i32) -> Option<i32> {
        self.is_constant(s_reg)
            .then(|| self.constant_values[s_reg as usize])
    }

    /// The 64-bit constant held by the pair starting at `s_reg`.
    pub fn constant_value_wide(&self, s_reg: i32) -> Option<i64> {
        let low = self.constant_value(s_reg)?;
        let high = self.constant_value(s_reg + 1)?;
        Some(((high as i64) << 32) | (low as u32 as i64))
    }

    pub fn use_count(&self, s_reg: i32) -> u32 {
        self.use_counts.get(s_reg as usize).copied().unwrap_or(0)
    }

    pub fn raw_use_count(&self, s_reg: i32) -> u32 {
        self.raw_use_counts.get(s_reg as usize).copied().unwrap_or(0)
    }

    /// Creates the next SSA name for `v_reg` and makes it the reaching
    /// definition.
    pub(crate) fn add_new_sreg(&mut self, v_reg: i32) -> i32 {
        let s_reg = self.ssa_base_vregs.len() as i32;
        let subscript = if v_reg >= 0 {
            let slot = &mut self.ssa_last_defs[v_reg as usize];
            *slot += 1;
            *slot
        } else {
            0
        };
        self.ssa_base_vregs.push(v_reg);
        self.ssa_subscripts.push(subscript);
        s_reg
    }

    // ---- block and instruction editing -----------------------------------

    /// Appends a new block and marks the orders and dominance stale.
    pub fn new_block(&mut self, block_type: BlockType) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(BasicBlock::new(id, block_type));
        self.dfs_orders_up_to_date = false;
        self.domination_up_to_date = false;
        id
    }

    fn push_mir(&mut self, block: BlockId, mut mir: Mir) -> MirId {
        let id = MirId(self.mirs.len() as u32);
        mir.bb = Some(block);
        mir.next = None;
        self.mirs.push(mir);
        id
    }

    pub fn append_mir(&mut self, block: BlockId, mir: Mir) -> MirId {
        let id = self.push_mir(block, mir);
        self.link_mir_at_end(block, id);
        id
    }

    pub(crate) fn link_mir_at_end(&mut self, block: BlockId, id: MirId) {
        self.mirs[id.index()].bb = Some(block);
        self.mirs[id.index()].next = None;
        match self.blocks[block.index()].last_mir {
            Some(last) => self.mirs[last.index()].next = Some(id),
            None => self.blocks[block.index()].first_mir = Some(id),
        }
        self.blocks[block.index()].last_mir = Some(id);
    }

    pub fn prepend_mir(&mut self, block: BlockId, mir: Mir) -> MirId {
        let id = self.push_mir(block, mir);
        let bb = &mut self.blocks[block.index()];
        self.mirs[id.index()].next = bb.first_mir;
        if bb.last_mir.is_none() {
            bb.last_mir = Some(id);
        }
        bb.first_mir = Some(id);
        id
    }

    pub fn insert_mir_after(&mut self, block: BlockId, after: MirId, mir: Mir) -> MirId {
        let id = self.push_mir(block, mir);
        let following = self.mirs[after.index()].next;
        self.mirs[id.index()].next = following;
        self.mirs[after.index()].next = Some(id);
        if self.blocks[block.index()].last_mir == Some(after) {
            self.blocks[block.index()].last_mir = Some(id);
        }
        id
    }

    /// Drops the operand `pred` contributes to each phi of `block`. Call it
    /// whenever `pred` stops being a predecessor of `block`.
    pub(crate) fn erase_phi_operands(&mut self, block: BlockId, pred: BlockId) {
        for id in self.mir_ids(block) {
            let mir = &mut self.mirs[id.index()];
            if !mir.is_phi() {
                break;
            }
            let MirMeta::PhiIncoming(incoming) = &mut mir.meta else {
                continue;
            };
            let Some(pos) = incoming.iter().position(|p| *p == pred) else {
                continue;
            };
            incoming.remove(pos);
            if let Some(rep) = mir.ssa_rep.as_mut() {
                if pos < rep.uses.len() {
                    rep.uses.remove(pos);
                }
                if pos < rep.fp_use.len() {
                    rep.fp_use.remove(pos);
                }
            }
        }
    }

    /// Unlinks `id` from `block`. The MIR stays in the arena, detached.
    pub fn remove_mir(&mut self, block: BlockId, id: MirId) -> Result<()> {
        let mut prev = None;
        let mut cur = self.blocks[block.index()].first_mir;
        while let Some(m) = cur {
            if m == id {
                break;
            }
            prev = Some(m);
            cur = self.mirs[m.index()].next;
        }
        if cur.is_none() {
            return Err(Error::internal(format!(
                "instruction {} is not in block {}",
                id.0, block
            )));
        }
        let following = self.mirs[id.index()].next;
        match prev {
            Some(p) => self.mirs[p.index()].next = following,
            None => self.blocks[block.index()].first_mir = following,
        }
        if self.blocks[block.index()].last_mir == Some(id) {
            self.blocks[block.index()].last_mir = prev;
        }
        let mir = &mut self.mirs[id.index()];
        mir.next = None;
        mir.bb = None;
        Ok(())
    }

    pub fn link_fall_through(&mut self, from: BlockId, to: BlockId) {
        self.blocks[from.index()].fall_through = Some(to);
        self.blocks[to.index()].predecessors.push(from);
        self.dfs_orders_up_to_date = false;
        self.domination_up_to_date = false;
    }

    pub fn link_taken(&mut self, from: BlockId, to: BlockId) {
        self.blocks[from.index()].taken = Some(to);
        self.blocks[to.index()].predecessors.push(from);
        self.dfs_orders_up_to_date = false;
        self.domination_up_to_date = false;
    }

    /// Adds a switch or catch edge. The list kind is set on first use.
    pub fn add_successor(&mut self, from: BlockId, kind: BlockListType, to: BlockId, key: i32) {
        let list = &mut self.blocks[from.index()].successors;
        list.kind = kind;
        list.blocks.push(SuccessorBlockInfo { block: to, key });
        self.blocks[to.index()].predecessors.push(from);
        self.dfs_orders_up_to_date = false;
        self.domination_up_to_date = false;
    }

    /// Outgoing edges of `block`, tagged by kind, in traversal order.
    pub fn successor_edges(&self, block: BlockId) -> Vec<(BlockId, EdgeKind)> {
        let bb = self.block(block);
        let mut edges = Vec::new();
        if let Some(fall) = bb.fall_through {
            let kind = if bb.successors.is_switch() {
                EdgeKind::Default
            } else {
                EdgeKind::Fall
            };
            edges.push((fall, kind));
        }
        if let Some(taken) = bb.taken {
            edges.push((taken, EdgeKind::Taken));
        }
        for succ in &bb.successors.blocks {
            let kind = match bb.successors.kind {
                BlockListType::Catch => EdgeKind::Catch(succ.key as u32),
                _ => EdgeKind::Switch(succ.key),
            };
            edges.push((succ.block, kind));
        }
        edges
    }

    /// Copy of the visible graph for petgraph algorithms. Node weights are
    /// block ids; the map takes block ids to node indices.
    pub fn to_petgraph(&self) -> (DiGraph<BlockId, EdgeKind>, HashMap<BlockId, NodeIndex>) {
        let mut graph = DiGraph::new();
        let mut nodes = HashMap::new();
        for bb in self.blocks.iter().filter(|bb| !bb.is_hidden()) {
            nodes.insert(bb.id, graph.add_node(bb.id));
        }
        for bb in self.blocks.iter().filter(|bb| !bb.is_hidden()) {
            for (succ, kind) in self.successor_edges(bb.id) {
                if let (Some(&from), Some(&to)) = (nodes.get(&bb.id), nodes.get(&succ)) {
                    graph.add_edge(from, to, kind);
                }
            }
        }
        (graph, nodes)
    }

    /// Whether the edge from `branch` to `target` jumps backwards.
    pub fn is_backedge(&self, branch: BlockId, target: Option<BlockId>) -> bool {
        target.is_some_and(|t| self.block(t).start_offset <= self.block(branch).start_offset)
    }

    pub fn is_backwards_branch(&self, block: BlockId) -> bool {
        let bb = self.block(block);
        self.is_backedge(block, bb.taken) || self.is_backedge(block, bb.fall_through)
    }

    /// Next instruction after `mir`, continuing into a fall-through block
    /// that has no other predecessor. Updates `block` when it crosses.
    pub fn advance_mir(&self, block: &mut BlockId, mir: MirId) -> Option<MirId> {
        if let Some(next) = self.mir(mir).next {
            return Some(next);
        }
        let fall = self.block(*block).fall_through?;
        if self.block(fall).predecessors.len() != 1 {
            return None;
        }
        *block = fall;
        self.block(fall).first_mir
    }

    /// The `move-result*` consuming the result of `mir`, skipping pseudo-ops.
    pub fn find_move_result(&self, block: BlockId, mir: MirId) -> Option<MirId> {
        let mut bb = block;
        let mut cur = self.advance_mir(&mut bb, mir);
        while let Some(id) = cur {
            match self.mir(id).opcode {
                MirOpcode::Dalvik(
                    Opcode::MoveResult | Opcode::MoveResultWide | Opcode::MoveResultObject,
                ) => return Some(id),
                op if op.is_pseudo() => cur = self.advance_mir(&mut bb, id),
                _ => return None,
            }
        }
        None
    }

    pub fn clear_all_visited_flags(&mut self) {
        for bb in &mut self.blocks {
            bb.flags.remove(BlockFlags::VISITED);
        }
    }

    /// Every predecessor must list the block as a successor.
    pub fn verify_pred_info(&self) -> Result<()> {
        for bb in self.blocks.iter().filter(|bb| !bb.is_hidden()) {
            for &pred in &bb.predecessors {
                let pred_bb = self.block(pred);
                if !pred_bb.successor_ids().any(|succ| succ == bb.id) {
                    return Err(Error::internal(format!(
                        "block {} lists {} as a predecessor but is not its successor",
                        bb.id, pred
                    )));
                }
            }
        }
        Ok(())
    }

    /// Loop-scaled weight of one use inside `block`.
    pub(crate) fn use_weight(&self, block: BlockId) -> u32 {
        1u32 << self.block(block).nesting_depth.min(16)
    }
}

/// Iterator over the instruction list of one block.
pub struct MirIter<'a> {
    mirs: &'a [Mir],
    next: Option<MirId>,
}

impl<'a> Iterator for MirIter<'a> {
    type Item = (MirId, &'a Mir);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.next?;
        let mir = &self.mirs[id.index()];
        self.next = mir.next;
        Some((id, mir))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::DecodedInstruction;

    fn empty_graph() -> MirGraph {
        let mut graph = MirGraph::new(&CompilerOptions::default());
        graph.create_sentinels();
        graph
    }

    #[test]
    fn test_mir_list_editing() {
        let mut graph = empty_graph();
        let bb = graph.new_block(BlockType::DalvikByteCode);
        let a = graph.append_mir(bb, Mir::new(DecodedInstruction::unary(Opcode::ReturnVoid, 0), 4));
        let b = graph.prepend_mir(bb, Mir::new(DecodedInstruction::literal(Opcode::Const4, 0, 1), 0));
        let c = graph.insert_mir_after(bb, b, Mir::new(DecodedInstruction::literal(Opcode::Const4, 1, 2), 1));
        assert_eq!(graph.mir_ids(bb), vec![b, c, a]);
        assert_eq!(graph.block(bb).last_mir, Some(a));

        graph.remove_mir(bb, a).unwrap();
        assert_eq!(graph.mir_ids(bb), vec![b, c]);
        assert_eq!(graph.block(bb).last_mir, Some(c));
        assert_eq!(graph.mir(a).bb, None);
        assert!(graph.remove_mir(bb, a).is_err());
    }

    #[test]
    fn test_successor_edges_tag_switch_default() {
        let mut graph = empty_graph();
        let head = graph.new_block(BlockType::DalvikByteCode);
        let case = graph.new_block(BlockType::DalvikByteCode);
        let default = graph.new_block(BlockType::DalvikByteCode);
        graph.add_successor(head, BlockListType::PackedSwitch, case, 7);
        graph.link_fall_through(head, default);
        assert_eq!(
            graph.successor_edges(head),
            vec![(default, EdgeKind::Default), (case, EdgeKind::Switch(7))]
        );
        assert!(graph.verify_pred_info().is_ok());
    }

    #[test]
    fn test_backedge_uses_start_offsets() {
        let mut graph = empty_graph();
        let head = graph.new_block(BlockType::DalvikByteCode);
        let body = graph.new_block(BlockType::DalvikByteCode);
        graph.block_mut(head).start_offset = 0;
        graph.block_mut(body).start_offset = 4;
        graph.link_taken(body, head);
        assert!(graph.is_backedge(body, Some(head)));
        assert!(graph.is_backwards_branch(body));
        assert!(!graph.is_backedge(head, Some(body)));
    }
}
