//! Basic blocks of the MIR graph

use super::mir::MirId;
use crate::utils::BitSet;
use bitflags::bitflags;
use std::collections::BTreeSet;
use std::fmt;

/// Index of a block in the graph's block table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

impl BlockId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockType {
    Entry,
    Exit,
    DalvikByteCode,
    /// Synthetic target of an exception edge leaving the method.
    ExceptionHandling,
    /// Absorbed by a neighbour during block combining.
    Dead,
}

impl BlockType {
    pub fn name(self) -> &'static str {
        match self {
            BlockType::Entry => "Entry Block",
            BlockType::Exit => "Exit Block",
            BlockType::DalvikByteCode => "Code Block",
            BlockType::ExceptionHandling => "Exception Handling",
            BlockType::Dead => "Dead Block",
        }
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BlockFlags: u16 {
        const VISITED              = 1 << 0;
        /// Unreachable or dead; kept in the table but ignored by passes.
        const HIDDEN               = 1 << 1;
        const CATCH_ENTRY          = 1 << 2;
        const EXPLICIT_THROW       = 1 << 3;
        const CONDITIONAL_BRANCH   = 1 << 4;
        const TERMINATED_BY_RETURN = 1 << 5;
        const DOMINATES_RETURN     = 1 << 6;
        const USE_LVN              = 1 << 7;
    }
}

/// What the auxiliary successor list holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlockListType {
    #[default]
    NotUsed,
    Catch,
    PackedSwitch,
    SparseSwitch,
}

/// One entry of a switch or catch successor list. `key` is the case value
/// or the caught type index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SuccessorBlockInfo {
    pub block: BlockId,
    pub key: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SuccessorList {
    pub kind: BlockListType,
    pub blocks: Vec<SuccessorBlockInfo>,
}

impl SuccessorList {
    pub fn is_used(&self) -> bool {
        self.kind != BlockListType::NotUsed
    }

    pub fn is_switch(&self) -> bool {
        matches!(
            self.kind,
            BlockListType::PackedSwitch | BlockListType::SparseSwitch
        )
    }

    pub fn clear(&mut self) {
        self.kind = BlockListType::NotUsed;
        self.blocks.clear();
    }
}

/// How control reaches a successor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    Fall,
    Taken,
    /// Switch case with its key.
    Switch(i32),
    /// Fall-through of a switch block.
    Default,
    /// Exception edge with the caught type index.
    Catch(u32),
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EdgeKind::Fall => write!(f, "fall"),
            EdgeKind::Taken => write!(f, "taken"),
            EdgeKind::Switch(key) => write!(f, "case {}", key),
            EdgeKind::Default => write!(f, "default"),
            EdgeKind::Catch(type_idx) => write!(f, "catch 0x{:x}", type_idx),
        }
    }
}

/// Per-block dataflow scratch state.
#[derive(Debug, Clone, Default)]
pub struct BasicBlockDataFlow {
    pub use_v: BitSet,
    pub def_v: BitSet,
    pub live_in_v: BitSet,
    pub phi_v: BitSet,
    /// Reaching SSA name of each vreg at block entry.
    pub vreg_to_ssa_map: Vec<i32>,
    /// Reaching SSA name of each vreg at block exit.
    pub vreg_to_ssa_map_exit: Vec<i32>,
    /// SSA names known non-null at block exit; `None` until first computed.
    pub ending_null_check_v: Option<BitSet>,
    /// `(array, index)` pairs known in bounds at block exit.
    pub ending_range_checks: Option<BTreeSet<(i32, i32)>>,
}

impl BasicBlockDataFlow {
    pub fn new(num_vregs: usize) -> Self {
        Self {
            use_v: BitSet::new(num_vregs),
            def_v: BitSet::new(num_vregs),
            live_in_v: BitSet::new(num_vregs),
            phi_v: BitSet::new(num_vregs),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub id: BlockId,
    /// Post-order number among reachable blocks.
    pub dfs_id: Option<usize>,
    pub start_offset: u32,
    pub nesting_depth: u16,
    pub block_type: BlockType,
    pub flags: BlockFlags,
    pub first_mir: Option<MirId>,
    pub last_mir: Option<MirId>,
    pub fall_through: Option<BlockId>,
    pub taken: Option<BlockId>,
    pub successors: SuccessorList,
    /// One entry per incoming edge.
    pub predecessors: Vec<BlockId>,
    pub i_dom: Option<BlockId>,
    pub dominators: BitSet,
    pub i_dominated: BitSet,
    pub dom_frontier: BitSet,
    pub data_flow_info: Option<BasicBlockDataFlow>,
}

impl BasicBlock {
    pub fn new(id: BlockId, block_type: BlockType) -> Self {
        Self {
            id,
            dfs_id: None,
            start_offset: 0,
            nesting_depth: 0,
            block_type,
            flags: BlockFlags::empty(),
            first_mir: None,
            last_mir: None,
            fall_through: None,
            taken: None,
            successors: SuccessorList::default(),
            predecessors: Vec::new(),
            i_dom: None,
            dominators: BitSet::default(),
            i_dominated: BitSet::default(),
            dom_frontier: BitSet::default(),
            data_flow_info: None,
        }
    }

    pub fn is_hidden(&self) -> bool {
        self.flags.contains(BlockFlags::HIDDEN)
    }

    pub fn is_catch_entry(&self) -> bool {
        self.flags.contains(BlockFlags::CATCH_ENTRY)
    }

    pub fn visited(&self) -> bool {
        self.flags.contains(BlockFlags::VISITED)
    }

    /// Successors in traversal order: fall-through, taken, then the list.
    pub fn successor_ids(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.fall_through
            .into_iter()
            .chain(self.taken)
            .chain(self.successors.blocks.iter().map(|s| s.block))
    }

    /// Rewrites every outgoing reference to `old` into `new`.
    pub fn replace_child(&mut self, old: BlockId, new: Option<BlockId>) {
        if self.fall_through == Some(old) {
            self.fall_through = new;
        }
        if self.taken == Some(old) {
            self.taken = new;
        }
        match new {
            Some(new) => {
                for succ in &mut self.successors.blocks {
                    if succ.block == old {
                        succ.block = new;
                    }
                }
            }
            None => {
                self.successors.blocks.retain(|s| s.block != old);
                if self.successors.blocks.is_empty() {
                    self.successors.kind = BlockListType::NotUsed;
                }
            }
        }
    }

    /// Replaces the first occurrence of `old` in the predecessor list.
    pub fn replace_predecessor(&mut self, old: BlockId, new: BlockId) {
        if let Some(slot) = self.predecessors.iter_mut().find(|p| **p == old) {
            *slot = new;
        }
    }

    /// Removes the first occurrence of `pred`.
    pub fn erase_predecessor(&mut self, pred: BlockId) {
        if let Some(pos) = self.predecessors.iter().position(|p| *p == pred) {
            self.predecessors.remove(pos);
        }
    }
}
