//! MIR: one IR instruction
//!
//! A [`Mir`] wraps a decoded instruction plus compiler metadata. MIRs live in
//! the graph's arena and are chained into their block through `next`.
//! Pseudo-ops synthesized by the compiler share the representation and use
//! opcode values above the Dalvik range.

use super::block::BlockId;
use crate::dex::{
    AnalysisAttributes, DataFlowAttributes, DecodedInstruction, InstructionFlags, Opcode,
};
use bitflags::bitflags;
use smallvec::SmallVec;
use std::fmt;

/// Index of a MIR in the graph's instruction arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MirId(pub u32);

impl MirId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// First pseudo-op code, just past the Dalvik opcode space.
pub const MIR_OP_FIRST: u16 = 0x100;

/// Opcode of a MIR: either a Dalvik opcode or a compiler pseudo-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MirOpcode {
    Dalvik(Opcode),
    Phi,
    Copy,
    FusedCmplFloat,
    FusedCmpgFloat,
    FusedCmplDouble,
    FusedCmpgDouble,
    FusedCmpLong,
    Nop,
    NullCheck,
    RangeCheck,
    DivZeroCheck,
    /// Exception-edge half of a split throwing instruction.
    Check,
    CheckPart2,
    Select,
}

impl MirOpcode {
    pub fn code(self) -> u16 {
        match self {
            MirOpcode::Dalvik(op) => op.code() as u16,
            MirOpcode::Phi => MIR_OP_FIRST,
            MirOpcode::Copy => MIR_OP_FIRST + 1,
            MirOpcode::FusedCmplFloat => MIR_OP_FIRST + 2,
            MirOpcode::FusedCmpgFloat => MIR_OP_FIRST + 3,
            MirOpcode::FusedCmplDouble => MIR_OP_FIRST + 4,
            MirOpcode::FusedCmpgDouble => MIR_OP_FIRST + 5,
            MirOpcode::FusedCmpLong => MIR_OP_FIRST + 6,
            MirOpcode::Nop => MIR_OP_FIRST + 7,
            MirOpcode::NullCheck => MIR_OP_FIRST + 8,
            MirOpcode::RangeCheck => MIR_OP_FIRST + 9,
            MirOpcode::DivZeroCheck => MIR_OP_FIRST + 10,
            MirOpcode::Check => MIR_OP_FIRST + 11,
            MirOpcode::CheckPart2 => MIR_OP_FIRST + 12,
            MirOpcode::Select => MIR_OP_FIRST + 13,
        }
    }

    pub fn is_pseudo(self) -> bool {
        !matches!(self, MirOpcode::Dalvik(_))
    }

    pub fn dalvik(self) -> Option<Opcode> {
        match self {
            MirOpcode::Dalvik(op) => Some(op),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            MirOpcode::Dalvik(op) => op.name(),
            MirOpcode::Phi => "Phi",
            MirOpcode::Copy => "Copy",
            MirOpcode::FusedCmplFloat => "FusedCmplFloat",
            MirOpcode::FusedCmpgFloat => "FusedCmpgFloat",
            MirOpcode::FusedCmplDouble => "FusedCmplDouble",
            MirOpcode::FusedCmpgDouble => "FusedCmpgDouble",
            MirOpcode::FusedCmpLong => "FusedCmpLong",
            MirOpcode::Nop => "Nop",
            MirOpcode::NullCheck => "OpNullCheck",
            MirOpcode::RangeCheck => "OpRangeCheck",
            MirOpcode::DivZeroCheck => "OpDivZeroCheck",
            MirOpcode::Check => "Check1",
            MirOpcode::CheckPart2 => "Check2",
            MirOpcode::Select => "Select",
        }
    }

    pub fn flags(self) -> InstructionFlags {
        match self {
            MirOpcode::Dalvik(op) => op.flags(),
            MirOpcode::Check => InstructionFlags::CONTINUE | InstructionFlags::THROW,
            MirOpcode::FusedCmplFloat
            | MirOpcode::FusedCmpgFloat
            | MirOpcode::FusedCmplDouble
            | MirOpcode::FusedCmpgDouble
            | MirOpcode::FusedCmpLong => InstructionFlags::CONTINUE | InstructionFlags::BRANCH,
            _ => InstructionFlags::CONTINUE,
        }
    }

    pub fn dataflow_attributes(self) -> DataFlowAttributes {
        type Df = DataFlowAttributes;
        match self {
            MirOpcode::Dalvik(op) => op.dataflow_attributes(),
            MirOpcode::Phi => Df::DA | Df::NULL_TRANSFER_N,
            MirOpcode::Copy => Df::DA | Df::UB | Df::IS_MOVE,
            MirOpcode::FusedCmplFloat | MirOpcode::FusedCmpgFloat => {
                Df::UA | Df::UB | Df::FP_A | Df::FP_B
            }
            MirOpcode::FusedCmplDouble | MirOpcode::FusedCmpgDouble => {
                Df::UA | Df::A_WIDE | Df::UB | Df::B_WIDE | Df::FP_A | Df::FP_B
            }
            MirOpcode::FusedCmpLong => {
                Df::UA | Df::A_WIDE | Df::UB | Df::B_WIDE | Df::CORE_A | Df::CORE_B
            }
            MirOpcode::NullCheck => Df::UA | Df::REF_A | Df::NULL_CHK_0,
            MirOpcode::RangeCheck => Df::UA | Df::UB,
            MirOpcode::DivZeroCheck => Df::UA,
            MirOpcode::Select => Df::DA | Df::UB,
            MirOpcode::Nop | MirOpcode::Check | MirOpcode::CheckPart2 => Df::empty(),
        }
    }

    pub fn analysis_attributes(self) -> AnalysisAttributes {
        match self {
            MirOpcode::Dalvik(op) => op.analysis_attributes(),
            _ => AnalysisAttributes::empty(),
        }
    }
}

impl fmt::Display for MirOpcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

bitflags! {
    /// Per-instruction optimization results read by code generators.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct OptimizationFlags: u16 {
        const IGNORE_NULL_CHECK    = 1 << 0;
        const NULL_CHECK_ONLY      = 1 << 1;
        const IGNORE_RANGE_CHECK   = 1 << 2;
        const RANGE_CHECK_ONLY     = 1 << 3;
        const INLINED              = 1 << 4;
        const INLINED_PRED         = 1 << 5;
        const CALLEE               = 1 << 6;
        const IGNORE_SUSPEND_CHECK = 1 << 7;
        const DUP                  = 1 << 8;
        const MARK                 = 1 << 9;
    }
}

/// Condition tested by a fused compare-and-branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConditionCode {
    Eq,
    Ne,
    Lt,
    Ge,
    Gt,
    Le,
}

impl ConditionCode {
    /// Condition of an `if-testz` opcode.
    pub fn for_if_z(op: Opcode) -> Option<ConditionCode> {
        Some(match op {
            Opcode::IfEqz => ConditionCode::Eq,
            Opcode::IfNez => ConditionCode::Ne,
            Opcode::IfLtz => ConditionCode::Lt,
            Opcode::IfGez => ConditionCode::Ge,
            Opcode::IfGtz => ConditionCode::Gt,
            Opcode::IfLez => ConditionCode::Le,
            _ => return None,
        })
    }

    pub fn negate(self) -> ConditionCode {
        match self {
            ConditionCode::Eq => ConditionCode::Ne,
            ConditionCode::Ne => ConditionCode::Eq,
            ConditionCode::Lt => ConditionCode::Ge,
            ConditionCode::Ge => ConditionCode::Lt,
            ConditionCode::Gt => ConditionCode::Le,
            ConditionCode::Le => ConditionCode::Gt,
        }
    }
}

/// Opcode-specific side data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum MirMeta {
    #[default]
    None,
    /// Predecessor block of each phi operand, parallel to `ssa_rep.uses`.
    PhiIncoming(Vec<BlockId>),
    /// Work half paired with a `Check` pseudo-op.
    ThrowInsn(MirId),
    /// Condition of a fused compare-and-branch.
    Condition(ConditionCode),
}

/// SSA operands of one MIR.
///
/// Wide operands take two slots, low word first, so `add-long v0, v2, v4`
/// has four uses and two defs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SsaRepresentation {
    pub uses: SmallVec<[i32; 4]>,
    pub fp_use: SmallVec<[bool; 4]>,
    pub defs: SmallVec<[i32; 2]>,
    pub fp_def: SmallVec<[bool; 2]>,
}

impl SsaRepresentation {
    /// Number of source operands with each wide pair counted once.
    pub fn logical_use_count(&self, attrs: DataFlowAttributes) -> usize {
        if attrs.intersects(DataFlowAttributes::FORMAT_35C | DataFlowAttributes::FORMAT_3RC) {
            return self.uses.len();
        }
        if !attrs.intersects(DataFlowAttributes::HAS_USES) {
            return self.uses.len();
        }
        [
            DataFlowAttributes::UA,
            DataFlowAttributes::UB,
            DataFlowAttributes::UC,
        ]
        .into_iter()
        .filter(|slot| attrs.contains(*slot))
        .count()
    }
}

/// One IR instruction.
#[derive(Debug, Clone)]
pub struct Mir {
    pub opcode: MirOpcode,
    /// Operands as decoded. `dalvik_insn.opcode` keeps the original opcode
    /// even after the MIR is rewritten to a pseudo-op.
    pub dalvik_insn: DecodedInstruction,
    pub offset: u32,
    pub width: u32,
    pub optimization_flags: OptimizationFlags,
    pub next: Option<MirId>,
    /// Owning block, `None` once detached.
    pub bb: Option<BlockId>,
    /// Index of the method unit this instruction came from.
    pub m_unit_index: usize,
    pub ssa_rep: Option<SsaRepresentation>,
    pub meta: MirMeta,
}

impl Mir {
    pub fn new(insn: DecodedInstruction, offset: u32) -> Self {
        Self {
            opcode: MirOpcode::Dalvik(insn.opcode),
            width: insn.opcode.width(),
            dalvik_insn: insn,
            offset,
            optimization_flags: OptimizationFlags::empty(),
            next: None,
            bb: None,
            m_unit_index: 0,
            ssa_rep: None,
            meta: MirMeta::None,
        }
    }

    /// A phi for virtual register `vreg`.
    pub fn phi(vreg: u32, offset: u32) -> Self {
        let mut mir = Self::new(DecodedInstruction::new(Opcode::Nop, vreg, 0, 0), offset);
        mir.opcode = MirOpcode::Phi;
        mir.width = 0;
        mir
    }

    pub fn dataflow_attributes(&self) -> DataFlowAttributes {
        self.opcode.dataflow_attributes()
    }

    pub fn is_phi(&self) -> bool {
        self.opcode == MirOpcode::Phi
    }

    pub fn phi_incoming(&self) -> &[BlockId] {
        match &self.meta {
            MirMeta::PhiIncoming(list) => list,
            _ => &[],
        }
    }

    pub fn throw_insn(&self) -> Option<MirId> {
        match self.meta {
            MirMeta::ThrowInsn(id) => Some(id),
            _ => None,
        }
    }

    pub fn uses(&self) -> &[i32] {
        self.ssa_rep.as_ref().map_or(&[], |rep| &rep.uses)
    }

    pub fn defs(&self) -> &[i32] {
        self.ssa_rep.as_ref().map_or(&[], |rep| &rep.defs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pseudo_op_codes_are_outside_dalvik_range() {
        assert_eq!(MirOpcode::Phi.code(), 0x100);
        assert!(MirOpcode::Check.code() > 0xff);
        assert_eq!(MirOpcode::Dalvik(Opcode::AddInt).code(), 0x90);
        assert!(MirOpcode::Check.is_pseudo());
    }

    #[test]
    fn test_check_pseudo_op_has_no_operands() {
        assert!(MirOpcode::Check.dataflow_attributes().is_empty());
        assert!(MirOpcode::Phi
            .dataflow_attributes()
            .contains(DataFlowAttributes::NULL_TRANSFER_N));
    }

    #[test]
    fn test_logical_use_count_collapses_pairs() {
        let rep = SsaRepresentation {
            uses: SmallVec::from_slice(&[2, 3, 4, 5]),
            fp_use: SmallVec::from_slice(&[false; 4]),
            defs: SmallVec::from_slice(&[6, 7]),
            fp_def: SmallVec::from_slice(&[false; 2]),
        };
        assert_eq!(rep.logical_use_count(Opcode::AddLong.dataflow_attributes()), 2);
    }
}
