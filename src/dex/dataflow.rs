//! Per-opcode dataflow and analysis attributes
//!
//! Every opcode (including the compiler's pseudo-ops) carries a
//! [`DataFlowAttributes`] set describing which operand slots it reads and
//! writes, their types, and which runtime checks it performs. The SSA
//! converter, type inference and check elimination are all driven from
//! this table rather than from per-opcode code.

use bitflags::bitflags;

bitflags! {
    /// Operand usage, type and check information for one opcode.
    ///
    /// Null/range check bits name the *position in the SSA use array* of the
    /// checked operand, so wide operands shift them (e.g. `aput-wide` null
    /// checks use 2 and range checks use 3).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DataFlowAttributes: u64 {
        const UA              = 1 << 0;
        const UB              = 1 << 1;
        const UC              = 1 << 2;
        const A_WIDE          = 1 << 3;
        const B_WIDE          = 1 << 4;
        const C_WIDE          = 1 << 5;
        const DA              = 1 << 6;
        const IS_MOVE         = 1 << 7;
        const SETS_CONST      = 1 << 8;
        const FORMAT_35C      = 1 << 9;
        const FORMAT_3RC      = 1 << 10;
        const NULL_CHK_0      = 1 << 11;
        const NULL_CHK_1      = 1 << 12;
        const NULL_CHK_2      = 1 << 13;
        const NULL_CHK_OUT0   = 1 << 14;
        const NON_NULL_DST    = 1 << 15;
        const NON_NULL_RET    = 1 << 16;
        const NULL_TRANSFER_0 = 1 << 17;
        const NULL_TRANSFER_N = 1 << 18;
        const RANGE_CHK_1     = 1 << 19;
        const RANGE_CHK_2     = 1 << 20;
        const RANGE_CHK_3     = 1 << 21;
        const FP_A            = 1 << 22;
        const FP_B            = 1 << 23;
        const FP_C            = 1 << 24;
        const CORE_A          = 1 << 25;
        const CORE_B          = 1 << 26;
        const CORE_C          = 1 << 27;
        const REF_A           = 1 << 28;
        const REF_B           = 1 << 29;
        const REF_C           = 1 << 30;
        /// Implicitly reads the current method pointer.
        const UMS             = 1 << 31;

        const HAS_USES = Self::UA.bits() | Self::UB.bits() | Self::UC.bits();
        const HAS_DEFS = Self::DA.bits();
        const HAS_NULL_CHKS = Self::NULL_CHK_0.bits()
            | Self::NULL_CHK_1.bits()
            | Self::NULL_CHK_2.bits()
            | Self::NULL_CHK_OUT0.bits();
        const HAS_RANGE_CHKS =
            Self::RANGE_CHK_1.bits() | Self::RANGE_CHK_2.bits() | Self::RANGE_CHK_3.bits();
        const NULL_TRANSFER = Self::NULL_TRANSFER_0.bits() | Self::NULL_TRANSFER_N.bits();
        const USES_FP = Self::FP_A.bits() | Self::FP_B.bits() | Self::FP_C.bits();
    }
}

impl DataFlowAttributes {
    /// Use-array position of the operand whose nullness is checked.
    pub fn null_check_operand(self) -> Option<usize> {
        if !self.intersects(Self::HAS_NULL_CHKS) {
            None
        } else if self.contains(Self::NULL_CHK_1) {
            Some(1)
        } else if self.contains(Self::NULL_CHK_2) {
            Some(2)
        } else {
            Some(0)
        }
    }

    /// Use-array position of the index operand of a bounds-checked access.
    pub fn range_check_operand(self) -> Option<usize> {
        if self.contains(Self::RANGE_CHK_1) {
            Some(1)
        } else if self.contains(Self::RANGE_CHK_2) {
            Some(2)
        } else if self.contains(Self::RANGE_CHK_3) {
            Some(3)
        } else {
            None
        }
    }
}

bitflags! {
    /// Coarse opcode classes used by the compile-or-interpret heuristics.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AnalysisAttributes: u32 {
        const UNINTERESTING = 1 << 0;
        const MATH          = 1 << 1;
        const FP            = 1 << 2;
        const SINGLE        = 1 << 3;
        const DOUBLE        = 1 << 4;
        const INT           = 1 << 5;
        const LONG          = 1 << 6;
        const BRANCH        = 1 << 7;
        const INVOKE        = 1 << 8;
        const ARRAY_OP      = 1 << 9;
        const HEAVYWEIGHT   = 1 << 10;
        const SIMPLE_CONST  = 1 << 11;
        const MOVE          = 1 << 12;
        const SWITCH        = 1 << 13;

        const COMPUTATIONAL = Self::MATH.bits()
            | Self::ARRAY_OP.bits()
            | Self::MOVE.bits()
            | Self::SIMPLE_CONST.bits();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::Opcode;

    #[test]
    fn test_checked_operand_positions() {
        assert_eq!(Opcode::Aget.dataflow_attributes().null_check_operand(), Some(0));
        assert_eq!(Opcode::Aget.dataflow_attributes().range_check_operand(), Some(1));
        assert_eq!(Opcode::Aput.dataflow_attributes().null_check_operand(), Some(1));
        assert_eq!(Opcode::AputWide.dataflow_attributes().null_check_operand(), Some(2));
        assert_eq!(Opcode::AputWide.dataflow_attributes().range_check_operand(), Some(3));
        assert_eq!(
            Opcode::InvokeVirtual.dataflow_attributes().null_check_operand(),
            Some(0)
        );
        assert_eq!(Opcode::InvokeStatic.dataflow_attributes().null_check_operand(), None);
    }

    #[test]
    fn test_wide_arithmetic_attributes() {
        let attrs = Opcode::AddLong.dataflow_attributes();
        assert!(attrs.contains(
            DataFlowAttributes::DA
                | DataFlowAttributes::A_WIDE
                | DataFlowAttributes::B_WIDE
                | DataFlowAttributes::C_WIDE
        ));
        let shift = Opcode::ShlLong.dataflow_attributes();
        assert!(!shift.contains(DataFlowAttributes::C_WIDE));
    }
}
