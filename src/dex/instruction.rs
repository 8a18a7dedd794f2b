//! Decoded Dalvik instructions
//!
//! The container parser is an external collaborator: this crate consumes
//! instructions that are already decoded into their operand slots
//! (`vA`, `vB`, `vC`, argument list, switch payload). The opcode table below
//! is the single source of truth for each opcode's mnemonic, encoding
//! format, control-flow behaviour, dataflow attributes and analysis class.

use super::dataflow::{AnalysisAttributes, DataFlowAttributes};
use bitflags::bitflags;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use smallvec::SmallVec;
use std::fmt;

bitflags! {
    /// Control-flow behaviour of an opcode.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct InstructionFlags: u8 {
        /// Execution may continue with the next instruction.
        const CONTINUE      = 1 << 0;
        const BRANCH        = 1 << 1;
        const UNCONDITIONAL = 1 << 2;
        const SWITCH        = 1 << 3;
        const THROW         = 1 << 4;
        const RETURN        = 1 << 5;
        const INVOKE        = 1 << 6;
    }
}

/// Instruction encoding format. Only the width and operand layout matter here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    K10x,
    K12x,
    K11n,
    K11x,
    K10t,
    K20t,
    K22x,
    K21t,
    K21s,
    K21h,
    K21c,
    K23x,
    K22b,
    K22t,
    K22s,
    K22c,
    K32x,
    K30t,
    K31t,
    K31i,
    K31c,
    K35c,
    K3rc,
    K51l,
}

impl Format {
    /// Width of an instruction in this format, in 16-bit code units.
    pub fn width(self) -> u32 {
        match self {
            Format::K10x | Format::K12x | Format::K11n | Format::K11x | Format::K10t => 1,
            Format::K20t
            | Format::K22x
            | Format::K21t
            | Format::K21s
            | Format::K21h
            | Format::K21c
            | Format::K23x
            | Format::K22b
            | Format::K22t
            | Format::K22s
            | Format::K22c => 2,
            Format::K32x
            | Format::K30t
            | Format::K31t
            | Format::K31i
            | Format::K31c
            | Format::K35c
            | Format::K3rc => 3,
            Format::K51l => 5,
        }
    }
}

macro_rules! dalvik_opcodes {
    ($(
        $code:literal $variant:ident $name:literal $format:ident
            [$($flag:ident)*] [$($df:ident)*] [$($an:ident)*];
    )*) => {
        /// A Dalvik bytecode opcode.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(u8)]
        pub enum Opcode {
            $($variant = $code,)*
        }

        impl Opcode {
            /// Every opcode in the table, in encoding order.
            pub const ALL: &'static [Opcode] = &[$(Opcode::$variant,)*];

            /// The opcode's encoding value.
            pub fn code(self) -> u8 {
                self as u8
            }

            /// The assembler mnemonic, e.g. `"add-int/2addr"`.
            pub fn name(self) -> &'static str {
                match self {
                    $(Opcode::$variant => $name,)*
                }
            }

            pub fn format(self) -> Format {
                match self {
                    $(Opcode::$variant => Format::$format,)*
                }
            }

            pub fn flags(self) -> InstructionFlags {
                match self {
                    $(Opcode::$variant => InstructionFlags::empty()
                        $(.union(InstructionFlags::$flag))*,)*
                }
            }

            pub fn dataflow_attributes(self) -> DataFlowAttributes {
                match self {
                    $(Opcode::$variant => DataFlowAttributes::empty()
                        $(.union(DataFlowAttributes::$df))*,)*
                }
            }

            pub fn analysis_attributes(self) -> AnalysisAttributes {
                match self {
                    $(Opcode::$variant => AnalysisAttributes::empty()
                        $(.union(AnalysisAttributes::$an))*,)*
                }
            }

            pub fn from_code(code: u8) -> Option<Opcode> {
                match code {
                    $($code => Some(Opcode::$variant),)*
                    _ => None,
                }
            }

            pub fn from_name(name: &str) -> Option<Opcode> {
                match name {
                    $($name => Some(Opcode::$variant),)*
                    _ => None,
                }
            }
        }
    };
}

dalvik_opcodes! {
    0x00 Nop "nop" K10x [CONTINUE] [] [UNINTERESTING];
    0x01 Move "move" K12x [CONTINUE] [DA UB IS_MOVE] [MOVE];
    0x02 MoveFrom16 "move/from16" K22x [CONTINUE] [DA UB IS_MOVE] [MOVE];
    0x03 Move16 "move/16" K32x [CONTINUE] [DA UB IS_MOVE] [MOVE];
    0x04 MoveWide "move-wide" K12x [CONTINUE] [DA A_WIDE UB B_WIDE IS_MOVE] [MOVE];
    0x05 MoveWideFrom16 "move-wide/from16" K22x [CONTINUE] [DA A_WIDE UB B_WIDE IS_MOVE] [MOVE];
    0x06 MoveWide16 "move-wide/16" K32x [CONTINUE] [DA A_WIDE UB B_WIDE IS_MOVE] [MOVE];
    0x07 MoveObject "move-object" K12x [CONTINUE] [DA UB NULL_TRANSFER_0 IS_MOVE REF_A REF_B] [MOVE];
    0x08 MoveObjectFrom16 "move-object/from16" K22x [CONTINUE] [DA UB NULL_TRANSFER_0 IS_MOVE REF_A REF_B] [MOVE];
    0x09 MoveObject16 "move-object/16" K32x [CONTINUE] [DA UB NULL_TRANSFER_0 IS_MOVE REF_A REF_B] [MOVE];
    0x0a MoveResult "move-result" K11x [CONTINUE] [DA] [MOVE];
    0x0b MoveResultWide "move-result-wide" K11x [CONTINUE] [DA A_WIDE] [MOVE];
    0x0c MoveResultObject "move-result-object" K11x [CONTINUE] [DA REF_A] [MOVE];
    0x0d MoveException "move-exception" K11x [CONTINUE] [DA REF_A NON_NULL_DST] [MOVE];
    0x0e ReturnVoid "return-void" K10x [RETURN] [] [BRANCH];
    0x0f Return "return" K11x [RETURN] [UA] [BRANCH];
    0x10 ReturnWide "return-wide" K11x [RETURN] [UA A_WIDE] [BRANCH];
    0x11 ReturnObject "return-object" K11x [RETURN] [UA REF_A] [BRANCH];
    0x12 Const4 "const/4" K11n [CONTINUE] [DA SETS_CONST] [SIMPLE_CONST];
    0x13 Const16 "const/16" K21s [CONTINUE] [DA SETS_CONST] [SIMPLE_CONST];
    0x14 Const "const" K31i [CONTINUE] [DA SETS_CONST] [SIMPLE_CONST];
    0x15 ConstHigh16 "const/high16" K21h [CONTINUE] [DA SETS_CONST] [SIMPLE_CONST];
    0x16 ConstWide16 "const-wide/16" K21s [CONTINUE] [DA A_WIDE SETS_CONST] [SIMPLE_CONST];
    0x17 ConstWide32 "const-wide/32" K31i [CONTINUE] [DA A_WIDE SETS_CONST] [SIMPLE_CONST];
    0x18 ConstWide "const-wide" K51l [CONTINUE] [DA A_WIDE SETS_CONST] [SIMPLE_CONST];
    0x19 ConstWideHigh16 "const-wide/high16" K21h [CONTINUE] [DA A_WIDE SETS_CONST] [SIMPLE_CONST];
    0x1a ConstString "const-string" K21c [CONTINUE THROW] [DA REF_A NON_NULL_DST] [UNINTERESTING];
    0x1b ConstStringJumbo "const-string/jumbo" K31c [CONTINUE THROW] [DA REF_A NON_NULL_DST] [UNINTERESTING];
    0x1c ConstClass "const-class" K21c [CONTINUE THROW] [DA REF_A NON_NULL_DST] [UNINTERESTING];
    0x1d MonitorEnter "monitor-enter" K11x [CONTINUE THROW] [UA NULL_CHK_0 REF_A] [UNINTERESTING];
    0x1e MonitorExit "monitor-exit" K11x [CONTINUE THROW] [UA NULL_CHK_0 REF_A] [UNINTERESTING];
    0x1f CheckCast "check-cast" K21c [CONTINUE THROW] [UA REF_A UMS] [UNINTERESTING];
    0x20 InstanceOf "instance-of" K22c [CONTINUE THROW] [DA UB CORE_A REF_B UMS] [UNINTERESTING];
    0x21 ArrayLength "array-length" K12x [CONTINUE THROW] [DA UB NULL_CHK_0 CORE_A REF_B] [ARRAY_OP];
    0x22 NewInstance "new-instance" K21c [CONTINUE THROW] [DA NON_NULL_DST REF_A UMS] [HEAVYWEIGHT];
    0x23 NewArray "new-array" K22c [CONTINUE THROW] [DA UB NON_NULL_DST REF_A CORE_B UMS] [HEAVYWEIGHT];
    0x24 FilledNewArray "filled-new-array" K35c [CONTINUE THROW] [FORMAT_35C NON_NULL_RET UMS] [HEAVYWEIGHT];
    0x25 FilledNewArrayRange "filled-new-array/range" K3rc [CONTINUE THROW] [FORMAT_3RC NON_NULL_RET UMS] [HEAVYWEIGHT];
    0x26 FillArrayData "fill-array-data" K31t [CONTINUE THROW] [UA REF_A UMS] [UNINTERESTING];
    0x27 Throw "throw" K11x [THROW] [UA REF_A UMS] [HEAVYWEIGHT BRANCH];
    0x28 Goto "goto" K10t [BRANCH UNCONDITIONAL] [] [BRANCH];
    0x29 Goto16 "goto/16" K20t [BRANCH UNCONDITIONAL] [] [BRANCH];
    0x2a Goto32 "goto/32" K30t [BRANCH UNCONDITIONAL] [] [BRANCH];
    0x2b PackedSwitch "packed-switch" K31t [CONTINUE SWITCH] [UA CORE_A] [SWITCH];
    0x2c SparseSwitch "sparse-switch" K31t [CONTINUE SWITCH] [UA CORE_A] [SWITCH];
    0x2d CmplFloat "cmpl-float" K23x [CONTINUE] [DA UB UC FP_B FP_C CORE_A] [MATH FP SINGLE];
    0x2e CmpgFloat "cmpg-float" K23x [CONTINUE] [DA UB UC FP_B FP_C CORE_A] [MATH FP SINGLE];
    0x2f CmplDouble "cmpl-double" K23x [CONTINUE] [DA UB B_WIDE UC C_WIDE FP_B FP_C CORE_A] [MATH FP DOUBLE];
    0x30 CmpgDouble "cmpg-double" K23x [CONTINUE] [DA UB B_WIDE UC C_WIDE FP_B FP_C CORE_A] [MATH FP DOUBLE];
    0x31 CmpLong "cmp-long" K23x [CONTINUE] [DA UB B_WIDE UC C_WIDE CORE_A CORE_B CORE_C] [MATH LONG];
    0x32 IfEq "if-eq" K22t [CONTINUE BRANCH] [UA UB] [MATH BRANCH INT];
    0x33 IfNe "if-ne" K22t [CONTINUE BRANCH] [UA UB] [MATH BRANCH INT];
    0x34 IfLt "if-lt" K22t [CONTINUE BRANCH] [UA UB CORE_A CORE_B] [MATH BRANCH INT];
    0x35 IfGe "if-ge" K22t [CONTINUE BRANCH] [UA UB CORE_A CORE_B] [MATH BRANCH INT];
    0x36 IfGt "if-gt" K22t [CONTINUE BRANCH] [UA UB CORE_A CORE_B] [MATH BRANCH INT];
    0x37 IfLe "if-le" K22t [CONTINUE BRANCH] [UA UB CORE_A CORE_B] [MATH BRANCH INT];
    0x38 IfEqz "if-eqz" K21t [CONTINUE BRANCH] [UA] [MATH BRANCH INT];
    0x39 IfNez "if-nez" K21t [CONTINUE BRANCH] [UA] [MATH BRANCH INT];
    0x3a IfLtz "if-ltz" K21t [CONTINUE BRANCH] [UA CORE_A] [MATH BRANCH INT];
    0x3b IfGez "if-gez" K21t [CONTINUE BRANCH] [UA CORE_A] [MATH BRANCH INT];
    0x3c IfGtz "if-gtz" K21t [CONTINUE BRANCH] [UA CORE_A] [MATH BRANCH INT];
    0x3d IfLez "if-lez" K21t [CONTINUE BRANCH] [UA CORE_A] [MATH BRANCH INT];
    0x44 Aget "aget" K23x [CONTINUE THROW] [DA UB UC NULL_CHK_0 RANGE_CHK_1 REF_B CORE_C] [ARRAY_OP];
    0x45 AgetWide "aget-wide" K23x [CONTINUE THROW] [DA A_WIDE UB UC NULL_CHK_0 RANGE_CHK_1 REF_B CORE_C] [ARRAY_OP];
    0x46 AgetObject "aget-object" K23x [CONTINUE THROW] [DA UB UC NULL_CHK_0 RANGE_CHK_1 REF_A REF_B CORE_C] [ARRAY_OP];
    0x47 AgetBoolean "aget-boolean" K23x [CONTINUE THROW] [DA UB UC NULL_CHK_0 RANGE_CHK_1 CORE_A REF_B CORE_C] [ARRAY_OP];
    0x48 AgetByte "aget-byte" K23x [CONTINUE THROW] [DA UB UC NULL_CHK_0 RANGE_CHK_1 CORE_A REF_B CORE_C] [ARRAY_OP];
    0x49 AgetChar "aget-char" K23x [CONTINUE THROW] [DA UB UC NULL_CHK_0 RANGE_CHK_1 CORE_A REF_B CORE_C] [ARRAY_OP];
    0x4a AgetShort "aget-short" K23x [CONTINUE THROW] [DA UB UC NULL_CHK_0 RANGE_CHK_1 CORE_A REF_B CORE_C] [ARRAY_OP];
    0x4b Aput "aput" K23x [CONTINUE THROW] [UA UB UC NULL_CHK_1 RANGE_CHK_2 REF_B CORE_C] [ARRAY_OP];
    0x4c AputWide "aput-wide" K23x [CONTINUE THROW] [UA A_WIDE UB UC NULL_CHK_2 RANGE_CHK_3 REF_B CORE_C] [ARRAY_OP];
    0x4d AputObject "aput-object" K23x [CONTINUE THROW] [UA UB UC NULL_CHK_1 RANGE_CHK_2 REF_A REF_B CORE_C] [ARRAY_OP];
    0x4e AputBoolean "aput-boolean" K23x [CONTINUE THROW] [UA UB UC NULL_CHK_1 RANGE_CHK_2 CORE_A REF_B CORE_C] [ARRAY_OP];
    0x4f AputByte "aput-byte" K23x [CONTINUE THROW] [UA UB UC NULL_CHK_1 RANGE_CHK_2 CORE_A REF_B CORE_C] [ARRAY_OP];
    0x50 AputChar "aput-char" K23x [CONTINUE THROW] [UA UB UC NULL_CHK_1 RANGE_CHK_2 CORE_A REF_B CORE_C] [ARRAY_OP];
    0x51 AputShort "aput-short" K23x [CONTINUE THROW] [UA UB UC NULL_CHK_1 RANGE_CHK_2 CORE_A REF_B CORE_C] [ARRAY_OP];
    0x52 Iget "iget" K22c [CONTINUE THROW] [DA UB NULL_CHK_0 REF_B] [UNINTERESTING];
    0x53 IgetWide "iget-wide" K22c [CONTINUE THROW] [DA A_WIDE UB NULL_CHK_0 REF_B] [UNINTERESTING];
    0x54 IgetObject "iget-object" K22c [CONTINUE THROW] [DA UB NULL_CHK_0 REF_A REF_B] [UNINTERESTING];
    0x55 IgetBoolean "iget-boolean" K22c [CONTINUE THROW] [DA UB NULL_CHK_0 CORE_A REF_B] [UNINTERESTING];
    0x56 IgetByte "iget-byte" K22c [CONTINUE THROW] [DA UB NULL_CHK_0 CORE_A REF_B] [UNINTERESTING];
    0x57 IgetChar "iget-char" K22c [CONTINUE THROW] [DA UB NULL_CHK_0 CORE_A REF_B] [UNINTERESTING];
    0x58 IgetShort "iget-short" K22c [CONTINUE THROW] [DA UB NULL_CHK_0 CORE_A REF_B] [UNINTERESTING];
    0x59 Iput "iput" K22c [CONTINUE THROW] [UA UB NULL_CHK_1 REF_B] [UNINTERESTING];
    0x5a IputWide "iput-wide" K22c [CONTINUE THROW] [UA A_WIDE UB NULL_CHK_2 REF_B] [UNINTERESTING];
    0x5b IputObject "iput-object" K22c [CONTINUE THROW] [UA UB NULL_CHK_1 REF_A REF_B] [UNINTERESTING];
    0x5c IputBoolean "iput-boolean" K22c [CONTINUE THROW] [UA UB NULL_CHK_1 CORE_A REF_B] [UNINTERESTING];
    0x5d IputByte "iput-byte" K22c [CONTINUE THROW] [UA UB NULL_CHK_1 CORE_A REF_B] [UNINTERESTING];
    0x5e IputChar "iput-char" K22c [CONTINUE THROW] [UA UB NULL_CHK_1 CORE_A REF_B] [UNINTERESTING];
    0x5f IputShort "iput-short" K22c [CONTINUE THROW] [UA UB NULL_CHK_1 CORE_A REF_B] [UNINTERESTING];
    0x60 Sget "sget" K21c [CONTINUE THROW] [DA UMS] [UNINTERESTING];
    0x61 SgetWide "sget-wide" K21c [CONTINUE THROW] [DA A_WIDE UMS] [UNINTERESTING];
    0x62 SgetObject "sget-object" K21c [CONTINUE THROW] [DA REF_A UMS] [UNINTERESTING];
    0x63 SgetBoolean "sget-boolean" K21c [CONTINUE THROW] [DA CORE_A UMS] [UNINTERESTING];
    0x64 SgetByte "sget-byte" K21c [CONTINUE THROW] [DA CORE_A UMS] [UNINTERESTING];
    0x65 SgetChar "sget-char" K21c [CONTINUE THROW] [DA CORE_A UMS] [UNINTERESTING];
    0x66 SgetShort "sget-short" K21c [CONTINUE THROW] [DA CORE_A UMS] [UNINTERESTING];
    0x67 Sput "sput" K21c [CONTINUE THROW] [UA UMS] [UNINTERESTING];
    0x68 SputWide "sput-wide" K21c [CONTINUE THROW] [UA A_WIDE UMS] [UNINTERESTING];
    0x69 SputObject "sput-object" K21c [CONTINUE THROW] [UA REF_A UMS] [UNINTERESTING];
    0x6a SputBoolean "sput-boolean" K21c [CONTINUE THROW] [UA CORE_A UMS] [UNINTERESTING];
    0x6b SputByte "sput-byte" K21c [CONTINUE THROW] [UA CORE_A UMS] [UNINTERESTING];
    0x6c SputChar "sput-char" K21c [CONTINUE THROW] [UA CORE_A UMS] [UNINTERESTING];
    0x6d SputShort "sput-short" K21c [CONTINUE THROW] [UA CORE_A UMS] [UNINTERESTING];
    0x6e InvokeVirtual "invoke-virtual" K35c [CONTINUE THROW INVOKE] [FORMAT_35C NULL_CHK_OUT0 UMS] [INVOKE HEAVYWEIGHT];
    0x6f InvokeSuper "invoke-super" K35c [CONTINUE THROW INVOKE] [FORMAT_35C NULL_CHK_OUT0 UMS] [INVOKE HEAVYWEIGHT];
    0x70 InvokeDirect "invoke-direct" K35c [CONTINUE THROW INVOKE] [FORMAT_35C NULL_CHK_OUT0 UMS] [INVOKE HEAVYWEIGHT];
    0x71 InvokeStatic "invoke-static" K35c [CONTINUE THROW INVOKE] [FORMAT_35C UMS] [INVOKE HEAVYWEIGHT];
    0x72 InvokeInterface "invoke-interface" K35c [CONTINUE THROW INVOKE] [FORMAT_35C NULL_CHK_OUT0 UMS] [INVOKE HEAVYWEIGHT];
    0x74 InvokeVirtualRange "invoke-virtual/range" K3rc [CONTINUE THROW INVOKE] [FORMAT_3RC NULL_CHK_OUT0 UMS] [INVOKE HEAVYWEIGHT];
    0x75 InvokeSuperRange "invoke-super/range" K3rc [CONTINUE THROW INVOKE] [FORMAT_3RC NULL_CHK_OUT0 UMS] [INVOKE HEAVYWEIGHT];
    0x76 InvokeDirectRange "invoke-direct/range" K3rc [CONTINUE THROW INVOKE] [FORMAT_3RC NULL_CHK_OUT0 UMS] [INVOKE HEAVYWEIGHT];
    0x77 InvokeStaticRange "invoke-static/range" K3rc [CONTINUE THROW INVOKE] [FORMAT_3RC UMS] [INVOKE HEAVYWEIGHT];
    0x78 InvokeInterfaceRange "invoke-interface/range" K3rc [CONTINUE THROW INVOKE] [FORMAT_3RC NULL_CHK_OUT0 UMS] [INVOKE HEAVYWEIGHT];
    0x7b NegInt "neg-int" K12x [CONTINUE] [DA UB CORE_A CORE_B] [MATH INT];
    0x7c NotInt "not-int" K12x [CONTINUE] [DA UB CORE_A CORE_B] [MATH INT];
    0x7d NegLong "neg-long" K12x [CONTINUE] [DA A_WIDE UB B_WIDE CORE_A CORE_B] [MATH LONG];
    0x7e NotLong "not-long" K12x [CONTINUE] [DA A_WIDE UB B_WIDE CORE_A CORE_B] [MATH LONG];
    0x7f NegFloat "neg-float" K12x [CONTINUE] [DA UB FP_A FP_B] [MATH FP SINGLE];
    0x80 NegDouble "neg-double" K12x [CONTINUE] [DA A_WIDE UB B_WIDE FP_A FP_B] [MATH FP DOUBLE];
    0x81 IntToLong "int-to-long" K12x [CONTINUE] [DA A_WIDE UB CORE_A CORE_B] [MATH INT LONG];
    0x82 IntToFloat "int-to-float" K12x [CONTINUE] [DA UB FP_A CORE_B] [MATH FP INT SINGLE];
    0x83 IntToDouble "int-to-double" K12x [CONTINUE] [DA A_WIDE UB FP_A CORE_B] [MATH FP INT DOUBLE];
    0x84 LongToInt "long-to-int" K12x [CONTINUE] [DA UB B_WIDE CORE_A CORE_B] [MATH INT LONG];
    0x85 LongToFloat "long-to-float" K12x [CONTINUE] [DA UB B_WIDE FP_A CORE_B] [MATH FP LONG SINGLE];
    0x86 LongToDouble "long-to-double" K12x [CONTINUE] [DA A_WIDE UB B_WIDE FP_A CORE_B] [MATH FP LONG DOUBLE];
    0x87 FloatToInt "float-to-int" K12x [CONTINUE] [DA UB FP_B CORE_A] [MATH FP INT SINGLE];
    0x88 FloatToLong "float-to-long" K12x [CONTINUE] [DA A_WIDE UB FP_B CORE_A] [MATH FP LONG SINGLE];
    0x89 FloatToDouble "float-to-double" K12x [CONTINUE] [DA A_WIDE UB FP_A FP_B] [MATH FP SINGLE DOUBLE];
    0x8a DoubleToInt "double-to-int" K12x [CONTINUE] [DA UB B_WIDE FP_B CORE_A] [MATH FP INT DOUBLE];
    0x8b DoubleToLong "double-to-long" K12x [CONTINUE] [DA A_WIDE UB B_WIDE FP_B CORE_A] [MATH FP LONG DOUBLE];
    0x8c DoubleToFloat "double-to-float" K12x [CONTINUE] [DA UB B_WIDE FP_A FP_B] [MATH FP SINGLE DOUBLE];
    0x8d IntToByte "int-to-byte" K12x [CONTINUE] [DA UB CORE_A CORE_B] [MATH INT];
    0x8e IntToChar "int-to-char" K12x [CONTINUE] [DA UB CORE_A CORE_B] [MATH INT];
    0x8f IntToShort "int-to-short" K12x [CONTINUE] [DA UB CORE_A CORE_B] [MATH INT];
    0x90 AddInt "add-int" K23x [CONTINUE] [DA UB UC CORE_A CORE_B CORE_C] [MATH INT];
    0x91 SubInt "sub-int" K23x [CONTINUE] [DA UB UC CORE_A CORE_B CORE_C] [MATH INT];
    0x92 MulInt "mul-int" K23x [CONTINUE] [DA UB UC CORE_A CORE_B CORE_C] [MATH INT];
    0x93 DivInt "div-int" K23x [CONTINUE THROW] [DA UB UC CORE_A CORE_B CORE_C] [MATH INT];
    0x94 RemInt "rem-int" K23x [CONTINUE THROW] [DA UB UC CORE_A CORE_B CORE_C] [MATH INT];
    0x95 AndInt "and-int" K23x [CONTINUE] [DA UB UC CORE_A CORE_B CORE_C] [MATH INT];
    0x96 OrInt "or-int" K23x [CONTINUE] [DA UB UC CORE_A CORE_B CORE_C] [MATH INT];
    0x97 XorInt "xor-int" K23x [CONTINUE] [DA UB UC CORE_A CORE_B CORE_C] [MATH INT];
    0x98 ShlInt "shl-int" K23x [CONTINUE] [DA UB UC CORE_A CORE_B CORE_C] [MATH INT];
    0x99 ShrInt "shr-int" K23x [CONTINUE] [DA UB UC CORE_A CORE_B CORE_C] [MATH INT];
    0x9a UshrInt "ushr-int" K23x [CONTINUE] [DA UB UC CORE_A CORE_B CORE_C] [MATH INT];
    0x9b AddLong "add-long" K23x [CONTINUE] [DA A_WIDE UB B_WIDE UC C_WIDE CORE_A CORE_B CORE_C] [MATH LONG];
    0x9c SubLong "sub-long" K23x [CONTINUE] [DA A_WIDE UB B_WIDE UC C_WIDE CORE_A CORE_B CORE_C] [MATH LONG];
    0x9d MulLong "mul-long" K23x [CONTINUE] [DA A_WIDE UB B_WIDE UC C_WIDE CORE_A CORE_B CORE_C] [MATH LONG];
    0x9e DivLong "div-long" K23x [CONTINUE THROW] [DA A_WIDE UB B_WIDE UC C_WIDE CORE_A CORE_B CORE_C] [MATH LONG];
    0x9f RemLong "rem-long" K23x [CONTINUE THROW] [DA A_WIDE UB B_WIDE UC C_WIDE CORE_A CORE_B CORE_C] [MATH LONG];
    0xa0 AndLong "and-long" K23x [CONTINUE] [DA A_WIDE UB B_WIDE UC C_WIDE CORE_A CORE_B CORE_C] [MATH LONG];
    0xa1 OrLong "or-long" K23x [CONTINUE] [DA A_WIDE UB B_WIDE UC C_WIDE CORE_A CORE_B CORE_C] [MATH LONG];
    0xa2 XorLong "xor-long" K23x [CONTINUE] [DA A_WIDE UB B_WIDE UC C_WIDE CORE_A CORE_B CORE_C] [MATH LONG];
    0xa3 ShlLong "shl-long" K23x [CONTINUE] [DA A_WIDE UB B_WIDE UC CORE_A CORE_B CORE_C] [MATH LONG];
    0xa4 ShrLong "shr-long" K23x [CONTINUE] [DA A_WIDE UB B_WIDE UC CORE_A CORE_B CORE_C] [MATH LONG];
    0xa5 UshrLong "ushr-long" K23x [CONTINUE] [DA A_WIDE UB B_WIDE UC CORE_A CORE_B CORE_C] [MATH LONG];
    0xa6 AddFloat "add-float" K23x [CONTINUE] [DA UB UC FP_A FP_B FP_C] [MATH FP SINGLE];
    0xa7 SubFloat "sub-float" K23x [CONTINUE] [DA UB UC FP_A FP_B FP_C] [MATH FP SINGLE];
    0xa8 MulFloat "mul-float" K23x [CONTINUE] [DA UB UC FP_A FP_B FP_C] [MATH FP SINGLE];
    0xa9 DivFloat "div-float" K23x [CONTINUE] [DA UB UC FP_A FP_B FP_C] [MATH FP SINGLE];
    0xaa RemFloat "rem-float" K23x [CONTINUE] [DA UB UC FP_A FP_B FP_C] [MATH FP SINGLE];
    0xab AddDouble "add-double" K23x [CONTINUE] [DA A_WIDE UB B_WIDE UC C_WIDE FP_A FP_B FP_C] [MATH FP DOUBLE];
    0xac SubDouble "sub-double" K23x [CONTINUE] [DA A_WIDE UB B_WIDE UC C_WIDE FP_A FP_B FP_C] [MATH FP DOUBLE];
    0xad MulDouble "mul-double" K23x [CONTINUE] [DA A_WIDE UB B_WIDE UC C_WIDE FP_A FP_B FP_C] [MATH FP DOUBLE];
    0xae DivDouble "div-double" K23x [CONTINUE] [DA A_WIDE UB B_WIDE UC C_WIDE FP_A FP_B FP_C] [MATH FP DOUBLE];
    0xaf RemDouble "rem-double" K23x [CONTINUE] [DA A_WIDE UB B_WIDE UC C_WIDE FP_A FP_B FP_C] [MATH FP DOUBLE];
    0xb0 AddInt2addr "add-int/2addr" K12x [CONTINUE] [DA UA UB CORE_A CORE_B] [MATH INT];
    0xb1 SubInt2addr "sub-int/2addr" K12x [CONTINUE] [DA UA UB CORE_A CORE_B] [MATH INT];
    0xb2 MulInt2addr "mul-int/2addr" K12x [CONTINUE] [DA UA UB CORE_A CORE_B] [MATH INT];
    0xb3 DivInt2addr "div-int/2addr" K12x [CONTINUE THROW] [DA UA UB CORE_A CORE_B] [MATH INT];
    0xb4 RemInt2addr "rem-int/2addr" K12x [CONTINUE THROW] [DA UA UB CORE_A CORE_B] [MATH INT];
    0xb5 AndInt2addr "and-int/2addr" K12x [CONTINUE] [DA UA UB CORE_A CORE_B] [MATH INT];
    0xb6 OrInt2addr "or-int/2addr" K12x [CONTINUE] [DA UA UB CORE_A CORE_B] [MATH INT];
    0xb7 XorInt2addr "xor-int/2addr" K12x [CONTINUE] [DA UA UB CORE_A CORE_B] [MATH INT];
    0xb8 ShlInt2addr "shl-int/2addr" K12x [CONTINUE] [DA UA UB CORE_A CORE_B] [MATH INT];
    0xb9 ShrInt2addr "shr-int/2addr" K12x [CONTINUE] [DA UA UB CORE_A CORE_B] [MATH INT];
    0xba UshrInt2addr "ushr-int/2addr" K12x [CONTINUE] [DA UA UB CORE_A CORE_B] [MATH INT];
    0xbb AddLong2addr "add-long/2addr" K12x [CONTINUE] [DA A_WIDE UA UB B_WIDE CORE_A CORE_B] [MATH LONG];
    0xbc SubLong2addr "sub-long/2addr" K12x [CONTINUE] [DA A_WIDE UA UB B_WIDE CORE_A CORE_B] [MATH LONG];
    0xbd MulLong2addr "mul-long/2addr" K12x [CONTINUE] [DA A_WIDE UA UB B_WIDE CORE_A CORE_B] [MATH LONG];
    0xbe DivLong2addr "div-long/2addr" K12x [CONTINUE THROW] [DA A_WIDE UA UB B_WIDE CORE_A CORE_B] [MATH LONG];
    0xbf RemLong2addr "rem-long/2addr" K12x [CONTINUE THROW] [DA A_WIDE UA UB B_WIDE CORE_A CORE_B] [MATH LONG];
    0xc0 AndLong2addr "and-long/2addr" K12x [CONTINUE] [DA A_WIDE UA UB B_WIDE CORE_A CORE_B] [MATH LONG];
    0xc1 OrLong2addr "or-long/2addr" K12x [CONTINUE] [DA A_WIDE UA UB B_WIDE CORE_A CORE_B] [MATH LONG];
    0xc2 XorLong2addr "xor-long/2addr" K12x [CONTINUE] [DA A_WIDE UA UB B_WIDE CORE_A CORE_B] [MATH LONG];
    0xc3 ShlLong2addr "shl-long/2addr" K12x [CONTINUE] [DA A_WIDE UA UB CORE_A CORE_B] [MATH LONG];
    0xc4 ShrLong2addr "shr-long/2addr" K12x [CONTINUE] [DA A_WIDE UA UB CORE_A CORE_B] [MATH LONG];
    0xc5 UshrLong2addr "ushr-long/2addr" K12x [CONTINUE] [DA A_WIDE UA UB CORE_A CORE_B] [MATH LONG];
    0xc6 AddFloat2addr "add-float/2addr" K12x [CONTINUE] [DA UA UB FP_A FP_B] [MATH FP SINGLE];
    0xc7 SubFloat2addr "sub-float/2addr" K12x [CONTINUE] [DA UA UB FP_A FP_B] [MATH FP SINGLE];
    0xc8 MulFloat2addr "mul-float/2addr" K12x [CONTINUE] [DA UA UB FP_A FP_B] [MATH FP SINGLE];
    0xc9 DivFloat2addr "div-float/2addr" K12x [CONTINUE] [DA UA UB FP_A FP_B] [MATH FP SINGLE];
    0xca RemFloat2addr "rem-float/2addr" K12x [CONTINUE] [DA UA UB FP_A FP_B] [MATH FP SINGLE];
    0xcb AddDouble2addr "add-double/2addr" K12x [CONTINUE] [DA A_WIDE UA UB B_WIDE FP_A FP_B] [MATH FP DOUBLE];
    0xcc SubDouble2addr "sub-double/2addr" K12x [CONTINUE] [DA A_WIDE UA UB B_WIDE FP_A FP_B] [MATH FP DOUBLE];
    0xcd MulDouble2addr "mul-double/2addr" K12x [CONTINUE] [DA A_WIDE UA UB B_WIDE FP_A FP_B] [MATH FP DOUBLE];
    0xce DivDouble2addr "div-double/2addr" K12x [CONTINUE] [DA A_WIDE UA UB B_WIDE FP_A FP_B] [MATH FP DOUBLE];
    0xcf RemDouble2addr "rem-double/2addr" K12x [CONTINUE] [DA A_WIDE UA UB B_WIDE FP_A FP_B] [MATH FP DOUBLE];
    0xd0 AddIntLit16 "add-int/lit16" K22s [CONTINUE] [DA UB CORE_A CORE_B] [MATH INT];
    0xd1 RsubInt "rsub-int" K22s [CONTINUE] [DA UB CORE_A CORE_B] [MATH INT];
    0xd2 MulIntLit16 "mul-int/lit16" K22s [CONTINUE] [DA UB CORE_A CORE_B] [MATH INT];
    0xd3 DivIntLit16 "div-int/lit16" K22s [CONTINUE THROW] [DA UB CORE_A CORE_B] [MATH INT];
    0xd4 RemIntLit16 "rem-int/lit16" K22s [CONTINUE THROW] [DA UB CORE_A CORE_B] [MATH INT];
    0xd5 AndIntLit16 "and-int/lit16" K22s [CONTINUE] [DA UB CORE_A CORE_B] [MATH INT];
    0xd6 OrIntLit16 "or-int/lit16" K22s [CONTINUE] [DA UB CORE_A CORE_B] [MATH INT];
    0xd7 XorIntLit16 "xor-int/lit16" K22s [CONTINUE] [DA UB CORE_A CORE_B] [MATH INT];
    0xd8 AddIntLit8 "add-int/lit8" K22b [CONTINUE] [DA UB CORE_A CORE_B] [MATH INT];
    0xd9 RsubIntLit8 "rsub-int/lit8" K22b [CONTINUE] [DA UB CORE_A CORE_B] [MATH INT];
    0xda MulIntLit8 "mul-int/lit8" K22b [CONTINUE] [DA UB CORE_A CORE_B] [MATH INT];
    0xdb DivIntLit8 "div-int/lit8" K22b [CONTINUE THROW] [DA UB CORE_A CORE_B] [MATH INT];
    0xdc RemIntLit8 "rem-int/lit8" K22b [CONTINUE THROW] [DA UB CORE_A CORE_B] [MATH INT];
    0xdd AndIntLit8 "and-int/lit8" K22b [CONTINUE] [DA UB CORE_A CORE_B] [MATH INT];
    0xde OrIntLit8 "or-int/lit8" K22b [CONTINUE] [DA UB CORE_A CORE_B] [MATH INT];
    0xdf XorIntLit8 "xor-int/lit8" K22b [CONTINUE] [DA UB CORE_A CORE_B] [MATH INT];
    0xe0 ShlIntLit8 "shl-int/lit8" K22b [CONTINUE] [DA UB CORE_A CORE_B] [MATH INT];
    0xe1 ShrIntLit8 "shr-int/lit8" K22b [CONTINUE] [DA UB CORE_A CORE_B] [MATH INT];
    0xe2 UshrIntLit8 "ushr-int/lit8" K22b [CONTINUE] [DA UB CORE_A CORE_B] [MATH INT];
}

impl Opcode {
    pub fn width(self) -> u32 {
        self.format().width()
    }

    pub fn is_invoke(self) -> bool {
        self.flags().contains(InstructionFlags::INVOKE)
    }

    pub fn is_static_invoke(self) -> bool {
        matches!(self, Opcode::InvokeStatic | Opcode::InvokeStaticRange)
    }

    pub fn is_return(self) -> bool {
        self.flags().contains(InstructionFlags::RETURN)
    }

    pub fn is_conditional_branch(self) -> bool {
        (Opcode::IfEq..=Opcode::IfLez).contains(&self)
    }

    pub fn is_goto(self) -> bool {
        matches!(self, Opcode::Goto | Opcode::Goto16 | Opcode::Goto32)
    }

    pub fn is_move_result(self) -> bool {
        matches!(
            self,
            Opcode::MoveResult | Opcode::MoveResultWide | Opcode::MoveResultObject
        )
    }

    /// The conditional branch testing the opposite condition.
    pub fn negated_branch(self) -> Option<Opcode> {
        Some(match self {
            Opcode::IfEq => Opcode::IfNe,
            Opcode::IfNe => Opcode::IfEq,
            Opcode::IfLt => Opcode::IfGe,
            Opcode::IfGe => Opcode::IfLt,
            Opcode::IfGt => Opcode::IfLe,
            Opcode::IfLe => Opcode::IfGt,
            Opcode::IfEqz => Opcode::IfNez,
            Opcode::IfNez => Opcode::IfEqz,
            Opcode::IfLtz => Opcode::IfGez,
            Opcode::IfGez => Opcode::IfLtz,
            Opcode::IfGtz => Opcode::IfLez,
            Opcode::IfLez => Opcode::IfGtz,
            _ => return None,
        })
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for Opcode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for Opcode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Opcode::from_name(&name)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown opcode '{}'", name)))
    }
}

/// Jump table of a `packed-switch` or `sparse-switch`.
///
/// Targets are relative to the switch instruction, like branch offsets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SwitchPayload {
    Packed { first_key: i32, targets: Vec<i32> },
    Sparse { keys: Vec<i32>, targets: Vec<i32> },
}

impl SwitchPayload {
    /// `(key, relative target)` pairs in table order.
    pub fn cases(&self) -> Vec<(i32, i32)> {
        match self {
            SwitchPayload::Packed { first_key, targets } => targets
                .iter()
                .enumerate()
                .map(|(i, t)| (first_key.wrapping_add(i as i32), *t))
                .collect(),
            SwitchPayload::Sparse { keys, targets } => {
                keys.iter().copied().zip(targets.iter().copied()).collect()
            }
        }
    }

    pub fn targets(&self) -> &[i32] {
        match self {
            SwitchPayload::Packed { targets, .. } | SwitchPayload::Sparse { targets, .. } => {
                targets
            }
        }
    }
}

/// One decoded instruction.
///
/// Operand slots follow the Dalvik convention: `v_a` is the destination or
/// first operand, `v_b`/`v_c` the others, `v_b_wide` the 64-bit literal of
/// `const-wide`, and `arg` the argument registers of 35c-format invokes.
/// Branch offsets are stored in the slot their format uses (`vA` for goto,
/// `vB` for if-testz, `vC` for if-test) as two's-complement values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedInstruction {
    pub opcode: Opcode,
    #[serde(default, deserialize_with = "signed_u32")]
    pub v_a: u32,
    #[serde(default, deserialize_with = "signed_u32")]
    pub v_b: u32,
    #[serde(default, deserialize_with = "signed_u64", skip_serializing_if = "is_zero")]
    pub v_b_wide: u64,
    #[serde(default, deserialize_with = "signed_u32")]
    pub v_c: u32,
    #[serde(default, skip_serializing_if = "SmallVec::is_empty")]
    pub arg: SmallVec<[u32; 5]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub switch: Option<SwitchPayload>,
}

impl DecodedInstruction {
    pub fn new(opcode: Opcode, v_a: u32, v_b: u32, v_c: u32) -> Self {
        Self {
            opcode,
            v_a,
            v_b,
            v_b_wide: 0,
            v_c,
            arg: SmallVec::new(),
            switch: None,
        }
    }

    /// `op vAA` style instruction with one register operand.
    pub fn unary(opcode: Opcode, v_a: u32) -> Self {
        Self::new(opcode, v_a, 0, 0)
    }

    /// `goto`-family instruction with a relative target.
    pub fn goto(offset: i32) -> Self {
        let opcode = if (-128..128).contains(&offset) {
            Opcode::Goto
        } else if (-32768..32768).contains(&offset) {
            Opcode::Goto16
        } else {
            Opcode::Goto32
        };
        Self::new(opcode, offset as u32, 0, 0)
    }

    /// `if-testz vA, +offset`.
    pub fn if_z(opcode: Opcode, v_a: u32, offset: i32) -> Self {
        Self::new(opcode, v_a, offset as u32, 0)
    }

    /// `if-test vA, vB, +offset`.
    pub fn if_cmp(opcode: Opcode, v_a: u32, v_b: u32, offset: i32) -> Self {
        Self::new(opcode, v_a, v_b, offset as u32)
    }

    /// Narrow literal load; `value` is the literal as encoded.
    pub fn literal(opcode: Opcode, v_a: u32, value: i32) -> Self {
        Self::new(opcode, v_a, value as u32, 0)
    }

    pub fn const_wide(v_a: u32, value: i64) -> Self {
        let mut insn = Self::new(Opcode::ConstWide, v_a, 0, 0);
        insn.v_b_wide = value as u64;
        insn
    }

    /// 35c-format call: `vA` argument count, `arg` the registers, `vB` the
    /// method (or type) index.
    pub fn invoke(opcode: Opcode, method_idx: u32, args: &[u32]) -> Self {
        let mut insn = Self::new(opcode, args.len() as u32, method_idx, 0);
        insn.arg = args.iter().copied().collect();
        insn
    }

    /// 3rc-format call over `count` registers starting at `first`.
    pub fn invoke_range(opcode: Opcode, method_idx: u32, first: u32, count: u32) -> Self {
        Self::new(opcode, count, method_idx, first)
    }

    pub fn switch(opcode: Opcode, v_a: u32, payload: SwitchPayload) -> Self {
        let mut insn = Self::new(opcode, v_a, 0, 0);
        insn.switch = Some(payload);
        insn
    }

    /// Relative branch target for branch-format instructions.
    pub fn branch_offset(&self) -> Option<i32> {
        match self.opcode.format() {
            Format::K10t | Format::K20t | Format::K30t => Some(self.v_a as i32),
            Format::K21t => Some(self.v_b as i32),
            Format::K22t => Some(self.v_c as i32),
            _ => None,
        }
    }

    /// Argument registers read by a 35c/3rc instruction.
    pub fn invoke_args(&self) -> SmallVec<[u32; 5]> {
        match self.opcode.format() {
            Format::K35c => self.arg.iter().take(self.v_a as usize).copied().collect(),
            Format::K3rc => (self.v_c..self.v_c + self.v_a).collect(),
            _ => SmallVec::new(),
        }
    }

    /// Value loaded by a narrow literal opcode, before widening.
    pub fn narrow_literal(&self) -> Option<i32> {
        match self.opcode {
            Opcode::Const4 | Opcode::Const16 | Opcode::Const => Some(self.v_b as i32),
            Opcode::ConstHigh16 => Some((self.v_b << 16) as i32),
            _ => None,
        }
    }

    /// Value loaded by a wide literal opcode.
    pub fn wide_literal(&self) -> Option<i64> {
        match self.opcode {
            Opcode::ConstWide16 | Opcode::ConstWide32 => Some(self.v_b as i32 as i64),
            Opcode::ConstWide => Some(self.v_b_wide as i64),
            Opcode::ConstWideHigh16 => Some(((self.v_b as u64) << 48) as i64),
            _ => None,
        }
    }
}

fn is_zero(value: &u64) -> bool {
    *value == 0
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AnyInt {
    Unsigned(u64),
    Signed(i64),
}

/// Accepts either the raw 32-bit pattern or a signed value for an operand slot.
fn signed_u32<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    match AnyInt::deserialize(deserializer)? {
        AnyInt::Unsigned(v) => u32::try_from(v)
            .map_err(|_| serde::de::Error::custom(format!("operand {} out of range", v))),
        AnyInt::Signed(v) => i32::try_from(v)
            .map(|v| v as u32)
            .map_err(|_| serde::de::Error::custom(format!("operand {} out of range", v))),
    }
}

fn signed_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    Ok(match AnyInt::deserialize(deserializer)? {
        AnyInt::Unsigned(v) => v,
        AnyInt::Signed(v) => v as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_lookup_by_name_and_code() {
        assert_eq!(Opcode::from_name("add-int/lit8"), Some(Opcode::AddIntLit8));
        assert_eq!(Opcode::from_code(0x9b), Some(Opcode::AddLong));
        assert_eq!(Opcode::from_code(0x3e), None);
        for op in Opcode::ALL {
            assert_eq!(Opcode::from_name(op.name()), Some(*op));
            assert_eq!(Opcode::from_code(op.code()), Some(*op));
        }
    }

    #[test]
    fn test_widths() {
        assert_eq!(Opcode::Const4.width(), 1);
        assert_eq!(Opcode::IfEqz.width(), 2);
        assert_eq!(Opcode::InvokeVirtual.width(), 3);
        assert_eq!(Opcode::ConstWide.width(), 5);
    }

    #[test]
    fn test_branch_offsets_by_format() {
        assert_eq!(DecodedInstruction::goto(-3).branch_offset(), Some(-3));
        assert_eq!(
            DecodedInstruction::if_z(Opcode::IfEqz, 1, 6).branch_offset(),
            Some(6)
        );
        assert_eq!(
            DecodedInstruction::if_cmp(Opcode::IfLt, 1, 2, -8).branch_offset(),
            Some(-8)
        );
        assert_eq!(DecodedInstruction::goto(200).opcode, Opcode::Goto16);
    }

    #[test]
    fn test_literals() {
        let high = DecodedInstruction::literal(Opcode::ConstHigh16, 0, 0x4120);
        assert_eq!(high.narrow_literal(), Some(0x4120_0000));
        let neg = DecodedInstruction::literal(Opcode::ConstWide16, 0, -2);
        assert_eq!(neg.wide_literal(), Some(-2));
        let wide = DecodedInstruction::const_wide(0, i64::MIN);
        assert_eq!(wide.wide_literal(), Some(i64::MIN));
    }

    #[test]
    fn test_negated_branch_is_involution() {
        for op in Opcode::ALL.iter().filter(|op| op.is_conditional_branch()) {
            let negated = op.negated_branch().unwrap();
            assert_eq!(negated.negated_branch(), Some(*op));
        }
    }

    #[test]
    fn test_json_accepts_negative_offsets() {
        let insn: DecodedInstruction =
            serde_json::from_str(r#"{ "opcode": "if-nez", "v_a": 0, "v_b": -4 }"#).unwrap();
        assert_eq!(insn.branch_offset(), Some(-4));
    }

    #[test]
    fn test_sparse_switch_cases() {
        let payload = SwitchPayload::Sparse {
            keys: vec![1, 2, 5],
            targets: vec![3, 5, 7],
        };
        assert_eq!(payload.cases(), vec![(1, 3), (2, 5), (5, 7)]);
        let packed = SwitchPayload::Packed {
            first_key: 10,
            targets: vec![3, 4],
        };
        assert_eq!(packed.cases(), vec![(10, 3), (11, 4)]);
    }
}
