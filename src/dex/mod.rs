//! Decoded method bodies
//!
//! The container parser is an upstream collaborator. What reaches the
//! middle-end is a [`MethodBody`]: instructions already decoded and placed at
//! their code-unit offsets, the try ranges and their ordered handler lists,
//! and the register/argument counts of the frame.

pub mod dataflow;
pub mod instruction;

pub use dataflow::{AnalysisAttributes, DataFlowAttributes};
pub use instruction::{DecodedInstruction, Format, InstructionFlags, Opcode, SwitchPayload};

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

bitflags! {
    /// Method access flags, as found in the method's `encoded_method`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct AccessFlags: u32 {
        const PUBLIC       = 0x0001;
        const PRIVATE      = 0x0002;
        const PROTECTED    = 0x0004;
        const STATIC       = 0x0008;
        const FINAL        = 0x0010;
        const SYNCHRONIZED = 0x0020;
        const NATIVE       = 0x0100;
        const ABSTRACT     = 0x0400;
        const CONSTRUCTOR  = 0x10000;
    }
}

impl Default for AccessFlags {
    fn default() -> Self {
        AccessFlags::PUBLIC
    }
}

/// How the method being compiled is dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvokeType {
    #[default]
    Static,
    Direct,
    Virtual,
    Super,
    Interface,
}

/// Opaque handle to the class loader that defined the method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ClassLoaderHandle(pub u64);

/// Identity of the file that holds the method's code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct DexFile {
    pub location: String,
    #[serde(default)]
    pub checksum: u32,
}

/// An instruction placed at its code-unit offset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub offset: u32,
    #[serde(flatten)]
    pub insn: DecodedInstruction,
}

/// A `try_item`: the half-open range `[start_addr, start_addr + insn_count)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TryItem {
    pub start_addr: u32,
    pub insn_count: u32,
    /// Index into [`MethodBody::handlers`].
    pub handler_index: usize,
}

impl TryItem {
    pub fn end_addr(&self) -> u32 {
        self.start_addr + self.insn_count
    }

    pub fn covers(&self, offset: u32) -> bool {
        offset >= self.start_addr && offset < self.end_addr()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatchHandler {
    pub type_idx: u32,
    pub address: u32,
}

/// Ordered handler list of one try range. The catch-all, if any, is tried last.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatchHandlerList {
    #[serde(default)]
    pub handlers: Vec<CatchHandler>,
    #[serde(default)]
    pub catch_all: Option<u32>,
}

/// Type index recorded for catch-all handlers.
pub const CATCH_ALL_TYPE_IDX: u32 = 0xFFFF;

impl CatchHandlerList {
    /// `(type_idx, address)` pairs in match order, catch-all last.
    pub fn iter(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.handlers
            .iter()
            .map(|h| (h.type_idx, h.address))
            .chain(self.catch_all.map(|addr| (CATCH_ALL_TYPE_IDX, addr)))
    }
}

/// A verified, decoded method ready for graph construction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodBody {
    /// Pretty name, e.g. `"void Foo.bar(int)"`; only used for dumps and logs.
    #[serde(default)]
    pub name: String,
    /// Shorty descriptor: return type followed by one char per argument.
    #[serde(default = "default_shorty")]
    pub shorty: String,
    pub registers_size: u32,
    #[serde(default)]
    pub ins_size: u32,
    #[serde(default)]
    pub outs_size: u32,
    /// Code size in 16-bit units, including payload tables.
    pub insns_size: u32,
    pub instructions: Vec<Instruction>,
    #[serde(default)]
    pub tries: Vec<TryItem>,
    #[serde(default)]
    pub handlers: Vec<CatchHandlerList>,
    /// Callee shorties keyed by method index, used to type invoke operands.
    #[serde(default)]
    pub callee_shorties: BTreeMap<u32, String>,
}

fn default_shorty() -> String {
    "V".to_string()
}

impl MethodBody {
    /// First virtual register holding an incoming argument.
    pub fn first_in_vreg(&self) -> u32 {
        self.registers_size.saturating_sub(self.ins_size)
    }

    /// Try item covering `offset`, if any.
    pub fn find_try(&self, offset: u32) -> Option<&TryItem> {
        self.tries.iter().find(|t| t.covers(offset))
    }

    pub fn instruction_at(&self, offset: u32) -> Option<&Instruction> {
        self.instructions
            .binary_search_by_key(&offset, |i| i.offset)
            .ok()
            .map(|idx| &self.instructions[idx])
    }
}

/// Identity of one method included in a graph (the outermost one first,
/// then any inlined callees).
#[derive(Debug, Clone)]
pub struct MethodUnit {
    pub body: Arc<MethodBody>,
    pub access_flags: AccessFlags,
    pub invoke_type: InvokeType,
    pub class_def_idx: u16,
    pub method_idx: u32,
    pub class_loader: ClassLoaderHandle,
    pub dex_file: Arc<DexFile>,
}

impl MethodUnit {
    /// A unit for `body` with a default identity, as used by the command
    /// line driver and tests.
    pub fn from_body(body: MethodBody, access_flags: AccessFlags) -> Self {
        let invoke_type = if access_flags.contains(AccessFlags::STATIC) {
            InvokeType::Static
        } else {
            InvokeType::Direct
        };
        Self {
            body: Arc::new(body),
            access_flags,
            invoke_type,
            class_def_idx: 0,
            method_idx: 0,
            class_loader: ClassLoaderHandle::default(),
            dex_file: Arc::new(DexFile {
                location: String::new(),
                checksum: 0,
            }),
        }
    }

    pub fn is_static(&self) -> bool {
        self.access_flags.contains(AccessFlags::STATIC)
    }

    /// Class and instance initializers are compiled only when the filter
    /// says "everything".
    pub fn is_class_initializer(&self) -> bool {
        self.access_flags
            .contains(AccessFlags::STATIC | AccessFlags::CONSTRUCTOR)
    }
}

/// Lays decoded instructions out at consecutive offsets.
///
/// Branch and switch targets are given as *instruction indices*; `finish`
/// rewrites them to the relative code-unit offsets the graph builder
/// expects.
#[derive(Debug, Clone, Default)]
pub struct MethodAssembler {
    name: String,
    shorty: String,
    registers_size: u32,
    ins_size: u32,
    outs_size: u32,
    insns: Vec<(DecodedInstruction, Option<Target>)>,
    tries: Vec<(usize, usize, usize)>,
    handlers: Vec<(Vec<(u32, usize)>, Option<usize>)>,
    callee_shorties: BTreeMap<u32, String>,
}

#[derive(Debug, Clone)]
enum Target {
    Branch(usize),
    Switch(Vec<usize>),
}

impl MethodAssembler {
    pub fn new(name: &str, shorty: &str, registers_size: u32, ins_size: u32) -> Self {
        Self {
            name: name.to_string(),
            shorty: shorty.to_string(),
            registers_size,
            ins_size,
            ..Default::default()
        }
    }

    pub fn outs(mut self, outs_size: u32) -> Self {
        self.outs_size = outs_size;
        self
    }

    /// Appends a straight-line instruction. Returns its index.
    pub fn push(&mut self, insn: DecodedInstruction) -> usize {
        self.insns.push((insn, None));
        self.insns.len() - 1
    }

    /// Appends a goto or if-test whose target is the instruction at `target`.
    pub fn push_branch(&mut self, insn: DecodedInstruction, target: usize) -> usize {
        self.insns.push((insn, Some(Target::Branch(target))));
        self.insns.len() - 1
    }

    /// Appends a switch whose case targets are instruction indices.
    pub fn push_switch(&mut self, insn: DecodedInstruction, targets: Vec<usize>) -> usize {
        self.insns.push((insn, Some(Target::Switch(targets))));
        self.insns.len() - 1
    }

    /// Covers instructions `first..=last` with a try range.
    pub fn add_try(&mut self, first: usize, last: usize, handler_list: usize) {
        self.tries.push((first, last, handler_list));
    }

    /// Adds a handler list of `(type_idx, handler instruction index)` pairs.
    pub fn add_handlers(&mut self, handlers: Vec<(u32, usize)>, catch_all: Option<usize>) -> usize {
        self.handlers.push((handlers, catch_all));
        self.handlers.len() - 1
    }

    pub fn callee_shorty(&mut self, method_idx: u32, shorty: &str) {
        self.callee_shorties.insert(method_idx, shorty.to_string());
    }

    pub fn finish(self) -> MethodBody {
        let mut offsets = Vec::with_capacity(self.insns.len() + 1);
        let mut offset = 0u32;
        for (insn, _) in &self.insns {
            offsets.push(offset);
            offset += insn.opcode.width();
        }
        offsets.push(offset);
        let insns_size = offset;

        let instructions = self
            .insns
            .into_iter()
            .enumerate()
            .map(|(idx, (mut insn, target))| {
                let here = offsets[idx] as i32;
                match target {
                    Some(Target::Branch(t)) => {
                        let rel = (offsets[t] as i32 - here) as u32;
                        match insn.opcode.format() {
                            Format::K21t => insn.v_b = rel,
                            Format::K22t => insn.v_c = rel,
                            _ => insn.v_a = rel,
                        }
                    }
                    Some(Target::Switch(targets)) => {
                        let rel: Vec<i32> =
                            targets.iter().map(|t| offsets[*t] as i32 - here).collect();
                        insn.switch = Some(match insn.switch.take() {
                            Some(SwitchPayload::Sparse { keys, .. }) => SwitchPayload::Sparse {
                                keys,
                                targets: rel,
                            },
                            Some(SwitchPayload::Packed { first_key, .. }) => {
                                SwitchPayload::Packed {
                                    first_key,
                                    targets: rel,
                                }
                            }
                            None => SwitchPayload::Packed {
                                first_key: 0,
                                targets: rel,
                            },
                        });
                    }
                    None => {}
                }
                Instruction {
                    offset: offsets[idx],
                    insn,
                }
            })
            .collect();

        let tries = self
            .tries
            .iter()
            .map(|(first, last, handler_index)| TryItem {
                start_addr: offsets[*first],
                insn_count: offsets[*last + 1] - offsets[*first],
                handler_index: *handler_index,
            })
            .collect();
        let handlers = self
            .handlers
            .iter()
            .map(|(list, catch_all)| CatchHandlerList {
                handlers: list
                    .iter()
                    .map(|(type_idx, idx)| CatchHandler {
                        type_idx: *type_idx,
                        address: offsets[*idx],
                    })
                    .collect(),
                catch_all: catch_all.map(|idx| offsets[idx]),
            })
            .collect();

        MethodBody {
            name: self.name,
            shorty: self.shorty,
            registers_size: self.registers_size,
            ins_size: self.ins_size,
            outs_size: self.outs_size,
            insns_size,
            instructions,
            tries,
            handlers,
            callee_shorties: self.callee_shorties,
        }
    }
}
