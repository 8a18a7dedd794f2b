//! Basic block graph construction
//!
//! Walks a decoded method body once, in offset order, keeping a current
//! block. Branches, switches, returns and throwing instructions close the
//! current block; their targets are found (or created, or split out of an
//! existing block) through the offset-to-block map, so every instruction is
//! visited once and block lookup is O(1) amortized.

use super::{BlockFlags, BlockId, BlockListType, BlockType, Mir, MirGraph, MirId, MirMeta, MirOpcode};
use crate::config::{CompilerOptions, DisabledOptimizations};
use crate::dex::{
    AccessFlags, ClassLoaderHandle, DataFlowAttributes, DecodedInstruction, DexFile, Format,
    InstructionFlags, InvokeType, MethodBody, MethodUnit, Opcode,
};
use crate::error::{Error, Result, MAX_METHOD_CODE_UNITS};
use crate::utils::BitSet;
use smallvec::SmallVec;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Builds the block graph of `unit` with the given options.
///
/// Nothing is returned on failure: a method that is too large or has broken
/// control flow never produces a partial graph.
pub fn build(unit: &MethodUnit, options: &CompilerOptions) -> Result<MirGraph> {
    let mut graph = MirGraph::new(options);
    graph.inline_method(
        unit.body.clone(),
        unit.access_flags,
        unit.invoke_type,
        unit.class_def_idx,
        unit.method_idx,
        unit.class_loader,
        unit.dex_file.clone(),
    )?;
    Ok(graph)
}

impl MirGraph {
    /// Parses `body` into blocks. Only the outermost method is supported; a
    /// graph that already holds code rejects further inlining.
    #[allow(clippy::too_many_arguments)]
    pub fn inline_method(
        &mut self,
        body: Arc<MethodBody>,
        access_flags: AccessFlags,
        invoke_type: InvokeType,
        class_def_idx: u16,
        method_idx: u32,
        class_loader: ClassLoaderHandle,
        dex_file: Arc<DexFile>,
    ) -> Result<()> {
        if !self.m_units.is_empty() || !self.blocks.is_empty() {
            return Err(Error::Unsupported {
                message: format!("cannot inline {} into a non-empty graph", body.name),
            });
        }
        if body.insns_size >= MAX_METHOD_CODE_UNITS {
            return Err(Error::MethodTooLarge {
                size: body.insns_size,
                limit: MAX_METHOD_CODE_UNITS,
            });
        }
        validate_method(&body)?;

        self.m_units.push(MethodUnit {
            body: body.clone(),
            access_flags,
            invoke_type,
            class_def_idx,
            method_idx,
            class_loader,
            dex_file,
        });
        self.current_method = self.m_units.len() - 1;
        self.try_block_addr = BitSet::new(body.insns_size as usize);

        self.create_sentinels();
        let first = self.new_block(BlockType::DalvikByteCode);
        self.dex_pc_to_block_map.insert(0, first);
        self.link_fall_through(self.entry_block(), first);

        self.process_try_catch_blocks(&body)?;

        let mut cur = first;
        for (idx, instr) in body.instructions.iter().enumerate() {
            let insn = &instr.insn;
            let offset = instr.offset;
            let next_offset = body.instructions.get(idx + 1).map(|n| n.offset);

            if let Some(counts) = self.opcode_count.as_mut() {
                counts[insn.opcode.code() as usize] += 1;
            }
            let attrs = insn.opcode.dataflow_attributes();
            if attrs.contains(DataFlowAttributes::DA) {
                self.def_count += if attrs.contains(DataFlowAttributes::A_WIDE) {
                    2
                } else {
                    1
                };
            }

            let mut mir = Mir::new(insn.clone(), offset);
            mir.m_unit_index = self.current_method;
            let mir_id = self.append_mir(cur, mir);
            self.dex_pc_to_block_map.insert(offset, cur);

            let flags = insn.opcode.flags();
            if flags.contains(InstructionFlags::BRANCH) {
                cur = self.process_can_branch(cur, mir_id, next_offset)?;
            } else if flags.contains(InstructionFlags::RETURN) {
                let exit = self.exit_block();
                self.block_mut(cur).flags.insert(BlockFlags::TERMINATED_BY_RETURN);
                self.link_fall_through(cur, exit);
                if let Some(next) = next_offset {
                    self.find_block(next, true, None)?;
                }
            } else if flags.contains(InstructionFlags::THROW) {
                cur = self.process_can_throw(&body, cur, mir_id, next_offset)?;
            } else if flags.contains(InstructionFlags::SWITCH) {
                cur = self.process_can_switch(cur, mir_id, next_offset)?;
            }

            // A previously parsed forward branch may already have opened the
            // block at the next offset.
            if let Some(next) = next_offset {
                if let Some(next_block) = self.find_block(next, false, None)? {
                    if self.block(cur).fall_through.is_none()
                        && flags.contains(InstructionFlags::CONTINUE)
                    {
                        self.link_fall_through(cur, next_block);
                    }
                    cur = next_block;
                }
            }
        }

        log::debug!(
            "built {}: {} blocks, {} instructions, {} forward / {} backward branches",
            body.name,
            self.num_blocks(),
            self.mirs.len(),
            self.num_forward_branches,
            self.num_backward_branches
        );
        Ok(())
    }

    /// Marks every code unit covered by a try range and opens an empty block
    /// at each handler address.
    fn process_try_catch_blocks(&mut self, body: &MethodBody) -> Result<()> {
        for item in &body.tries {
            for offset in item.start_addr..item.end_addr() {
                self.try_block_addr.insert(offset as usize);
            }
        }
        for list in &body.handlers {
            for (_, address) in list.iter() {
                self.find_block(address, true, None)?;
            }
        }
        Ok(())
    }

    /// Block starting at `offset`. With `create`, a block containing the
    /// offset is split, or a fresh block is opened. `immed_pred` follows the
    /// current block when that block is the one being split.
    pub(crate) fn find_block(
        &mut self,
        offset: u32,
        create: bool,
        immed_pred: Option<&mut BlockId>,
    ) -> Result<Option<BlockId>> {
        let hit = self.dex_pc_to_block_map.get(&offset).copied();
        if let Some(bb) = hit {
            if self.block(bb).start_offset == offset {
                return Ok(Some(bb));
            }
        }
        if !create {
            return Ok(None);
        }
        if let Some(bb) = hit {
            let pred = immed_pred.filter(|p| **p == bb);
            return self.split_block(offset, bb, pred).map(Some);
        }
        let bb = self.new_block(BlockType::DalvikByteCode);
        self.block_mut(bb).start_offset = offset;
        self.dex_pc_to_block_map.insert(offset, bb);
        Ok(Some(bb))
    }

    /// Splits `orig` so that the instruction at `offset` starts a new bottom
    /// block. The bottom takes over every outgoing edge.
    fn split_block(
        &mut self,
        offset: u32,
        orig: BlockId,
        immed_pred: Option<&mut BlockId>,
    ) -> Result<BlockId> {
        let mut prev: Option<MirId> = None;
        let mut cur = self.block(orig).first_mir;
        while let Some(id) = cur {
            if self.mir(id).offset == offset {
                break;
            }
            prev = Some(id);
            cur = self.mir(id).next;
        }
        let (Some(first), Some(prev)) = (cur, prev) else {
            return Err(Error::internal(format!(
                "block split failed at 0x{:04x} in block {}",
                offset, orig
            )));
        };

        let bottom = self.new_block(BlockType::DalvikByteCode);
        let (last, taken, fall_through, successors, ending) = {
            let bb = self.block_mut(orig);
            let ending = bb.flags
                & (BlockFlags::TERMINATED_BY_RETURN
                    | BlockFlags::CONDITIONAL_BRANCH
                    | BlockFlags::EXPLICIT_THROW);
            bb.flags.remove(ending);
            let out = (
                bb.last_mir,
                bb.taken.take(),
                bb.fall_through.replace(bottom),
                std::mem::take(&mut bb.successors),
                ending,
            );
            bb.last_mir = Some(prev);
            out
        };
        self.mir_mut(prev).next = None;

        {
            let bb = self.block_mut(bottom);
            bb.start_offset = offset;
            bb.first_mir = Some(first);
            bb.last_mir = last;
            bb.taken = taken;
            bb.fall_through = fall_through;
            bb.successors = successors;
            bb.predecessors.push(orig);
            bb.flags.insert(ending);
        }
        let children: Vec<BlockId> = self.block(bottom).successor_ids().collect();
        for child in children {
            self.block_mut(child).replace_predecessor(orig, bottom);
        }

        let mut walk = Some(first);
        while let Some(id) = walk {
            let mir = self.mir_mut(id);
            mir.bb = Some(bottom);
            let mir_offset = mir.offset;
            walk = mir.next;
            self.dex_pc_to_block_map.insert(mir_offset, bottom);
        }

        if let Some(pred) = immed_pred {
            *pred = bottom;
        }
        Ok(bottom)
    }

    fn count_branch(&mut self, current: u32, target: u32) {
        if target <= current {
            self.num_backward_branches += 1;
        } else {
            self.num_forward_branches += 1;
        }
    }

    fn process_can_branch(
        &mut self,
        mut cur: BlockId,
        mir_id: MirId,
        next_offset: Option<u32>,
    ) -> Result<BlockId> {
        let (offset, opcode, rel) = {
            let mir = self.mir(mir_id);
            (mir.offset, mir.dalvik_insn.opcode, mir.dalvik_insn.branch_offset())
        };
        let rel = rel.ok_or_else(|| Error::invalid_instruction(offset, "branch without a target"))?;
        if opcode.is_conditional_branch() {
            self.block_mut(cur).flags.insert(BlockFlags::CONDITIONAL_BRANCH);
        }
        let target = offset.wrapping_add_signed(rel);
        self.count_branch(offset, target);

        let taken = self
            .find_block(target, true, Some(&mut cur))?
            .ok_or_else(|| Error::malformed(offset, "branch target has no block"))?;
        self.link_taken(cur, taken);

        if opcode.flags().contains(InstructionFlags::CONTINUE) {
            let next = next_offset
                .ok_or_else(|| Error::malformed(offset, "conditional branch falls off the end"))?;
            let fall = self
                .find_block(next, true, Some(&mut cur))?
                .ok_or_else(|| Error::malformed(offset, "fall-through has no block"))?;
            self.link_fall_through(cur, fall);
        } else if let Some(next) = next_offset {
            self.find_block(next, true, None)?;
        }
        Ok(cur)
    }

    fn process_can_switch(
        &mut self,
        mut cur: BlockId,
        mir_id: MirId,
        next_offset: Option<u32>,
    ) -> Result<BlockId> {
        let (offset, opcode, payload) = {
            let mir = self.mir(mir_id);
            (mir.offset, mir.dalvik_insn.opcode, mir.dalvik_insn.switch.clone())
        };
        let payload =
            payload.ok_or_else(|| Error::malformed(offset, "switch without a payload"))?;
        if self.block(cur).successors.is_used() {
            return Err(Error::internal(format!(
                "successor list of block {} already in use",
                cur
            )));
        }
        let kind = if opcode == Opcode::PackedSwitch {
            BlockListType::PackedSwitch
        } else {
            BlockListType::SparseSwitch
        };
        self.block_mut(cur).successors.kind = kind;

        for (key, rel) in payload.cases() {
            let target = offset.wrapping_add_signed(rel);
            let case_block = self
                .find_block(target, true, Some(&mut cur))?
                .ok_or_else(|| Error::malformed(offset, "switch target has no block"))?;
            self.add_successor(cur, kind, case_block, key);
        }

        let next =
            next_offset.ok_or_else(|| Error::malformed(offset, "switch falls off the end"))?;
        let fall = self
            .find_block(next, true, None)?
            .ok_or_else(|| Error::malformed(offset, "switch fall-through has no block"))?;
        self.link_fall_through(cur, fall);
        Ok(cur)
    }

    fn process_can_throw(
        &mut self,
        body: &MethodBody,
        cur: BlockId,
        mir_id: MirId,
        next_offset: Option<u32>,
    ) -> Result<BlockId> {
        let (offset, opcode) = {
            let mir = self.mir(mir_id);
            (mir.offset, mir.dalvik_insn.opcode)
        };
        let mut in_try = self.try_block_addr.contains(offset as usize);
        let is_throw = opcode == Opcode::Throw;
        let build_all_edges = self
            .disable_opt
            .contains(DisabledOptimizations::SUPPRESS_EXCEPTION_EDGES)
            || is_throw
            || in_try;

        if in_try {
            if self.block(cur).successors.is_used() {
                return Err(Error::internal(format!(
                    "successor list of block {} already in use",
                    cur
                )));
            }
            let handlers: Vec<(u32, u32)> = body
                .find_try(offset)
                .and_then(|item| body.handlers.get(item.handler_index))
                .map(|list| list.iter().collect())
                .unwrap_or_default();
            for (type_idx, address) in handlers {
                let catch_block = self.find_block(address, false, None)?.ok_or_else(|| {
                    Error::internal(format!("no block for handler at 0x{:04x}", address))
                })?;
                if opcode == Opcode::MonitorExit
                    && is_bad_monitor_exit_catch(body, offset, address)
                {
                    continue;
                }
                self.block_mut(catch_block).flags.insert(BlockFlags::CATCH_ENTRY);
                self.catches.insert(address);
                self.add_successor(cur, BlockListType::Catch, catch_block, type_idx as i32);
            }
            in_try = self.block(cur).successors.is_used();
        }

        if !in_try && build_all_edges {
            let eh_block = self.new_block(BlockType::ExceptionHandling);
            self.block_mut(eh_block).start_offset = offset;
            self.link_taken(cur, eh_block);
        }

        if is_throw {
            self.block_mut(cur).flags.insert(BlockFlags::EXPLICIT_THROW);
            if let Some(next) = next_offset {
                self.find_block(next, true, None)?;
            }
            if !in_try {
                return Ok(cur);
            }
        }

        if !build_all_edges {
            return Ok(cur);
        }

        // The check half keeps the exception edges and ends the block. The
        // work half starts a block that is reachable only by fall-through,
        // so it stays out of the offset map.
        let new_block = self.new_block(BlockType::DalvikByteCode);
        self.block_mut(new_block).start_offset = offset;
        self.link_fall_through(cur, new_block);

        let work = self.mir(mir_id).clone();
        let work_id = self.append_mir(new_block, work);
        let check = self.mir_mut(mir_id);
        check.opcode = MirOpcode::Check;
        check.meta = MirMeta::ThrowInsn(work_id);
        Ok(new_block)
    }
}

/// A `monitor-exit` must not be routed to a handler that immediately
/// unlocks the same register inside the same try range.
fn is_bad_monitor_exit_catch(body: &MethodBody, monitor_exit_offset: u32, catch_offset: u32) -> bool {
    let Some(monitor_exit) = body.instruction_at(monitor_exit_offset) else {
        return false;
    };
    let Some(mut check) = body.instruction_at(catch_offset) else {
        return false;
    };
    if check.insn.opcode == Opcode::MoveException {
        let next = check.offset + check.insn.opcode.width();
        match body.instruction_at(next) {
            Some(insn) => check = insn,
            None => return false,
        }
    }
    if check.insn.opcode != Opcode::MonitorExit || check.insn.v_a != monitor_exit.insn.v_a {
        return false;
    }
    match (body.find_try(monitor_exit_offset), body.find_try(check.offset)) {
        (Some(a), Some(b)) => a.start_addr == b.start_addr,
        _ => false,
    }
}

/// Virtual registers named by an instruction's operand slots.
pub(crate) fn register_operands(insn: &DecodedInstruction) -> SmallVec<[u32; 8]> {
    type Df = DataFlowAttributes;
    let attrs = insn.opcode.dataflow_attributes();
    let mut regs = SmallVec::new();
    if attrs.intersects(Df::FORMAT_35C | Df::FORMAT_3RC) {
        regs.extend(insn.invoke_args());
        return regs;
    }
    let mut slot = |present: bool, wide: bool, reg: u32| {
        if present {
            regs.push(reg);
            if wide {
                regs.push(reg.wrapping_add(1));
            }
        }
    };
    slot(
        attrs.intersects(Df::UA | Df::DA),
        attrs.contains(Df::A_WIDE),
        insn.v_a,
    );
    slot(attrs.contains(Df::UB), attrs.contains(Df::B_WIDE), insn.v_b);
    slot(attrs.contains(Df::UC), attrs.contains(Df::C_WIDE), insn.v_c);
    regs
}

/// Rejects bodies whose control flow or operands do not fit the method.
fn validate_method(body: &MethodBody) -> Result<()> {
    let Some(first) = body.instructions.first() else {
        return Err(Error::malformed(0, "method has no instructions"));
    };
    if first.offset != 0 {
        return Err(Error::malformed(first.offset, "first instruction is not at offset 0"));
    }

    let mut boundaries = BTreeSet::new();
    let mut prev_end = 0;
    for instr in &body.instructions {
        if instr.offset < prev_end {
            return Err(Error::malformed(instr.offset, "instructions overlap"));
        }
        prev_end = instr.offset + instr.insn.opcode.width();
        if prev_end > body.insns_size {
            return Err(Error::malformed(instr.offset, "instruction runs past the end"));
        }
        boundaries.insert(instr.offset);
    }
    let check_target = |from: u32, target: u32, what: &str| -> Result<()> {
        if target >= body.insns_size || !boundaries.contains(&target) {
            return Err(Error::malformed(
                from,
                format!("{} target 0x{:x} is not an instruction", what, target),
            ));
        }
        Ok(())
    };

    for instr in &body.instructions {
        let insn = &instr.insn;
        let offset = instr.offset;
        let flags = insn.opcode.flags();
        if flags.contains(InstructionFlags::BRANCH) {
            let rel = insn
                .branch_offset()
                .ok_or_else(|| Error::invalid_instruction(offset, "branch without a target"))?;
            check_target(offset, offset.wrapping_add_signed(rel), "branch")?;
        }
        if flags.contains(InstructionFlags::SWITCH) {
            let payload = insn
                .switch
                .as_ref()
                .ok_or_else(|| Error::malformed(offset, "switch without a payload"))?;
            if let crate::dex::SwitchPayload::Sparse { keys, targets } = payload {
                if keys.len() != targets.len() {
                    return Err(Error::malformed(offset, "sparse switch key/target mismatch"));
                }
            }
            for (_, rel) in payload.cases() {
                check_target(offset, offset.wrapping_add_signed(rel), "switch")?;
            }
        }
        if insn.opcode.format() == Format::K35c && insn.v_a as usize > insn.arg.len().min(5) {
            return Err(Error::invalid_instruction(offset, "argument count exceeds argument list"));
        }
        if let Some(reg) = register_operands(insn)
            .into_iter()
            .find(|reg| *reg >= body.registers_size)
        {
            return Err(Error::invalid_instruction(
                offset,
                format!("register v{} out of range ({} registers)", reg, body.registers_size),
            ));
        }
    }

    for item in &body.tries {
        if item.end_addr() > body.insns_size || item.handler_index >= body.handlers.len() {
            return Err(Error::malformed(item.start_addr, "try range outside the method"));
        }
    }
    for list in &body.handlers {
        for (_, address) in list.iter() {
            check_target(address, address, "handler")?;
        }
    }
    Ok(())
}
