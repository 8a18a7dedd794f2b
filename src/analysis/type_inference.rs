//! Type and size inference over SSA names
//!
//! Each name's [`RegLocation`] moves from "unknown" to one of fp, core or
//! reference and never changes category afterwards. Typed opcodes assert
//! categories on their operands; moves and phis share whatever any of their
//! names has learned. The engine in [`super`] repeats this per block until
//! nothing changes.

use crate::cfg::{BlockId, MirGraph, MirId, MirOpcode, RegLocation, RegLocationType, SsaRepresentation};
use crate::config::DisabledOptimizations;
use crate::dex::{DataFlowAttributes, InstructionFlags, Opcode};
use serde::Serialize;
use std::fmt;

/// Register class of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum TypeCategory {
    Fp,
    Core,
    Ref,
}

impl fmt::Display for TypeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TypeCategory::Fp => "fp",
            TypeCategory::Core => "core",
            TypeCategory::Ref => "ref",
        })
    }
}

/// A type assertion that was ignored because the name already had a
/// different category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct TypeConflict {
    pub s_reg: i32,
    /// Offset of the instruction making the rejected assertion.
    pub offset: u32,
    pub kept: TypeCategory,
    pub rejected: TypeCategory,
}

fn category(loc: &RegLocation) -> Option<TypeCategory> {
    if loc.fp {
        Some(TypeCategory::Fp)
    } else if loc.core {
        Some(TypeCategory::Core)
    } else if loc.is_ref {
        Some(TypeCategory::Ref)
    } else {
        None
    }
}

impl MirGraph {
    /// Fresh location table: one record per SSA name, incoming arguments
    /// typed from the method shorty, the method pointer as a compiler temp.
    pub fn init_reg_locations(&mut self) {
        let num_ssa = self.num_ssa_regs();
        let first_in = self.first_in_vreg() as i32;
        let mut locs: Vec<RegLocation> = (0..num_ssa)
            .map(|i| {
                let v_reg = self.ssa_base_vregs[i];
                RegLocation {
                    s_reg_low: i as i32,
                    orig_sreg: i as i32,
                    is_const: self.is_constant_v.contains(i),
                    undefined: self.ssa_subscripts[i] == 0 && v_reg >= 0 && v_reg < first_in,
                    ..RegLocation::default()
                }
            })
            .collect();

        if let Some(method) = self.method_sreg.and_then(|s| locs.get_mut(s as usize)) {
            method.location = RegLocationType::CompilerTemp;
            method.defined = true;
            method.is_ref = true;
        }

        // Generation-0 names of the ins coincide with their vreg numbers.
        let end = self.num_vregs().min(num_ssa);
        let mut s_reg = first_in.max(0) as usize;
        if !self.is_static() && s_reg < end {
            locs[s_reg].defined = true;
            locs[s_reg].is_ref = true;
            s_reg += 1;
        }
        let shorty: Vec<char> = self.shorty().chars().skip(1).collect();
        for c in shorty {
            if s_reg >= end {
                log::warn!("{}: shorty describes more ins than registers", self.method_name());
                break;
            }
            let wide_pair = matches!(c, 'D' | 'J') && s_reg + 1 < end;
            let loc = &mut locs[s_reg];
            loc.defined = true;
            match c {
                'D' | 'F' => loc.fp = true,
                'L' => loc.is_ref = true,
                _ => loc.core = true,
            }
            if wide_pair {
                loc.wide = true;
                let high = &mut locs[s_reg + 1];
                high.high_word = true;
                high.fp = c == 'D';
                s_reg += 1;
            }
            s_reg += 1;
        }
        self.reg_location = locs;
    }

    /// Infers types for every instruction of `block`. Returns whether any
    /// location changed.
    pub(crate) fn infer_types(&mut self, block: BlockId) -> bool {
        let mut changed = false;
        for id in self.mir_ids(block) {
            changed |= self.infer_type_and_size(block, id);
        }
        changed
    }

    fn infer_type_and_size(&mut self, block: BlockId, id: MirId) -> bool {
        type Df = DataFlowAttributes;
        let (mut rep, attrs, opcode, insn, offset) = {
            let mir = self.mir(id);
            let Some(rep) = mir.ssa_rep.clone() else {
                return false;
            };
            (rep, mir.dataflow_attributes(), mir.opcode, mir.dalvik_insn.clone(), mir.offset)
        };
        let mut changed = false;

        if attrs.contains(Df::DA) && !rep.defs.is_empty() {
            let def = rep.defs[0];
            if attrs.contains(Df::CORE_A) {
                changed |= self.set_type(def, TypeCategory::Core, offset);
            }
            if attrs.contains(Df::REF_A) {
                changed |= self.set_type(def, TypeCategory::Ref, offset);
            }
            if attrs.contains(Df::A_WIDE) && rep.defs.len() > 1 {
                changed |= self.mark_wide_pair(rep.defs[0], rep.defs[1], offset);
            }
        }

        if !attrs.intersects(Df::FORMAT_35C | Df::FORMAT_3RC) {
            let slots = [
                (Df::UA, Df::A_WIDE, Df::CORE_A, Df::REF_A),
                (Df::UB, Df::B_WIDE, Df::CORE_B, Df::REF_B),
                (Df::UC, Df::C_WIDE, Df::CORE_C, Df::REF_C),
            ];
            let mut next = 0;
            for (used, wide, core, reference) in slots {
                if !attrs.contains(used) || next >= rep.uses.len() {
                    continue;
                }
                let name = rep.uses[next];
                if attrs.contains(core) {
                    changed |= self.set_type(name, TypeCategory::Core, offset);
                }
                if attrs.contains(reference) {
                    changed |= self.set_type(name, TypeCategory::Ref, offset);
                }
                if attrs.contains(wide) && next + 1 < rep.uses.len() {
                    changed |= self.mark_wide_pair(name, rep.uses[next + 1], offset);
                    next += 2;
                } else {
                    next += 1;
                }
            }
        }

        if let MirOpcode::Dalvik(op) = opcode {
            if matches!(op, Opcode::Return | Opcode::ReturnWide | Opcode::ReturnObject) {
                let ret = self.shorty().chars().next().unwrap_or('V');
                changed |= self.apply_shorty_type(ret, &mut rep, 0, offset);
            }
            if op.flags().contains(InstructionFlags::INVOKE) {
                changed |= self.infer_invoke(block, id, op, insn.v_b, &mut rep, offset);
            }
        }

        for (&name, &fp) in rep.uses.iter().zip(rep.fp_use.iter()) {
            if fp {
                changed |= self.set_type(name, TypeCategory::Fp, offset);
            }
        }
        for (&name, &fp) in rep.defs.iter().zip(rep.fp_def.iter()) {
            if fp {
                changed |= self.set_type(name, TypeCategory::Fp, offset);
            }
        }

        if attrs.intersects(Df::IS_MOVE | Df::NULL_TRANSFER_N) && !rep.defs.is_empty() {
            changed |= self.unify_move(&rep, opcode == MirOpcode::Phi, attrs, offset);
        }

        if let Some(stored) = self.mir_mut(id).ssa_rep.as_mut() {
            stored.fp_use = rep.fp_use;
            stored.fp_def = rep.fp_def;
        }
        changed
    }

    /// Types the use starting at `pos` from one shorty character. Wide
    /// kinds take two uses.
    fn apply_shorty_type(
        &mut self,
        c: char,
        rep: &mut SsaRepresentation,
        pos: usize,
        offset: u32,
    ) -> bool {
        let Some(&name) = rep.uses.get(pos) else {
            return false;
        };
        let high = rep.uses.get(pos + 1).copied();
        let mut changed = false;
        match c {
            'D' => {
                rep.fp_use[pos] = true;
                if let Some(high) = high {
                    rep.fp_use[pos + 1] = true;
                    changed |= self.mark_wide_pair(name, high, offset);
                }
            }
            'J' => {
                changed |= self.set_type(name, TypeCategory::Core, offset);
                if let Some(high) = high {
                    changed |= self.set_type(high, TypeCategory::Core, offset);
                    changed |= self.mark_wide_pair(name, high, offset);
                }
            }
            'F' => rep.fp_use[pos] = true,
            'L' => changed |= self.set_type(name, TypeCategory::Ref, offset),
            'V' => {}
            _ => changed |= self.set_type(name, TypeCategory::Core, offset),
        }
        changed
    }

    /// Argument and result types of a call, from the callee's shorty.
    fn infer_invoke(
        &mut self,
        block: BlockId,
        id: MirId,
        op: Opcode,
        method_idx: u32,
        rep: &mut SsaRepresentation,
        offset: u32,
    ) -> bool {
        let Some(shorty) = self
            .method_body()
            .and_then(|body| body.callee_shorties.get(&method_idx))
            .map(|s| s.chars().collect::<Vec<char>>())
        else {
            log::trace!("no shorty for callee {} at 0x{:04x}", method_idx, offset);
            return false;
        };
        let mut changed = false;

        if matches!(shorty.first(), Some('F' | 'D')) {
            if let Some(result) = self.find_move_result(block, id) {
                let result_mir = self.mir(result);
                if result_mir.opcode != MirOpcode::Dalvik(Opcode::MoveResultObject) {
                    let defs: Vec<i32> = result_mir.defs().to_vec();
                    if let Some(result_rep) = self.mir_mut(result).ssa_rep.as_mut() {
                        result_rep.fp_def.iter_mut().for_each(|fp| *fp = true);
                    }
                    for def in defs {
                        changed |= self.set_type(def, TypeCategory::Fp, offset);
                    }
                }
            }
        }

        let mut next = 0;
        if !op.is_static_invoke() {
            if let Some(&this) = rep.uses.first() {
                changed |= self.set_type(this, TypeCategory::Ref, offset);
            }
            next = 1;
        }
        for &c in shorty.iter().skip(1) {
            if next >= rep.uses.len() {
                break;
            }
            changed |= self.apply_shorty_type(c, rep, next, offset);
            next += if matches!(c, 'D' | 'J') { 2 } else { 1 };
        }
        changed
    }

    /// A move or phi: every name involved takes the union of what any of
    /// them is known to be.
    fn unify_move(
        &mut self,
        rep: &SsaRepresentation,
        is_phi: bool,
        attrs: DataFlowAttributes,
        offset: u32,
    ) -> bool {
        let names: Vec<i32> = std::iter::once(rep.defs[0])
            .chain(rep.uses.iter().copied())
            .filter(|s| (*s as usize) < self.reg_location.len())
            .collect();
        let mut defined_fp = false;
        let mut defined_core = false;
        let mut defined_ref = false;
        let mut is_wide = attrs.contains(DataFlowAttributes::A_WIDE);
        let mut is_high = false;
        for &name in &names {
            let loc = &self.reg_location[name as usize];
            defined_fp |= loc.defined && loc.fp;
            defined_core |= loc.defined && loc.core;
            defined_ref |= loc.defined && loc.is_ref;
            is_wide |= loc.wide;
            is_high |= is_phi && loc.wide && loc.high_word;
        }
        if defined_fp && (defined_core || defined_ref) {
            log::warn!(
                "{}: ambiguous move/phi types at 0x{:04x}",
                self.method_name(),
                offset
            );
            self.disable_opt.insert(DisabledOptimizations::PROMOTE_REGS);
        }

        let mut changed = false;
        for &name in &names {
            if defined_fp {
                changed |= self.set_type(name, TypeCategory::Fp, offset);
            }
            if defined_core {
                changed |= self.set_type(name, TypeCategory::Core, offset);
            }
            if defined_ref {
                changed |= self.set_type(name, TypeCategory::Ref, offset);
            }
            let loc = &mut self.reg_location[name as usize];
            if is_wide && !loc.wide {
                loc.wide = true;
                changed = true;
            }
            if is_high && !loc.high_word {
                loc.high_word = true;
                changed = true;
            }
        }
        changed
    }

    /// Asserts `category` on `s_reg`. The first category a name receives
    /// wins; a different later one is recorded as a conflict.
    pub(crate) fn set_type(&mut self, s_reg: i32, category_to_set: TypeCategory, offset: u32) -> bool {
        let Some(loc) = usize::try_from(s_reg)
            .ok()
            .and_then(|idx| self.reg_location.get_mut(idx))
        else {
            return false;
        };
        match category(loc) {
            Some(existing) if existing == category_to_set => {
                if loc.defined {
                    false
                } else {
                    loc.defined = true;
                    true
                }
            }
            Some(existing) => {
                self.record_type_conflict(s_reg, offset, existing, category_to_set);
                false
            }
            None => {
                match category_to_set {
                    TypeCategory::Fp => loc.fp = true,
                    TypeCategory::Core => loc.core = true,
                    TypeCategory::Ref => loc.is_ref = true,
                }
                loc.defined = true;
                true
            }
        }
    }

    fn record_type_conflict(&mut self, s_reg: i32, offset: u32, kept: TypeCategory, rejected: TypeCategory) {
        let conflict = TypeConflict {
            s_reg,
            offset,
            kept,
            rejected,
        };
        if self.type_conflicts.insert(conflict) {
            log::warn!(
                "{}: {} at 0x{:04x} used as {} but already {}; keeping {}",
                self.method_name(),
                self.get_ssa_name(s_reg),
                offset,
                rejected,
                kept,
                kept
            );
        }
        self.disable_opt.insert(DisabledOptimizations::PROMOTE_REGS);
    }

    /// Marks `low`/`high` as the two halves of one wide value.
    fn mark_wide_pair(&mut self, low: i32, high: i32, offset: u32) -> bool {
        let (Ok(low), Ok(high)) = (usize::try_from(low), usize::try_from(high)) else {
            return false;
        };
        if high >= self.reg_location.len() {
            return false;
        }
        if self.reg_location[low].high_word {
            log::warn!(
                "{}: {} is both a low and a high half at 0x{:04x}",
                self.method_name(),
                self.get_ssa_name(low as i32),
                offset
            );
            self.punt_to_interpreter = true;
            return false;
        }
        let mut changed = false;
        for (idx, is_high) in [(low, false), (high, true)] {
            let loc = &mut self.reg_location[idx];
            if !loc.wide {
                loc.wide = true;
                changed = true;
            }
            if is_high && !loc.high_word {
                loc.high_word = true;
                changed = true;
            }
        }
        changed
    }

    /// After inference, points every location back at its own SSA name.
    /// The base vreg stays available through [`MirGraph::sreg_to_vreg`].
    pub fn remap_reg_locations(&mut self) {
        for (idx, loc) in self.reg_location.iter_mut().enumerate() {
            loc.orig_sreg = idx as i32;
            loc.s_reg_low = idx as i32;
        }
    }
}
