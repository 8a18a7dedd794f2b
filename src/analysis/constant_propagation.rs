//! Constant tracking for SSA names
//!
//! Literal loads define constants; moves of constants copy them. A name
//! becomes constant once and never changes, so nothing flows backwards.

use crate::cfg::{BlockId, MirGraph};
use crate::dex::DataFlowAttributes;

impl MirGraph {
    /// Marks `s_reg` constant with `value` unless it already is.
    pub(crate) fn set_constant(&mut self, s_reg: i32, value: i32) -> bool {
        let Ok(idx) = usize::try_from(s_reg) else {
            return false;
        };
        if idx >= self.constant_values.len() || self.is_constant_v.contains(idx) {
            return false;
        }
        self.is_constant_v.insert(idx);
        self.constant_values[idx] = value;
        if let Some(loc) = self.reg_location.get_mut(idx) {
            loc.is_const = true;
        }
        true
    }

    /// Splits a 64-bit constant over a low/high name pair.
    pub(crate) fn set_constant_wide(&mut self, low: i32, high: i32, value: i64) -> bool {
        let low_changed = self.set_constant(low, value as i32);
        let high_changed = self.set_constant(high, (value >> 32) as i32);
        low_changed || high_changed
    }

    /// Propagates constants through one block. Returns whether a new
    /// constant was found.
    pub(crate) fn propagate_constants(&mut self, block: BlockId) -> bool {
        type Df = DataFlowAttributes;
        let mut changed = false;
        for id in self.mir_ids(block) {
            let mir = self.mir(id);
            let Some(rep) = mir.ssa_rep.as_ref() else {
                continue;
            };
            let attrs = mir.dataflow_attributes();
            if attrs.contains(Df::SETS_CONST) {
                let insn = &mir.dalvik_insn;
                if attrs.contains(Df::A_WIDE) {
                    if let (Some(value), [low, high, ..]) = (insn.wide_literal(), rep.defs.as_slice()) {
                        let (low, high) = (*low, *high);
                        changed |= self.set_constant_wide(low, high, value);
                    }
                } else if let (Some(value), Some(&def)) = (insn.narrow_literal(), rep.defs.first()) {
                    changed |= self.set_constant(def, value);
                }
            } else if attrs.contains(Df::IS_MOVE) {
                let copies: Option<Vec<(i32, i32)>> = rep
                    .defs
                    .iter()
                    .zip(rep.uses.iter())
                    .map(|(&def, &src)| self.constant_value(src).map(|value| (def, value)))
                    .collect();
                if let Some(copies) = copies {
                    for (def, value) in copies {
                        changed |= self.set_constant(def, value);
                    }
                }
            }
        }
        changed
    }
}
