use serde::Serialize;
use std::fmt;

/// Base vreg of the SSA name that holds the current method pointer.
pub const SSA_METHOD_BASEREG: i32 = -2;
/// Base vreg marking an invalid SSA name.
pub const INVALID_VREG: i32 = -1;

/// Where a value lives before register allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum RegLocationType {
    #[default]
    DalvikFrame,
    PhysReg,
    CompilerTemp,
}

impl RegLocationType {
    pub fn name(self) -> &'static str {
        match self {
            RegLocationType::DalvikFrame => "Frame ",
            RegLocationType::PhysReg => "PhysReg",
            RegLocationType::CompilerTemp => "CompilerTemp",
        }
    }
}

/// Type and location facts for one SSA name.
///
/// A wide value occupies two consecutive names; the second has `high_word`
/// set. `fp`, `core` and `is_ref` are mutually exclusive once `defined`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegLocation {
    pub location: RegLocationType,
    pub wide: bool,
    pub defined: bool,
    pub is_const: bool,
    pub fp: bool,
    pub core: bool,
    pub is_ref: bool,
    pub high_word: bool,
    pub home: bool,
    /// Read before any definition on some path.
    pub undefined: bool,
    pub s_reg_low: i32,
    pub orig_sreg: i32,
}

impl Default for RegLocation {
    fn default() -> Self {
        Self {
            location: RegLocationType::DalvikFrame,
            wide: false,
            defined: false,
            is_const: false,
            fp: false,
            core: false,
            is_ref: false,
            high_word: false,
            home: false,
            undefined: false,
            s_reg_low: INVALID_VREG,
            orig_sreg: INVALID_VREG,
        }
    }
}

impl fmt::Display for RegLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flag = |set: bool, yes: char, no: char| if set { yes } else { no };
        write!(
            f,
            "{}, {} {} {} {} {} {}",
            self.location.name(),
            flag(self.wide, 'W', 'N'),
            flag(self.defined, 'D', 'U'),
            if self.fp {
                'F'
            } else if self.is_ref {
                'R'
            } else {
                'C'
            },
            flag(self.is_const, 'c', 'n'),
            flag(self.high_word, 'H', 'L'),
            flag(self.home, 'h', 't'),
        )
    }
}
