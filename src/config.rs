//! Compiler configuration
//!
//! Options are plain serde structs so a driver can load them from JSON and
//! override individual fields from the command line.

use crate::error::Result;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

bitflags! {
    /// Optimizations that are switched *off*. An empty set enables everything.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct DisabledOptimizations: u32 {
        const LOAD_STORE_ELIMINATION   = 1 << 0;
        const LOAD_HOISTING            = 1 << 1;
        const SUPPRESS_LOADS           = 1 << 2;
        const NULL_CHECK_ELIMINATION   = 1 << 3;
        const PROMOTE_REGS             = 1 << 4;
        const TRACK_LIVE_TEMPS         = 1 << 5;
        const SAFE_OPTIMIZATIONS       = 1 << 6;
        const BB_OPT                   = 1 << 7;
        const MATCH                    = 1 << 8;
        const PROMOTE_COMPILER_TEMPS   = 1 << 9;
        const BRANCH_FUSING            = 1 << 10;
        const SUPPRESS_EXCEPTION_EDGES = 1 << 11;
        const RANGE_CHECK_ELIMINATION  = 1 << 12;
    }
}

impl Default for DisabledOptimizations {
    fn default() -> Self {
        DisabledOptimizations::LOAD_STORE_ELIMINATION
    }
}

bitflags! {
    /// Debug and instrumentation switches.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct DebugFlags: u32 {
        const VERBOSE           = 1 << 0;
        const DUMP_CFG          = 1 << 1;
        const VERIFY_DATAFLOW   = 1 << 2;
        const COUNT_OPCODES     = 1 << 3;
        const DUMP_CHECK_STATS  = 1 << 4;
        const SHOW_FILTER_STATS = 1 << 5;
        const TIMINGS           = 1 << 6;
    }
}

impl Default for DebugFlags {
    fn default() -> Self {
        DebugFlags::empty()
    }
}

/// How aggressively the driver is willing to spend compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompilerFilter {
    InterpretOnly,
    Space,
    #[default]
    Balanced,
    Speed,
    Everything,
}

impl std::str::FromStr for CompilerFilter {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "interpret-only" => Ok(CompilerFilter::InterpretOnly),
            "space" => Ok(CompilerFilter::Space),
            "balanced" => Ok(CompilerFilter::Balanced),
            "speed" => Ok(CompilerFilter::Speed),
            "everything" => Ok(CompilerFilter::Everything),
            other => Err(format!("unknown compiler filter '{}'", other)),
        }
    }
}

/// Method-size cutoffs (in code units) used by the compiler filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MethodThresholds {
    pub huge: u32,
    pub large: u32,
    pub small: u32,
    pub tiny: u32,
}

impl Default for MethodThresholds {
    fn default() -> Self {
        Self {
            huge: 10_000,
            large: 600,
            small: 60,
            tiny: 20,
        }
    }
}

/// Options for one compilation session, shared read-only by every worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerOptions {
    pub disable_opt: DisabledOptimizations,
    pub debug: DebugFlags,
    pub filter: CompilerFilter,
    pub thresholds: MethodThresholds,
    /// Directory receiving `.dot` dumps when `DebugFlags::DUMP_CFG` is set.
    pub dump_dir: Option<PathBuf>,
    /// Appended to dump file names, before the extension.
    pub dump_suffix: Option<String>,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            disable_opt: DisabledOptimizations::default(),
            debug: DebugFlags::empty(),
            filter: CompilerFilter::default(),
            thresholds: MethodThresholds::default(),
            dump_dir: None,
            dump_suffix: None,
        }
    }
}

impl CompilerOptions {
    /// Loads options from a JSON file. Missing fields keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn verbose(&self) -> bool {
        self.debug.contains(DebugFlags::VERBOSE) || log::log_enabled!(log::Level::Trace)
    }
}
