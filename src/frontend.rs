//! Per-method compilation driver
//!
//! Builds the graph, applies the compiler filter, runs the default pass
//! sequence and collects a summary. Every failure ends up in the returned
//! [`CompilationOutcome`]; nothing escapes to the caller.

use crate::analysis::{default_pipeline, run_passes, CheckStats};
use crate::cfg::builder::build;
use crate::cfg::MirGraph;
use crate::config::{CompilerOptions, DebugFlags};
use crate::dex::{AccessFlags, MethodBody, MethodUnit, Opcode};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One method as read from a JSON input file.
#[derive(Debug, Clone, Deserialize)]
pub struct MethodInput {
    #[serde(default)]
    pub access_flags: AccessFlags,
    #[serde(default)]
    pub method_idx: u32,
    #[serde(flatten)]
    pub body: MethodBody,
}

impl MethodInput {
    pub fn into_unit(self) -> MethodUnit {
        let mut unit = MethodUnit::from_body(self.body, self.access_flags);
        unit.method_idx = self.method_idx;
        unit
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MethodFile {
    Many(Vec<MethodInput>),
    One(Box<MethodInput>),
}

/// Reads a JSON file holding either one method or an array of methods.
pub fn load_methods(path: &Path) -> Result<Vec<MethodInput>> {
    let text = std::fs::read_to_string(path)?;
    Ok(match serde_json::from_str(&text)? {
        MethodFile::Many(methods) => methods,
        MethodFile::One(method) => vec![*method],
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CompilationStatus {
    Compiled,
    /// Left to the interpreter: filtered out, too large or unsupported.
    Skipped,
    /// The method's code is broken; it must never run compiled.
    Rejected,
}

/// What happened to one method.
#[derive(Debug, Clone, Serialize)]
pub struct CompilationOutcome {
    pub method: String,
    pub status: CompilationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub blocks: usize,
    pub ssa_names: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checks: Option<CheckStats>,
    pub type_conflicts: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opcode_counts: Option<Vec<(String, u32)>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dump: Option<PathBuf>,
}

impl CompilationOutcome {
    fn without_graph(method: &str, status: CompilationStatus, reason: String) -> Self {
        Self {
            method: method.to_string(),
            status,
            reason: Some(reason),
            blocks: 0,
            ssa_names: 0,
            checks: None,
            type_conflicts: 0,
            opcode_counts: None,
            dump: None,
        }
    }

    fn from_graph(graph: &MirGraph, status: CompilationStatus, reason: Option<String>) -> Self {
        let opcode_counts = graph.opcode_stats().map(|counts| {
            counts
                .iter()
                .enumerate()
                .filter(|(_, count)| **count > 0)
                .filter_map(|(code, count)| {
                    Opcode::from_code(code as u8).map(|op| (op.name().to_string(), *count))
                })
                .collect()
        });
        Self {
            method: graph.method_name().to_string(),
            status,
            reason,
            blocks: graph.num_reachable_blocks(),
            ssa_names: graph.num_ssa_regs(),
            checks: graph.check_stats().copied(),
            type_conflicts: graph.type_conflicts().len(),
            opcode_counts,
            dump: None,
        }
    }
}

/// Compiles one method with the default pass sequence.
pub fn compile_method(unit: &MethodUnit, options: &CompilerOptions) -> CompilationOutcome {
    let name = unit.body.name.as_str();
    let mut graph = match build(unit, options) {
        Ok(graph) => graph,
        Err(err) => {
            let status = if err.is_recoverable() {
                CompilationStatus::Skipped
            } else {
                CompilationStatus::Rejected
            };
            log::debug!("{}: not compiled: {}", name, err);
            return CompilationOutcome::without_graph(name, status, err.to_string());
        }
    };

    if graph.skip_compilation(options.filter, &options.thresholds) {
        log::debug!("{}: skipped by the {:?} filter", name, options.filter);
        return CompilationOutcome::from_graph(
            &graph,
            CompilationStatus::Skipped,
            Some(format!("filtered out ({:?})", options.filter)),
        );
    }

    if let Err(err) = run_passes(&mut graph, &default_pipeline()) {
        log::warn!("{}: pass failed: {}", name, err);
        let status = if err.is_recoverable() {
            CompilationStatus::Skipped
        } else {
            CompilationStatus::Rejected
        };
        return CompilationOutcome::from_graph(&graph, status, Some(err.to_string()));
    }
    graph.count_checks();

    if options.debug.contains(DebugFlags::VERBOSE) {
        graph.dump_mir_graph();
        log::debug!("{}: locations\n{}", name, graph.dump_reg_loc_table());
    }

    let (status, reason) = if graph.punt_to_interpreter() {
        (
            CompilationStatus::Skipped,
            Some("inconsistent wide register pair".to_string()),
        )
    } else {
        (CompilationStatus::Compiled, None)
    };
    let mut outcome = CompilationOutcome::from_graph(&graph, status, reason);

    if options.debug.contains(DebugFlags::DUMP_CFG) {
        let dir = options.dump_dir.as_deref().unwrap_or_else(|| Path::new("."));
        match graph.dump_cfg(dir, false, options.dump_suffix.as_deref()) {
            Ok(path) => outcome.dump = Some(path),
            Err(err) => log::warn!("{}: could not write CFG dump: {}", name, err),
        }
    }
    outcome
}
