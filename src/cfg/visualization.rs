//! Textual and DOT renderings of the MIR graph
//!
//! Everything here is a debugging side channel: listings go to the log and
//! DOT files to a dump directory, one file per method.

use crate::cfg::{BasicBlock, BlockId, BlockType, EdgeKind, MirGraph, MirId, MirMeta};
use crate::dex::DataFlowAttributes;
use crate::error::Result;
use petgraph::visit::EdgeRef;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

impl MirGraph {
    /// `v<vreg>_<subscript>`.
    pub fn get_ssa_name(&self, s_reg: i32) -> String {
        if s_reg < 0 || s_reg as usize >= self.num_ssa_regs() {
            return format!("s{}?", s_reg);
        }
        format!("v{}_{}", self.sreg_to_vreg(s_reg), self.ssa_subscript(s_reg))
    }

    /// Like [`get_ssa_name`](Self::get_ssa_name) with `#value` appended for
    /// known constants. Wide constants print the whole pair unless
    /// `singles_only` is set.
    pub fn get_ssa_name_with_const(&self, s_reg: i32, singles_only: bool) -> String {
        let name = self.get_ssa_name(s_reg);
        let wide = self
            .reg_location
            .get(s_reg as usize)
            .is_some_and(|loc| loc.wide && !loc.high_word);
        if wide && !singles_only {
            if let Some(value) = self.constant_value_wide(s_reg) {
                return format!("{}#0x{:x}", name, value);
            }
        }
        match self.constant_value(s_reg) {
            Some(value) => format!("{}#0x{:x}", name, value),
            None => name,
        }
    }

    /// One-line disassembly of a MIR. Operands print as SSA names once the
    /// graph is in SSA form and as raw vregs before that.
    pub fn disassemble(&self, id: MirId) -> String {
        let mir = self.mir(id);
        let mut out = String::from(mir.opcode.name());

        if mir.is_phi() {
            let def = mir
                .defs()
                .first()
                .map_or_else(|| format!("v{}", mir.dalvik_insn.v_a), |d| self.get_ssa_name(*d));
            let incoming: Vec<String> = mir
                .uses()
                .iter()
                .zip(mir.phi_incoming())
                .map(|(name, pred)| format!("{}:{}", self.get_ssa_name_with_const(*name, false), pred))
                .collect();
            let _ = write!(out, " {} = ({})", def, incoming.join(", "));
            return out;
        }

        let operands: Vec<String> = match &mir.ssa_rep {
            Some(rep) => rep
                .defs
                .iter()
                .map(|d| self.get_ssa_name(*d))
                .chain(rep.uses.iter().map(|u| self.get_ssa_name_with_const(*u, false)))
                .collect(),
            None => raw_operands(mir.dataflow_attributes(), &mir.dalvik_insn),
        };
        if !operands.is_empty() {
            let _ = write!(out, " {}", operands.join(", "));
        }

        if mir.opcode.dalvik().is_some() {
            let insn = &mir.dalvik_insn;
            if let Some(value) = insn.narrow_literal() {
                let _ = write!(out, ", #{}", value);
            } else if let Some(value) = insn.wide_literal() {
                let _ = write!(out, ", #{}", value);
            }
            if let Some(rel) = insn.branch_offset() {
                let target = mir.offset as i64 + rel as i64;
                let _ = write!(out, " -> 0x{:04x}", target);
            }
        }
        match mir.meta {
            MirMeta::Condition(cc) => {
                let _ = write!(out, " [{:?}]", cc);
            }
            MirMeta::ThrowInsn(throw) => {
                let _ = write!(out, " [{}]", self.mir(throw).opcode.name());
            }
            _ => {}
        }
        out
    }

    /// Full listing: method header, then each visible block with its
    /// predecessors, instructions and outgoing edges.
    pub fn mir_graph_listing(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}", self.method_name());
        if let Some(body) = self.method_body() {
            let _ = writeln!(
                out,
                "Regs (excluding ins) : {}",
                body.registers_size.saturating_sub(body.ins_size)
            );
            let _ = writeln!(out, "Ins                  : {}", body.ins_size);
            let _ = writeln!(out, "Outs                 : {}", body.outs_size);
        }
        for bb in self.blocks.iter().filter(|bb| !bb.is_hidden()) {
            let preds: Vec<String> = bb.predecessors.iter().map(|p| p.to_string()).collect();
            let _ = writeln!(
                out,
                "Block {} ({}) @0x{:04x} preds: [{}]",
                bb.id,
                bb.block_type.name(),
                bb.start_offset,
                preds.join(", ")
            );
            for (id, mir) in self.block_mirs(bb.id) {
                let _ = writeln!(out, "  0x{:04x}: {}", mir.offset, self.disassemble(id));
            }
            for (succ, kind) in self.successor_edges(bb.id) {
                let _ = writeln!(out, "  {} -> {}", kind, succ);
            }
        }
        out
    }

    /// Writes [`mir_graph_listing`](Self::mir_graph_listing) to the log.
    pub fn dump_mir_graph(&self) {
        log::debug!("{}", self.mir_graph_listing());
    }

    /// Type table, one line per SSA name.
    pub fn dump_reg_loc_table(&self) -> String {
        let mut out = String::new();
        for (idx, loc) in self.reg_location.iter().enumerate() {
            let _ = writeln!(out, "Loc[{:02}] : {} S{}", idx, loc, loc.s_reg_low);
        }
        out
    }

    /// Renders the graph as DOT. Hidden blocks are left out unless
    /// `all_blocks` is set.
    pub fn cfg_dot(&self, all_blocks: bool) -> String {
        let shown = |bb: &BasicBlock| all_blocks || !bb.is_hidden();
        let mut dot = String::new();
        dot.push_str("digraph G {\n");
        dot.push_str("  rankdir=TB;\n");
        dot.push_str("  node [shape=box, fontname=\"Courier\"];\n\n");

        for bb in self.blocks.iter().filter(|bb| shown(bb)) {
            let name = dot_node_name(bb);
            match bb.block_type {
                BlockType::Entry | BlockType::Exit => {
                    let _ = writeln!(dot, "  {} [shape=Mdiamond];", name);
                }
                BlockType::ExceptionHandling => {
                    let _ = writeln!(dot, "  {} [shape=invhouse];", name);
                }
                _ => {
                    let mut label = format!("block {} @0x{:04x}\\l", bb.id, bb.start_offset);
                    for (id, mir) in self.block_mirs(bb.id) {
                        let line = format!("0x{:04x} {}", mir.offset, self.disassemble(id));
                        label.push_str(&escape_label(&line));
                        label.push_str("\\l");
                    }
                    let style = if bb.is_hidden() { ", style=dashed" } else { "" };
                    let _ = writeln!(dot, "  {} [label=\"{}\"{}];", name, label, style);
                }
            }
        }
        dot.push('\n');

        let (graph, _) = self.to_petgraph();
        for edge in graph.edge_references() {
            let from = self.block(graph[edge.source()]);
            let to = self.block(graph[edge.target()]);
            if !shown(from) || !shown(to) {
                continue;
            }
            let kind = edge.weight();
            let _ = writeln!(
                dot,
                "  {} -> {} [{}];",
                dot_node_name(from),
                dot_node_name(to),
                edge_attributes(kind)
            );
        }
        dot.push_str("}\n");
        dot
    }

    /// Writes the DOT rendering to `<dir>/<method>[suffix].dot` and
    /// returns the path.
    pub fn dump_cfg(&self, dir: &Path, all_blocks: bool, suffix: Option<&str>) -> Result<PathBuf> {
        let mut file_name = mangle_method_name(self.method_name());
        if let Some(suffix) = suffix {
            file_name.push_str(suffix);
        }
        file_name.push_str(".dot");
        std::fs::create_dir_all(dir)?;
        let path = dir.join(file_name);
        std::fs::write(&path, self.cfg_dot(all_blocks))?;
        log::debug!("wrote CFG of {} to {}", self.method_name(), path.display());
        Ok(path)
    }
}

fn raw_operands(attrs: DataFlowAttributes, insn: &crate::dex::DecodedInstruction) -> Vec<String> {
    type Df = DataFlowAttributes;
    let mut operands = Vec::new();
    if attrs.intersects(Df::FORMAT_35C | Df::FORMAT_3RC) {
        operands.extend(insn.invoke_args().iter().map(|v| format!("v{}", v)));
        return operands;
    }
    if attrs.intersects(Df::DA | Df::UA) {
        operands.push(format!("v{}", insn.v_a));
    }
    if attrs.contains(Df::UB) {
        operands.push(format!("v{}", insn.v_b));
    }
    if attrs.contains(Df::UC) {
        operands.push(format!("v{}", insn.v_c));
    }
    operands
}

fn dot_node_name(bb: &BasicBlock) -> String {
    match bb.block_type {
        BlockType::Entry => format!("entry_{}", bb.id),
        BlockType::Exit => format!("exit_{}", bb.id),
        BlockType::ExceptionHandling => format!("exception_{}", bb.id),
        _ => format!("block{:04x}_{}", bb.start_offset, bb.id),
    }
}

fn edge_attributes(kind: &EdgeKind) -> String {
    let (color, style) = match kind {
        EdgeKind::Fall => ("gray", "dotted"),
        EdgeKind::Taken => ("black", "solid"),
        EdgeKind::Switch(_) => ("blue", "solid"),
        EdgeKind::Default => ("orange", "solid"),
        EdgeKind::Catch(_) => ("purple", "dashed"),
    };
    format!("label=\"{}\", color=\"{}\", style={}", kind, color, style)
}

fn escape_label(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

/// File-system safe form of a method name.
fn mangle_method_name(name: &str) -> String {
    let mangled: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' { c } else { '_' })
        .collect();
    if mangled.is_empty() {
        "method".to_string()
    } else {
        mangled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::builder::build;
    use crate::config::CompilerOptions;
    use crate::dex::{AccessFlags, DecodedInstruction, MethodAssembler, MethodUnit, Opcode};

    fn looping() -> MirGraph {
        let mut asm = MethodAssembler::new("void T.spin(int)", "VI", 1, 1);
        let head = asm.push(DecodedInstruction::new(Opcode::AddIntLit8, 0, 0, 0xff));
        asm.push_branch(DecodedInstruction::if_z(Opcode::IfNez, 0, 0), head);
        asm.push(DecodedInstruction::unary(Opcode::ReturnVoid, 0));
        let unit = MethodUnit::from_body(asm.finish(), AccessFlags::STATIC);
        build(&unit, &CompilerOptions::default()).unwrap()
    }

    #[test]
    fn test_disassembly_before_and_after_ssa() {
        let mut graph = looping();
        let head = graph.block(graph.entry_block()).fall_through.unwrap();
        let add = graph.mir_ids(head)[0];
        assert_eq!(graph.disassemble(add), "add-int/lit8 v0, v0");

        graph.build_ssa().unwrap();
        let head = graph.mir_ids(head);
        // The loop head starts with the phi merging the argument and the
        // incremented value.
        assert!(graph.disassemble(head[0]).starts_with("Phi v0_1 = (v0_0:"));
        assert!(graph.disassemble(head[1]).starts_with("add-int/lit8 v0_2, v0_1"));
        assert!(graph.disassemble(head[2]).ends_with("-> 0x0000"));
    }

    #[test]
    fn test_mangled_dump_name_and_dot_contents() {
        let graph = looping();
        let dir = tempfile::tempdir().unwrap();
        let path = graph.dump_cfg(dir.path(), false, Some("_pre")).unwrap();
        assert_eq!(path.file_name().unwrap(), "void_T.spin_int__pre.dot");

        let dot = std::fs::read_to_string(&path).unwrap();
        assert!(dot.starts_with("digraph G {"));
        assert!(dot.contains("entry_0 [shape=Mdiamond];"));
        assert!(dot.contains("label=\"taken\""));
        assert!(dot.trim_end().ends_with('}'));
    }

    #[test]
    fn test_ssa_names() {
        let mut graph = looping();
        graph.build_ssa().unwrap();
        assert_eq!(graph.get_ssa_name(0), "v0_0");
        assert_eq!(graph.get_ssa_name(1), "v-2_0");
        assert_eq!(graph.get_ssa_name(99), "s99?");
    }

    #[test]
    fn test_labels_escape_quotes_and_backslashes() {
        assert_eq!(escape_label(r#"const-string v0, "a\b""#), r#"const-string v0, \"a\\b\""#);

        let dot = looping().cfg_dot(false);
        for line in dot.lines().filter(|line| line.contains("[label=\"block")) {
            let label = &line[line.find("label=\"").unwrap() + 7..line.rfind('"').unwrap()];
            assert!(!label.replace("\\\"", "").contains('"'));
        }
    }
}
