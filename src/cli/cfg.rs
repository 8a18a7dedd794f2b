use crate::cfg::builder::build;
use crate::cfg::{BlockType, MirGraph};
use crate::error::Result;
use crate::frontend::load_methods;
use std::fmt::Write as _;
use std::path::Path;

/// Build the block graph of every method in `input` and print blocks,
/// edges and dominators.
pub fn cfg(
    input_path: &Path,
    config: Option<&Path>,
    output_dot: Option<&Path>,
    all_blocks: bool,
) -> Result<()> {
    let options = super::load_options(config)?;
    let methods = load_methods(input_path)?;
    let mut dot = String::new();

    for method in methods {
        let unit = method.into_unit();
        let mut graph = build(&unit, &options)?;
        graph.compute_dominance()?;
        print!("{}", describe(&graph));
        if output_dot.is_some() {
            dot.push_str(&graph.cfg_dot(all_blocks));
        }
    }

    if let Some(path) = output_dot {
        std::fs::write(path, dot)?;
        println!("DOT written to {}", path.display());
    }
    Ok(())
}

fn describe(graph: &MirGraph) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", graph.method_name());
    let _ = writeln!(
        out,
        "  Blocks: {} ({} reachable)",
        graph.num_blocks(),
        graph.num_reachable_blocks()
    );
    for bb in graph.blocks() {
        if bb.is_hidden() {
            continue;
        }
        let _ = write!(out, "  Block {} [{}]", bb.id, bb.block_type.name());
        if bb.block_type == BlockType::DalvikByteCode {
            let _ = write!(out, " @0x{:04x}", bb.start_offset);
        }
        let succs: Vec<String> = graph
            .successor_edges(bb.id)
            .into_iter()
            .map(|(to, kind)| format!("{}({:?})", to, kind))
            .collect();
        let _ = write!(out, " -> [{}]", succs.join(", "));
        if let Some(idom) = bb.i_dom {
            let _ = write!(out, " idom {}", idom);
        }
        let _ = writeln!(out);
    }
    out
}
