mod common;

use common::{build_graph, counting_loop, diamond, guarded_array_read, sparse_switch};
use dex_mir::cfg::{BlockFlags, BlockListType, BlockType, EdgeKind, MirGraph, MirOpcode};
use dex_mir::config::{CompilerOptions, DisabledOptimizations};
use dex_mir::dex::{DecodedInstruction, MethodAssembler, Opcode};
use dex_mir::Error;
use std::collections::BTreeSet;

/// Offsets of the bytecode instructions of every visible block, in order.
fn offsets_by_block(graph: &MirGraph) -> Vec<Vec<u32>> {
    graph
        .blocks()
        .iter()
        .filter(|bb| !bb.is_hidden())
        .map(|bb| {
            graph
                .block_mirs(bb.id)
                .filter(|(_, mir)| matches!(mir.opcode, MirOpcode::Dalvik(_)))
                .map(|(_, mir)| mir.offset)
                .collect()
        })
        .collect()
}

#[test]
fn test_blocks_partition_the_instructions() {
    for asm in [diamond(), counting_loop(), sparse_switch(), guarded_array_read()] {
        let graph = build_graph(asm, &CompilerOptions::default());
        let body: BTreeSet<u32> = graph
            .method_body()
            .unwrap()
            .instructions
            .iter()
            .map(|i| i.offset)
            .collect();

        let mut seen = BTreeSet::new();
        for offsets in offsets_by_block(&graph) {
            assert!(offsets.windows(2).all(|w| w[0] < w[1]));
            for offset in offsets {
                assert!(seen.insert(offset), "offset {} in two blocks", offset);
            }
        }
        assert_eq!(seen, body, "{}", graph.method_name());
        graph.verify_pred_info().unwrap();
    }
}

#[test]
fn test_sparse_switch_has_four_tagged_edges() {
    let graph = build_graph(sparse_switch(), &CompilerOptions::default());
    let entry = graph.block(graph.entry_block());
    let switch_block = entry.fall_through.unwrap();
    let bb = graph.block(switch_block);
    assert_eq!(bb.successors.kind, BlockListType::SparseSwitch);

    let edges = graph.successor_edges(switch_block);
    assert_eq!(edges.len(), 4);
    let kinds: Vec<EdgeKind> = edges.iter().map(|(_, kind)| *kind).collect();
    assert_eq!(
        kinds,
        vec![
            EdgeKind::Default,
            EdgeKind::Switch(1),
            EdgeKind::Switch(2),
            EdgeKind::Switch(5)
        ]
    );
    let targets: BTreeSet<_> = edges.iter().map(|(to, _)| *to).collect();
    assert_eq!(targets.len(), 4);
    for target in targets {
        assert_eq!(graph.block(target).predecessors, vec![switch_block]);
    }
}

#[test]
fn test_throwing_instruction_in_try_gets_catch_edge() {
    let graph = build_graph(guarded_array_read(), &CompilerOptions::default());
    let check_block = graph
        .blocks()
        .iter()
        .find(|bb| {
            bb.last_mir
                .is_some_and(|last| graph.mir(last).opcode == MirOpcode::Check)
        })
        .expect("a check block");

    assert_eq!(check_block.successors.kind, BlockListType::Catch);
    let handler = check_block.successors.blocks[0].block;
    assert_eq!(check_block.successors.blocks[0].key, 7);
    assert!(graph.block(handler).flags.contains(BlockFlags::CATCH_ENTRY));
    assert!(graph.catches().contains(&graph.block(handler).start_offset));

    let work = check_block.fall_through.unwrap();
    assert_eq!(graph.block(work).predecessors, vec![check_block.id]);
    let first = graph.block(work).first_mir.unwrap();
    assert_eq!(graph.mir(first).opcode, MirOpcode::Dalvik(Opcode::Aget));
    let check = graph.mir(check_block.last_mir.unwrap());
    assert_eq!(check.throw_insn(), Some(first));
}

#[test]
fn test_exception_edges_outside_try_when_not_suppressed() {
    let mut asm = MethodAssembler::new("int T.len(int[])", "IL", 2, 1);
    asm.push(DecodedInstruction::new(Opcode::ArrayLength, 0, 1, 0));
    asm.push(DecodedInstruction::unary(Opcode::Return, 0));

    let default = build_graph(asm.clone(), &CompilerOptions::default());
    assert!(default
        .blocks()
        .iter()
        .all(|bb| bb.block_type != BlockType::ExceptionHandling));

    let mut options = CompilerOptions::default();
    options.disable_opt |= DisabledOptimizations::SUPPRESS_EXCEPTION_EDGES;
    let graph = build_graph(asm, &options);
    let eh = graph
        .blocks()
        .iter()
        .find(|bb| bb.block_type == BlockType::ExceptionHandling)
        .expect("an exception block");
    assert_eq!(eh.predecessors.len(), 1);
    let thrower = graph.block(eh.predecessors[0]);
    assert_eq!(thrower.taken, Some(eh.id));
    assert_eq!(
        graph.mir(thrower.last_mir.unwrap()).opcode,
        MirOpcode::Check
    );
}

#[test]
fn test_branch_counts_and_offsets() {
    let graph = build_graph(counting_loop(), &CompilerOptions::default());
    assert_eq!(graph.num_backward_branches(), 1);
    assert_eq!(graph.num_forward_branches(), 1);
    let header = graph
        .blocks()
        .iter()
        .find(|bb| bb.block_type == BlockType::DalvikByteCode && bb.start_offset == 2)
        .unwrap();
    assert!(header.flags.contains(BlockFlags::CONDITIONAL_BRANCH));
    assert_eq!(header.predecessors.len(), 2);
}

#[test]
fn test_malformed_methods_produce_no_graph() {
    let mut asm = MethodAssembler::new("void T.bad()", "V", 1, 0);
    asm.push(DecodedInstruction::goto(12));
    asm.push(DecodedInstruction::unary(Opcode::ReturnVoid, 0));
    let unit = dex_mir::dex::MethodUnit::from_body(asm.finish(), Default::default());
    // Jumps past the end of the code.
    let err = dex_mir::build(&unit, &CompilerOptions::default()).unwrap_err();
    assert!(!err.is_recoverable());
    assert!(matches!(
        err,
        Error::MalformedControlFlow { .. } | Error::InvalidInstruction { .. }
    ));
}
