mod common;

use common::{analysed_graph, build_graph, find, find_all};
use dex_mir::analysis::{default_pipeline, run_passes};
use dex_mir::cfg::{BlockType, MirGraph, MirOpcode, OptimizationFlags};
use dex_mir::config::{CompilerOptions, DisabledOptimizations};
use dex_mir::dex::{DecodedInstruction, MethodAssembler, Opcode};

fn null_check_skipped(graph: &MirGraph, opcode: Opcode) -> bool {
    graph
        .mir(find(graph, opcode))
        .optimization_flags
        .contains(OptimizationFlags::IGNORE_NULL_CHECK)
}

/// `T o = new T(); return o.f;` with the read in a second block.
fn allocation_then_read() -> MethodAssembler {
    let mut asm = MethodAssembler::new("int T.fresh()", "I", 2, 0);
    asm.push(DecodedInstruction::new(Opcode::NewInstance, 0, 0, 0));
    asm.push_branch(DecodedInstruction::goto(0), 2);
    asm.push(DecodedInstruction::new(Opcode::Iget, 1, 0, 0));
    asm.push(DecodedInstruction::unary(Opcode::Return, 1));
    asm
}

/// `T o = x == 0 ? new T() : new T(); return o.f;`
fn both_arms_allocate() -> MethodAssembler {
    let mut asm = MethodAssembler::new("int T.either(int)", "II", 2, 1);
    asm.push_branch(DecodedInstruction::if_z(Opcode::IfEqz, 1, 0), 3);
    asm.push(DecodedInstruction::new(Opcode::NewInstance, 0, 0, 0));
    asm.push_branch(DecodedInstruction::goto(0), 4);
    asm.push(DecodedInstruction::new(Opcode::NewInstance, 0, 0, 0));
    asm.push(DecodedInstruction::new(Opcode::Iget, 1, 0, 0));
    asm.push(DecodedInstruction::unary(Opcode::Return, 1));
    asm
}

/// `try { return new int[4][1]; } catch (E e) { return -1; }`
fn guarded_constant_index() -> MethodAssembler {
    let mut asm = MethodAssembler::new("int T.slot()", "I", 4, 0);
    asm.push(DecodedInstruction::literal(Opcode::Const4, 0, 4));
    asm.push(DecodedInstruction::new(Opcode::NewArray, 1, 0, 0));
    asm.push(DecodedInstruction::literal(Opcode::Const4, 2, 1));
    asm.push(DecodedInstruction::new(Opcode::Aget, 3, 1, 2));
    asm.push(DecodedInstruction::unary(Opcode::Return, 3));
    asm.push(DecodedInstruction::unary(Opcode::MoveException, 0));
    asm.push(DecodedInstruction::literal(Opcode::Const4, 3, -1));
    asm.push(DecodedInstruction::unary(Opcode::Return, 3));
    let handlers = asm.add_handlers(vec![(3, 5)], None);
    asm.add_try(3, 3, handlers);
    asm
}

#[test]
fn test_allocation_reaches_read_in_next_block() {
    let mut graph = analysed_graph(allocation_then_read(), &CompilerOptions::default());
    let alloc = graph.mir(find(&graph, Opcode::NewInstance)).bb;
    let read = graph.mir(find(&graph, Opcode::Iget)).bb;
    assert_ne!(alloc, read);
    assert!(null_check_skipped(&graph, Opcode::Iget));

    let stats = graph.count_checks();
    assert_eq!((stats.null_checks, stats.null_checks_eliminated), (1, 1));
}

#[test]
fn test_phi_of_two_allocations_is_non_null() {
    let graph = analysed_graph(both_arms_allocate(), &CompilerOptions::default());
    let iget = graph.mir(find(&graph, Opcode::Iget));
    let join = iget.bb.unwrap();
    let phi = graph
        .block_mirs(join)
        .map(|(_, mir)| mir)
        .find(|mir| mir.is_phi())
        .expect("a phi at the join");
    assert_eq!(iget.uses()[0], phi.defs()[0]);
    assert!(null_check_skipped(&graph, Opcode::Iget));
}

#[test]
fn test_incoming_reference_keeps_its_check() {
    let mut asm = MethodAssembler::new("int T.field(T)", "IL", 2, 1);
    asm.push(DecodedInstruction::new(Opcode::Iget, 0, 1, 0));
    asm.push(DecodedInstruction::new(Opcode::Iget, 0, 1, 0));
    asm.push(DecodedInstruction::unary(Opcode::Return, 0));
    let graph = analysed_graph(asm, &CompilerOptions::default());

    let flags: Vec<bool> = find_all(&graph, Opcode::Iget)
        .into_iter()
        .map(|id| {
            graph
                .mir(id)
                .optimization_flags
                .contains(OptimizationFlags::IGNORE_NULL_CHECK)
        })
        .collect();
    // The first read performs the check, the second relies on it.
    assert_eq!(flags, vec![false, true]);
}

#[test]
fn test_constant_index_into_fresh_array_needs_no_checks() {
    let mut graph = analysed_graph(guarded_constant_index(), &CompilerOptions::default());
    let aget = graph.mir(find(&graph, Opcode::Aget));
    assert!(aget
        .optimization_flags
        .contains(OptimizationFlags::IGNORE_NULL_CHECK | OptimizationFlags::IGNORE_RANGE_CHECK));

    let stats = graph.count_checks();
    assert_eq!((stats.range_checks, stats.range_checks_eliminated), (1, 1));
}

#[test]
fn test_disabled_range_check_elimination_keeps_checks() {
    let mut options = CompilerOptions::default();
    options.disable_opt |= DisabledOptimizations::RANGE_CHECK_ELIMINATION;
    let graph = analysed_graph(guarded_constant_index(), &options);
    let aget = graph.mir(find(&graph, Opcode::Aget));
    assert!(!aget
        .optimization_flags
        .contains(OptimizationFlags::IGNORE_RANGE_CHECK));
    assert!(aget
        .optimization_flags
        .contains(OptimizationFlags::IGNORE_NULL_CHECK));
}

#[test]
fn test_eliminated_checks_let_blocks_merge() {
    let options = CompilerOptions::default();
    let mut graph = build_graph(guarded_constant_index(), &options);
    assert!(graph
        .blocks()
        .iter()
        .any(|bb| bb.last_mir.is_some_and(|last| graph.mir(last).opcode == MirOpcode::Check)));

    run_passes(&mut graph, &default_pipeline()).unwrap();

    assert!(graph
        .blocks()
        .iter()
        .filter(|bb| !bb.is_hidden())
        .flat_map(|bb| graph.mir_ids(bb.id))
        .all(|id| graph.mir(id).opcode != MirOpcode::Check));
    let alloc_block = graph.mir(find(&graph, Opcode::NewArray)).bb;
    assert_eq!(graph.mir(find(&graph, Opcode::Aget)).bb, alloc_block);

    // Nothing reaches the handler any more, so dominance hid it.
    assert!(find_all(&graph, Opcode::MoveException).is_empty());
    let handler = graph
        .blocks()
        .iter()
        .find(|bb| bb.is_catch_entry())
        .expect("the handler block is kept");
    assert!(handler.predecessors.is_empty());
    assert!(handler.is_hidden());
    graph.verify_pred_info().unwrap();
}

#[test]
fn test_check_elimination_reaches_a_fixed_point() {
    let mut graph = analysed_graph(both_arms_allocate(), &CompilerOptions::default());
    let listing = graph.mir_graph_listing();
    graph.run_type_and_check_elimination().unwrap();
    assert_eq!(graph.mir_graph_listing(), listing);
    assert!(graph
        .blocks()
        .iter()
        .filter(|bb| bb.block_type == BlockType::DalvikByteCode && !bb.is_hidden())
        .all(|bb| bb.data_flow_info.is_some()));
}

#[test]
fn test_combining_keeps_handler_phis_in_step() {
    // Two reads with a constant index lose their checks, the last one
    // indexes with the argument and keeps its range check.
    let mut asm = MethodAssembler::new("int T.f(int)", "II", 5, 1);
    asm.push(DecodedInstruction::literal(Opcode::Const4, 0, 4));
    asm.push(DecodedInstruction::new(Opcode::NewArray, 1, 0, 0));
    asm.push(DecodedInstruction::literal(Opcode::Const4, 2, 1));
    asm.push(DecodedInstruction::new(Opcode::Aget, 3, 1, 2));
    asm.push(DecodedInstruction::new(Opcode::Aget, 3, 1, 2));
    asm.push(DecodedInstruction::new(Opcode::Aget, 3, 1, 4));
    asm.push(DecodedInstruction::unary(Opcode::Return, 3));
    asm.push(DecodedInstruction::unary(Opcode::MoveException, 0));
    asm.push(DecodedInstruction::unary(Opcode::Return, 3));
    let handlers = asm.add_handlers(vec![(3, 7)], None);
    asm.add_try(3, 5, handlers);

    let mut graph = build_graph(asm, &CompilerOptions::default());
    run_passes(&mut graph, &default_pipeline()).unwrap();
    graph.verify_dataflow().unwrap();
    graph.verify_pred_info().unwrap();

    let handler = graph
        .blocks()
        .iter()
        .find(|bb| bb.is_catch_entry() && !bb.is_hidden())
        .expect("the surviving check still reaches the handler");
    for id in graph.mir_ids(handler.id) {
        let mir = graph.mir(id);
        if !mir.is_phi() {
            break;
        }
        assert_eq!(mir.phi_incoming(), handler.predecessors.as_slice());
        assert_eq!(mir.uses().len(), handler.predecessors.len());
    }
}
