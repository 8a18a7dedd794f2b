#![allow(dead_code)]

use dex_mir::cfg::{MirGraph, MirId, MirOpcode};
use dex_mir::config::CompilerOptions;
use dex_mir::dex::{
    AccessFlags, DecodedInstruction, MethodAssembler, MethodUnit, Opcode, SwitchPayload,
};

pub fn build_graph(asm: MethodAssembler, options: &CompilerOptions) -> MirGraph {
    let unit = MethodUnit::from_body(asm.finish(), AccessFlags::STATIC);
    dex_mir::build(&unit, options).expect("method should build")
}

pub fn ssa_graph(asm: MethodAssembler) -> MirGraph {
    let mut graph = build_graph(asm, &CompilerOptions::default());
    graph.build_ssa().expect("SSA conversion should succeed");
    graph
}

pub fn analysed_graph(asm: MethodAssembler, options: &CompilerOptions) -> MirGraph {
    let mut graph = build_graph(asm, options);
    graph.build_ssa().expect("SSA conversion should succeed");
    graph
        .run_type_and_check_elimination()
        .expect("check elimination should converge");
    graph
}

/// Every visible instruction with the given bytecode opcode, in block order.
pub fn find_all(graph: &MirGraph, opcode: Opcode) -> Vec<MirId> {
    graph
        .blocks()
        .iter()
        .filter(|bb| !bb.is_hidden())
        .flat_map(|bb| graph.mir_ids(bb.id))
        .filter(|id| graph.mir(*id).opcode == MirOpcode::Dalvik(opcode))
        .collect()
}

pub fn find(graph: &MirGraph, opcode: Opcode) -> MirId {
    find_all(graph, opcode)
        .into_iter()
        .next()
        .unwrap_or_else(|| panic!("no {} in graph", opcode.name()))
}

/// `int pick(int x) { int r = 1; if (x == 0) r = 2; return r; }` as a
/// two-armed diamond.
pub fn diamond() -> MethodAssembler {
    let mut asm = MethodAssembler::new("int T.pick(int)", "II", 2, 1);
    asm.push_branch(DecodedInstruction::if_z(Opcode::IfEqz, 1, 0), 3);
    asm.push(DecodedInstruction::literal(Opcode::Const4, 0, 1));
    asm.push_branch(DecodedInstruction::goto(0), 4);
    asm.push(DecodedInstruction::literal(Opcode::Const4, 0, 2));
    asm.push(DecodedInstruction::unary(Opcode::Return, 0));
    asm
}

/// `int sum(int n) { int s = 0; for (int i = 0; i < n; i++) s += i; return s; }`
pub fn counting_loop() -> MethodAssembler {
    let mut asm = MethodAssembler::new("int T.sum(int)", "II", 3, 1);
    asm.push(DecodedInstruction::literal(Opcode::Const4, 0, 0));
    asm.push(DecodedInstruction::literal(Opcode::Const4, 1, 0));
    asm.push_branch(DecodedInstruction::if_cmp(Opcode::IfGe, 1, 2, 0), 6);
    asm.push(DecodedInstruction::new(Opcode::AddInt2addr, 0, 1, 0));
    asm.push(DecodedInstruction::new(Opcode::AddIntLit8, 1, 1, 1));
    asm.push_branch(DecodedInstruction::goto(0), 2);
    asm.push(DecodedInstruction::unary(Opcode::Return, 0));
    asm
}

/// `switch (x) { case 1: case 2: case 5: ... default: ... }` on a sparse
/// switch with three distinct case targets.
pub fn sparse_switch() -> MethodAssembler {
    let mut asm = MethodAssembler::new("int T.classify(int)", "II", 2, 1);
    asm.push_switch(
        DecodedInstruction::switch(
            Opcode::SparseSwitch,
            1,
            SwitchPayload::Sparse {
                keys: vec![1, 2, 5],
                targets: Vec::new(),
            },
        ),
        vec![3, 5, 7],
    );
    asm.push(DecodedInstruction::literal(Opcode::Const4, 0, 0));
    asm.push(DecodedInstruction::unary(Opcode::Return, 0));
    asm.push(DecodedInstruction::literal(Opcode::Const4, 0, 1));
    asm.push(DecodedInstruction::unary(Opcode::Return, 0));
    asm.push(DecodedInstruction::literal(Opcode::Const4, 0, 2));
    asm.push(DecodedInstruction::unary(Opcode::Return, 0));
    asm.push(DecodedInstruction::literal(Opcode::Const4, 0, 5));
    asm.push(DecodedInstruction::unary(Opcode::Return, 0));
    asm
}

/// An array read inside a try range with one typed handler.
pub fn guarded_array_read() -> MethodAssembler {
    let mut asm = MethodAssembler::new("int T.first(int[])", "IL", 2, 1);
    asm.push(DecodedInstruction::literal(Opcode::Const4, 0, 0));
    asm.push(DecodedInstruction::new(Opcode::Aget, 0, 1, 0));
    asm.push(DecodedInstruction::unary(Opcode::Return, 0));
    asm.push(DecodedInstruction::unary(Opcode::MoveException, 0));
    asm.push(DecodedInstruction::literal(Opcode::Const4, 0, -1));
    asm.push(DecodedInstruction::unary(Opcode::Return, 0));
    let handlers = asm.add_handlers(vec![(7, 3)], None);
    asm.add_try(1, 1, handlers);
    asm
}
