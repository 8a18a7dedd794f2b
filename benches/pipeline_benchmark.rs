use criterion::{black_box, criterion_group, criterion_main, Criterion};
use dex_mir::analysis::{default_pipeline, run_passes};
use dex_mir::config::CompilerOptions;
use dex_mir::dex::{AccessFlags, DecodedInstruction, MethodAssembler, MethodUnit, Opcode};

/// `n` conditional increments of one accumulator, each its own diamond.
fn ladder(n: usize) -> MethodUnit {
    let mut asm = MethodAssembler::new("int Bench.ladder(int)", "II", 2, 1);
    asm.push(DecodedInstruction::literal(Opcode::Const4, 0, 0));
    for i in 0..n {
        asm.push_branch(DecodedInstruction::if_z(Opcode::IfEqz, 1, 0), 2 * i + 3);
        asm.push(DecodedInstruction::new(Opcode::AddIntLit8, 0, 0, 1));
    }
    asm.push(DecodedInstruction::unary(Opcode::Return, 0));
    MethodUnit::from_body(asm.finish(), AccessFlags::STATIC)
}

fn pipeline_benchmark(c: &mut Criterion) {
    let options = CompilerOptions::default();
    let unit = ladder(64);

    c.bench_function("build_graph", |b| {
        b.iter(|| black_box(dex_mir::build(&unit, &options).unwrap()));
    });

    c.bench_function("build_ssa", |b| {
        b.iter(|| {
            let mut graph = dex_mir::build(&unit, &options).unwrap();
            graph.build_ssa().unwrap();
            black_box(graph)
        });
    });

    c.bench_function("default_pipeline", |b| {
        let passes = default_pipeline();
        b.iter(|| {
            let mut graph = dex_mir::build(&unit, &options).unwrap();
            run_passes(&mut graph, &passes).unwrap();
            black_box(graph)
        });
    });
}

criterion_group!(benches, pipeline_benchmark);
criterion_main!(benches);
