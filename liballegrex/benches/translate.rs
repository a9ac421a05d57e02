use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use liballegrex::{Backend, CpuState, FunctionTranslator, Ram, TranslatorConfig};
use mipsasm::Mipsasm;

const BASE: u32 = 0x0880_0000;

// memset-style inner loop followed by a short epilogue
const LOOP: &str = "
    lui $t0, 0x0880
    ori $t0, $t0, 0x4000
    addiu $t1, $zero, 256
    addiu $t2, $zero, 0x55
fill:
    sw $t2, 0($t0)
    addiu $t0, $t0, 4
    addiu $t1, $t1, -1
    bne $t1, $zero, fill
    nop
    jr $ra
    nop";

fn load() -> Arc<Ram> {
    let ram = Arc::new(Ram::new(BASE, 0x1_0000));
    let mut assembler = Mipsasm::new();
    assembler.base(BASE);
    let words = assembler.assemble(LOOP).expect("assembly failed");
    assert!(ram.load_words(BASE, &words));
    ram
}

fn config(backend: Backend) -> TranslatorConfig {
    TranslatorConfig {
        backend,
        ..TranslatorConfig::default()
    }
}

fn bench_translate(c: &mut Criterion) {
    let ram = load();
    let mut group = c.benchmark_group("translate");

    for (name, backend) in [("threaded", Backend::Threaded), ("cranelift", Backend::Cranelift)] {
        let mut translator =
            FunctionTranslator::new(ram.clone(), config(backend)).expect("translator");
        group.bench_function(BenchmarkId::from_parameter(name), |b| {
            b.iter(|| translator.translate(black_box(BASE)).expect("translation failed"))
        });
    }

    group.finish();
}

fn bench_execute(c: &mut Criterion) {
    let ram = load();
    let mut group = c.benchmark_group("execute");

    for (name, backend) in [("threaded", Backend::Threaded), ("cranelift", Backend::Cranelift)] {
        let mut translator =
            FunctionTranslator::new(ram.clone(), config(backend)).expect("translator");
        let function = translator.translate(BASE).expect("translation failed");
        let mut state = CpuState::new(ram.clone());

        group.bench_function(BenchmarkId::from_parameter(name), |b| {
            b.iter(|| {
                function.call(&mut state);
                black_box(state.pc)
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_translate, bench_execute);
criterion_main!(benches);
