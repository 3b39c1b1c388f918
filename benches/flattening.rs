#![allow(unused)]
extern crate tangle;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use tangle::{ir::builder::*, prelude::*};

/// A sprite with `scripts` green flag scripts, each a few nested loops and branches.
fn synthetic_project(scripts: usize) -> Project {
    let mut project = Project::new();
    let cat = project.add_sprite("Cat");
    let target = &mut project.targets[cat];
    let x = target.add_variable("x", 0.0);
    let i = target.add_variable("i", 0.0);
    let log = target.add_list("log", vec![]);

    for n in 0..scripts {
        let n = n as f64;
        target.add_script(
            when_flag_clicked(),
            vec![
                set_var(&x, n).into(),
                repeat(
                    4.0,
                    vec![
                        if_else(
                            gt(var(&x), 10.0),
                            vec![change_var(&x, -3.0).into()],
                            vec![change_var(&x, 5.0).into()],
                        )
                        .into(),
                        for_each(&i, 3.0, vec![add_to_list(&log, var(&i)).into()]).into(),
                    ],
                )
                .into(),
                delete_all_of_list(&log).into(),
            ],
        );
    }
    project
}

/// Benchmark the obfuscation pipeline over growing numbers of scripts.
fn bench_obfuscate(c: &mut Criterion) {
    let mut group = c.benchmark_group("obfuscate");
    for scripts in [1usize, 16, 128] {
        let project = synthetic_project(scripts);
        group.throughput(Throughput::Elements(scripts as u64));
        group.bench_with_input(BenchmarkId::from_parameter(scripts), &project, |b, project| {
            b.iter(|| {
                let mut copy = project.clone();
                let report = Obfuscator::new(ObfuscatorConfig::seeded(1))
                    .process(black_box(&mut copy))
                    .unwrap();
                black_box(report)
            });
        });
    }
    group.finish();
}

/// Benchmark both dispatcher shapes on a single large script.
fn bench_dispatch_styles(c: &mut Criterion) {
    let project = synthetic_project(1);
    let mut group = c.benchmark_group("dispatch");
    for (name, dispatch) in [("tree", DispatchStyle::Tree), ("chain", DispatchStyle::Chain)] {
        group.bench_function(name, |b| {
            b.iter(|| {
                let mut config = ObfuscatorConfig::seeded(2);
                config.flatten.dispatch = dispatch;
                config.flatten.dead_states = 32;
                let mut copy = project.clone();
                black_box(Obfuscator::new(config).process(&mut copy).unwrap())
            });
        });
    }
    group.finish();
}

/// Benchmark emulating an original project against its flattened copy.
fn bench_emulation(c: &mut Criterion) {
    let original = synthetic_project(8);
    let mut flattened = original.clone();
    let report = Obfuscator::new(ObfuscatorConfig::seeded(3))
        .process(&mut flattened)
        .unwrap();

    let mut group = c.benchmark_group("emulation");
    for (name, project) in [("original", &original), ("flattened", &flattened)] {
        group.bench_function(name, |b| {
            b.iter(|| {
                let mut runtime = Runtime::new(project.clone(), EmulationConfig::default());
                runtime.hide_stores(report.internal_stores.iter().cloned());
                runtime.green_flag().unwrap();
                black_box(runtime.run().unwrap())
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_obfuscate, bench_dispatch_styles, bench_emulation);
criterion_main!(benches);
