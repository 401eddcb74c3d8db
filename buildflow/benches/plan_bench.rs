//! Benchmarks for plan resolution.

use buildflow::pipeline::{resolve, StageSet};
use buildflow::stages::{CommandSpec, StageDescriptor};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

/// Builds `width` independent chains of `depth` stages each, declared in
/// reverse so the resolver has to reorder them.
fn layered(width: usize, depth: usize) -> Vec<StageDescriptor> {
    let mut stages = Vec::with_capacity(width * depth);
    for level in (0..depth).rev() {
        for lane in 0..width {
            let mut stage = StageDescriptor::new(format!("stage-{lane}-{level}"))
                .with_command(CommandSpec::new("make").with_arg("install"));
            if level > 0 {
                stage = stage.with_dependency(format!("stage-{lane}-{}", level - 1));
            }
            if level > 0 && lane > 0 {
                stage = stage.with_dependency(format!("stage-{}-{}", lane - 1, level - 1));
            }
            stages.push(stage);
        }
    }
    stages
}

fn resolve_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve");
    for (width, depth) in [(4, 4), (16, 16), (32, 64)] {
        let stages = layered(width, depth);
        group.bench_with_input(
            BenchmarkId::from_parameter(width * depth),
            &stages,
            |b, stages| b.iter(|| resolve(black_box(stages))),
        );
    }
    group.finish();
}

fn plan_for_benchmark(c: &mut Criterion) {
    let Ok(set) = StageSet::new(layered(16, 16)) else {
        return;
    };
    c.bench_function("plan_for_single_leaf", |b| {
        b.iter(|| set.plan_for(black_box(&["stage-15-15"])))
    });
}

criterion_group!(benches, resolve_benchmark, plan_for_benchmark);
criterion_main!(benches);
