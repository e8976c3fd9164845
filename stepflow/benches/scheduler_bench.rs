//! Benchmarks for plan validation and per-round eligibility checks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::collections::HashMap;
use stepflow::core::{StepOutcome, StepRunResult};
use stepflow::pipeline::{dependencies_complete, skip_decision};
use stepflow::plan::{CommandSpec, Plan, Step, WhenStatus};

/// A layered plan: each step depends on up to three steps of the previous layer.
fn layered_steps(layers: usize, width: usize) -> Vec<Step> {
    let mut steps = Vec::with_capacity(layers * width);
    for layer in 0..layers {
        for i in 0..width {
            let mut step = Step::command(format!("s{layer}-{i}"), CommandSpec::new("true"));
            if layer > 0 {
                let deps: Vec<String> = (0..3)
                    .map(|k| format!("s{}-{}", layer - 1, (i + k) % width))
                    .collect();
                step = step.depends_on(deps);
            }
            if i % 7 == 0 && layer > 0 {
                step = step.when(format!("s{}-{i}", layer - 1), WhenStatus::Success);
            }
            steps.push(step);
        }
    }
    steps
}

fn bench_validation(c: &mut Criterion) {
    let mut group = c.benchmark_group("plan_from_steps");
    for layers in [10, 50] {
        let steps = layered_steps(layers, 20);
        group.bench_with_input(BenchmarkId::from_parameter(layers * 20), &steps, |b, steps| {
            b.iter(|| Plan::from_steps(black_box(steps.clone())));
        });
    }
    group.finish();
}

fn bench_eligibility(c: &mut Criterion) {
    let steps = layered_steps(50, 20);
    let finished: HashMap<String, StepOutcome> = steps
        .iter()
        .take(steps.len() / 2)
        .map(|s| {
            let result = StepRunResult {
                name: s.id.clone(),
                ..Default::default()
            };
            (s.id.clone(), StepOutcome::completed(s.id.clone(), result))
        })
        .collect();

    c.bench_function("round_eligibility_1000_steps", |b| {
        b.iter(|| {
            let mut runnable = 0usize;
            for step in &steps {
                if finished.contains_key(&step.id) || !dependencies_complete(step, &finished) {
                    continue;
                }
                black_box(skip_decision(step, &finished));
                runnable += 1;
            }
            runnable
        });
    });
}

criterion_group!(benches, bench_validation, bench_eligibility);
criterion_main!(benches);
