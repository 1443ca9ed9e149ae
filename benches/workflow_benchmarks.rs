//! Performance benchmarks for the workflow executor
//! Measures orchestration overhead with zero-latency stages

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use futures::future::join_all;
use resilientflow::config::{StageSettings, WorkflowConfig};
use resilientflow::testing::{sample_event, ScriptedTable};
use resilientflow::workflow::{decide, run_workflow, EventEmitter, StageTable, WorkflowExecutor};
use std::hint::black_box;
use std::sync::Arc;
use tokio::runtime::Runtime;

fn bench_router(c: &mut Criterion) {
    c.bench_function("route_decision", |b| {
        b.iter(|| {
            for severity in 0..=100u8 {
                black_box(decide(black_box(severity), 60));
            }
        })
    });
}

fn bench_single_run(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let config = WorkflowConfig::default();
    let mut group = c.benchmark_group("single_run");

    for severity in [40u8, 85] {
        group.bench_with_input(
            BenchmarkId::new("reference_stages", severity),
            &severity,
            |b, &severity| {
                b.to_async(&rt).iter_batched(
                    || {
                        (
                            StageTable::reference(&StageSettings::default()),
                            Arc::new(EventEmitter::new()),
                        )
                    },
                    |(stages, emitter)| {
                        let config = config.clone();
                        async move {
                            let result =
                                run_workflow(&sample_event(severity), &config, stages, emitter)
                                    .await
                                    .unwrap();
                            black_box(result.summary())
                        }
                    },
                    BatchSize::SmallInput,
                )
            },
        );
    }

    group.bench_function("scripted_stages", |b| {
        b.to_async(&rt).iter_batched(
            || (ScriptedTable::new(85), Arc::new(EventEmitter::new())),
            |(scripted, emitter)| {
                let config = config.clone();
                async move {
                    let result = run_workflow(&sample_event(85), &config, scripted.table(), emitter)
                        .await
                        .unwrap();
                    black_box(result.status())
                }
            },
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

fn bench_concurrent_runs(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("concurrent_runs");

    for runs in [4usize, 16, 64] {
        group.bench_with_input(BenchmarkId::from_parameter(runs), &runs, |b, &runs| {
            b.to_async(&rt).iter_batched(
                || {
                    let emitter = Arc::new(EventEmitter::new());
                    Arc::new(
                        WorkflowExecutor::new(
                            WorkflowConfig::default(),
                            StageTable::reference(&StageSettings::default()),
                            emitter,
                        )
                        .unwrap(),
                    )
                },
                |executor| async move {
                    let event = sample_event(85);
                    let results = join_all((0..runs).map(|_| executor.run(&event))).await;
                    black_box(executor.emitter().len());
                    black_box(results)
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

criterion_group!(benches, bench_router, bench_single_run, bench_concurrent_runs);
criterion_main!(benches);
