//! Benchmarks for map task fan-out.
//!
//! Commands go to a scripted dispatcher, so this measures scheduling and
//! event overhead rather than process spawning.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use ergo::testing::ScriptedDispatcher;
use ergo::{EventBus, FanOutRunner, Operator, Task, TaskRun};
use std::sync::Arc;
use tokio::runtime::Runtime;

fn map_task(size: usize) -> Task {
    Task::builder("bench", "process {item}")
        .operator(Operator::FanOut)
        .input((0..size).map(|i| i.to_string()))
        .reduce("collect {results}")
        .build()
}

fn bench_fan_out(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("fan_out");

    for size in [10, 100] {
        let task = map_task(size);
        for max_parallel in [1, 8] {
            let runner = FanOutRunner::new(
                Arc::new(ScriptedDispatcher::new()),
                Arc::new(EventBus::new()),
            )
            .with_max_parallel(max_parallel);

            group.bench_with_input(
                BenchmarkId::new(format!("parallel_{}", max_parallel), size),
                &task,
                |b, task| {
                    b.iter(|| {
                        rt.block_on(async {
                            let mut run = TaskRun::new(task);
                            runner.run(&mut run).await.unwrap()
                        })
                    });
                },
            );
        }
    }

    group.finish();
}

criterion_group!(benches, bench_fan_out);
criterion_main!(benches);
