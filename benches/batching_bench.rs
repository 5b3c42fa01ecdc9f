//! Throughput benchmarks for the batching pipeline.
//!
//! Measures end-to-end submission latency through queues, batcher, dispatch,
//! and the thread-backed worker pool with an identity model.

use std::sync::Arc;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;
use tokio::runtime::Runtime;

use inference_scheduler::config::{PoolIsolation, SchedulerConfig};
use inference_scheduler::core::{
    InferenceModel, ModelContext, ModelError, Payload, Scheduler, SchedulerError, TaskRegistry,
};

struct BenchModel;

fn identity(_: &BenchModel, items: Vec<Payload>) -> Result<Vec<Payload>, ModelError> {
    Ok(items)
}

impl InferenceModel for BenchModel {
    const MODEL_NAME: &'static str = "bench_model";

    fn create(_ctx: &ModelContext) -> Result<Self, ModelError> {
        Ok(Self)
    }

    fn tasks(registry: &mut TaskRegistry<Self>) -> Result<(), SchedulerError> {
        registry.register("identity", identity)
    }
}

fn bench_scheduler(runtime: &Runtime) -> Arc<Scheduler<BenchModel>> {
    let config = SchedulerConfig {
        pool_workers: 2,
        max_batch_size: 32,
        max_batch_wait: Duration::from_millis(1),
        isolation: PoolIsolation::Thread,
        ..SchedulerConfig::default()
    };
    let scheduler = Scheduler::<BenchModel>::new(config).unwrap();
    runtime.block_on(scheduler.start()).unwrap();
    Arc::new(scheduler)
}

fn submit_throughput(c: &mut Criterion) {
    let runtime = Runtime::new().unwrap();
    let scheduler = bench_scheduler(&runtime);

    let mut group = c.benchmark_group("submit_tasks");
    for batch in [1usize, 8, 32, 64] {
        let items: Vec<_> = (0..batch).map(|n| json!(n)).collect();
        group.throughput(Throughput::Elements(batch as u64));
        group.bench_with_input(BenchmarkId::from_parameter(batch), &items, |b, items| {
            b.to_async(&runtime).iter(|| {
                let scheduler = Arc::clone(&scheduler);
                let items = items.clone();
                async move { scheduler.submit_tasks("identity", items).await.unwrap() }
            });
        });
    }
    group.finish();
}

criterion_group!(benches, submit_throughput);
criterion_main!(benches);
