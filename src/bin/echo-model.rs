//! Worker harness and demo host for the [`EchoModel`].
//!
//! Spawned with `INFERENCE_WORKER=1` by the process pool, this binary serves
//! batches for the demo model; run directly, it starts a scheduler pointed at
//! itself and pushes a few items through it.

use inference_scheduler::config::SchedulerConfig;
use inference_scheduler::core::worker_pool::child;
use inference_scheduler::core::{AppResult, Scheduler};
use inference_scheduler::demo::EchoModel;
use inference_scheduler::util::telemetry;

fn main() -> AppResult<()> {
    if child::is_worker_process() {
        telemetry::init_worker_tracing();
        return child::run_worker::<EchoModel>();
    }

    telemetry::init_tracing();
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(demo())
}

async fn demo() -> AppResult<()> {
    let config = SchedulerConfig::from_env()?;
    let scheduler = Scheduler::<EchoModel>::new(config)?;
    scheduler.start().await?;

    let items: Vec<_> = (0..5).map(|n| serde_json::json!(format!("item-{n}"))).collect();
    let outputs = scheduler.submit_tasks("echo", items.clone()).await?;
    assert_eq!(outputs, items);
    println!("echoed {} items: {outputs:?}", outputs.len());

    let upper = scheduler
        .submit_task("upper", serde_json::json!("hello"))
        .await?;
    println!("upper(\"hello\") = {upper}");

    let sizes = scheduler.queue_sizes();
    println!(
        "batch_queue={} recent_avg_batch_size={:.1}",
        sizes.batch_queue, sizes.recent_avg_batch_size
    );

    scheduler.stop().await;
    Ok(())
}
