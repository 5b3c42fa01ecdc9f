//! Integration tests for the process-isolated pool: real worker processes
//! spawned from the `echo-model` harness binary, including crash recovery.

use std::path::PathBuf;
use std::time::Duration;

use serde_json::json;

use inference_scheduler::config::{PoolIsolation, SchedulerConfig};
use inference_scheduler::core::{Scheduler, SchedulerError};
use inference_scheduler::demo::EchoModel;

fn process_config(pool_workers: usize) -> SchedulerConfig {
    SchedulerConfig {
        pool_workers,
        max_batch_size: 32,
        max_batch_wait: Duration::from_millis(20),
        isolation: PoolIsolation::Process,
        worker_exe: Some(PathBuf::from(env!("CARGO_BIN_EXE_echo-model"))),
        ..SchedulerConfig::default()
    }
}

async fn started(config: SchedulerConfig) -> Scheduler<EchoModel> {
    let scheduler = Scheduler::<EchoModel>::new(config).unwrap();
    scheduler.start().await.unwrap();
    scheduler
}

#[tokio::test(flavor = "multi_thread")]
async fn round_trips_through_a_worker_process() {
    let scheduler = started(process_config(1)).await;

    let items: Vec<_> = (0..6).map(|n| json!(format!("item-{n}"))).collect();
    let outputs = scheduler.submit_tasks("echo", items.clone()).await.unwrap();
    assert_eq!(outputs, items);

    let upper = scheduler.submit_task("upper", json!("hello")).await.unwrap();
    assert_eq!(upper, json!("HELLO"));

    scheduler.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn starts_without_warmup() {
    let mut config = process_config(1);
    config.warmup = false;
    let scheduler = started(config).await;

    let output = scheduler.submit_task("echo", json!(42)).await.unwrap();
    assert_eq!(output, json!(42));

    scheduler.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn domain_error_crosses_the_process_boundary() {
    let scheduler = started(process_config(1)).await;

    let err = scheduler.submit_task("flaky", json!("x")).await.unwrap_err();
    match err {
        SchedulerError::Model(model) => {
            assert_eq!(model.message, "synthetic failure");
            assert_eq!(model.http_status, 503);
        }
        other => panic!("expected model error, got {other:?}"),
    }

    // The worker survived the handler error.
    let output = scheduler.submit_task("echo", json!("still up")).await.unwrap();
    assert_eq!(output, json!("still up"));

    scheduler.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn worker_crash_fails_the_batch_and_the_pool_recovers() {
    let scheduler = started(process_config(1)).await;

    // One batch: a poison item takes the whole worker process down, so every
    // item of the batch fails with the crash kind.
    let err = scheduler
        .submit_tasks("unstable", vec![json!("ok"), json!("poison"), json!("ok2")])
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::WorkerCrash), "got {err:?}");
    assert_eq!(err.http_status(), 500);

    // The pool replaced the dead worker; the same task works again.
    let outputs = scheduler
        .submit_tasks("unstable", vec![json!("ok")])
        .await
        .unwrap();
    assert_eq!(outputs, vec![json!("ok")]);

    scheduler.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn multiple_workers_serve_concurrent_batches() {
    let scheduler = started(process_config(2)).await;
    let scheduler = std::sync::Arc::new(scheduler);

    let submissions: Vec<_> = (0..4)
        .map(|round| {
            let scheduler = std::sync::Arc::clone(&scheduler);
            tokio::spawn(async move {
                let items: Vec<_> = (0..8).map(|n| json!(format!("r{round}-{n}"))).collect();
                let outputs = scheduler.submit_tasks("echo", items.clone()).await?;
                assert_eq!(outputs, items);
                Ok::<_, SchedulerError>(())
            })
        })
        .collect();
    for submission in submissions {
        submission.await.unwrap().unwrap();
    }

    scheduler.stop().await;
}
