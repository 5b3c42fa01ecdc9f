//! In-process pool backend with dedicated worker threads.
//!
//! Each worker thread materializes its own model instance and serves jobs
//! from the shared rendezvous channel. No process boundary: only safe for
//! models whose runtime is reentrant (spec'd as the explicit opt-in via
//! `PoolIsolation::Thread`). Handler panics are caught and surface as
//! unknown errors; there is no crash/respawn path in-process.

use std::marker::PhantomData;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::core::error::SchedulerError;
use crate::core::model::{InferenceModel, ModelContext, Payload};
use crate::core::registry::TaskRegistry;
use crate::core::worker_pool::{
    execute_batch, submit_job, BatchJob, TaskResult, WorkerBackend,
};

/// Fixed pool of worker threads, each owning one model instance.
pub struct ThreadPool<M> {
    ctx: ModelContext,
    pool_workers: usize,
    warmup: bool,
    jobs: Mutex<Option<Sender<BatchJob>>>,
    job_rx: Receiver<BatchJob>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    _model: PhantomData<fn() -> M>,
}

impl<M: InferenceModel> ThreadPool<M> {
    /// Build the pool from configuration. Workers are spawned by `start()`.
    #[must_use]
    pub fn new(config: &SchedulerConfig) -> Self {
        let (jobs_tx, job_rx) = bounded(0);
        Self {
            ctx: ModelContext::from_config(config),
            pool_workers: config.pool_workers,
            warmup: config.warmup,
            jobs: Mutex::new(Some(jobs_tx)),
            job_rx,
            workers: Mutex::new(Vec::new()),
            _model: PhantomData,
        }
    }
}

#[async_trait::async_trait]
impl<M: InferenceModel> WorkerBackend for ThreadPool<M> {
    async fn start(&self) -> Result<(), SchedulerError> {
        let mut ready = Vec::with_capacity(self.pool_workers);
        {
            let mut workers = self.workers.lock();
            for worker_id in 0..self.pool_workers {
                let (ready_tx, ready_rx) = oneshot::channel();
                let ctx = self.ctx.clone();
                let warmup = self.warmup;
                let jobs = self.job_rx.clone();
                let handle = thread::Builder::new()
                    .name(format!("inference-worker-{worker_id}"))
                    .spawn(move || worker_loop::<M>(worker_id, &ctx, warmup, &jobs, ready_tx))
                    .map_err(|err| {
                        SchedulerError::InvalidConfig(format!(
                            "failed to spawn worker thread: {err}"
                        ))
                    })?;
                workers.push(handle);
                ready.push(ready_rx);
            }
        }
        for ready_rx in ready {
            match ready_rx.await {
                Ok(Ok(())) => {}
                Ok(Err(message)) => return Err(SchedulerError::InvalidConfig(message)),
                Err(_) => {
                    return Err(SchedulerError::InvalidConfig(
                        "worker thread exited before reporting readiness".into(),
                    ))
                }
            }
        }
        info!(
            pool_workers = self.pool_workers,
            model = M::MODEL_NAME,
            "thread pool started"
        );
        Ok(())
    }

    async fn submit(
        &self,
        task_name: &str,
        items: Vec<Payload>,
    ) -> Result<TaskResult, SchedulerError> {
        let jobs = self.jobs.lock().clone();
        submit_job(jobs, task_name, items).await
    }

    async fn shutdown(&self) {
        drop(self.jobs.lock().take());
        let handles: Vec<_> = self.workers.lock().drain(..).collect();
        let joined = tokio::task::spawn_blocking(move || {
            for handle in handles {
                let _ = handle.join();
            }
        })
        .await;
        if joined.is_err() {
            warn!("worker threads did not join cleanly");
        }
        info!("thread pool shut down");
    }
}

fn worker_loop<M: InferenceModel>(
    worker_id: usize,
    ctx: &ModelContext,
    warmup: bool,
    jobs: &Receiver<BatchJob>,
    ready_tx: oneshot::Sender<Result<(), String>>,
) {
    let registry = match TaskRegistry::<M>::for_model() {
        Ok(registry) => registry,
        Err(err) => {
            let _ = ready_tx.send(Err(format!("worker {worker_id}: {err}")));
            return;
        }
    };
    let mut model = match M::create(ctx) {
        Ok(model) => model,
        Err(err) => {
            let _ = ready_tx.send(Err(format!(
                "worker {worker_id} failed to materialize model: {err}"
            )));
            return;
        }
    };
    if warmup {
        model.prepare();
    }
    let _ = ready_tx.send(Ok(()));
    debug!(worker_id, model = M::MODEL_NAME, "worker thread ready");

    while let Ok(job) = jobs.recv() {
        let BatchJob {
            task_name,
            items,
            reply,
        } = job;
        let result = execute_batch(&registry, &model, &task_name, items);
        let _ = reply.send(result);
    }

    debug!(worker_id, "worker thread exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolIsolation;
    use crate::core::error::{ModelError, TaskErrorKind};

    struct Doubler;

    fn double(_: &Doubler, items: Vec<Payload>) -> Result<Vec<Payload>, ModelError> {
        items
            .into_iter()
            .map(|item| {
                item.as_i64()
                    .map(|n| serde_json::json!(n * 2))
                    .ok_or_else(|| ModelError::new("expected integer"))
            })
            .collect()
    }

    impl InferenceModel for Doubler {
        const MODEL_NAME: &'static str = "doubler";

        fn create(_ctx: &ModelContext) -> Result<Self, ModelError> {
            Ok(Self)
        }

        fn tasks(registry: &mut TaskRegistry<Self>) -> Result<(), SchedulerError> {
            registry.register("double", double)
        }
    }

    fn config(workers: usize) -> SchedulerConfig {
        SchedulerConfig {
            pool_workers: workers,
            isolation: PoolIsolation::Thread,
            ..SchedulerConfig::default()
        }
    }

    #[tokio::test]
    async fn executes_batches_on_worker_threads() {
        let pool = ThreadPool::<Doubler>::new(&config(2));
        pool.start().await.unwrap();

        let result = pool
            .submit("double", vec![serde_json::json!(2), serde_json::json!(3)])
            .await
            .unwrap();
        assert_eq!(
            result.outcome.unwrap(),
            vec![serde_json::json!(4), serde_json::json!(6)]
        );

        pool.shutdown().await;
    }

    #[tokio::test]
    async fn model_error_travels_back() {
        let pool = ThreadPool::<Doubler>::new(&config(1));
        pool.start().await.unwrap();

        let result = pool
            .submit("double", vec![serde_json::json!("nan")])
            .await
            .unwrap();
        assert_eq!(result.outcome.unwrap_err().kind, TaskErrorKind::Model);

        pool.shutdown().await;
    }

    #[tokio::test]
    async fn submit_after_shutdown_is_rejected() {
        let pool = ThreadPool::<Doubler>::new(&config(1));
        pool.start().await.unwrap();
        pool.shutdown().await;

        let err = pool
            .submit("double", vec![serde_json::json!(1)])
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::NotRunning));
    }
}
