//! The scheduler: caller-facing submission API, lifecycle, and the wiring of
//! batchers, dispatch workers, and the worker pool.

use std::collections::{BTreeMap, VecDeque};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::{PoolIsolation, SchedulerConfig};
use crate::core::batcher::{Batcher, TaskBatch, TaskItem};
use crate::core::dispatch::DispatchWorker;
use crate::core::error::SchedulerError;
use crate::core::model::{InferenceModel, Payload};
use crate::core::registry::TaskRegistry;
use crate::core::worker_pool::process::ProcessPool;
use crate::core::worker_pool::thread::ThreadPool;
use crate::core::worker_pool::WorkerBackend;
use crate::metrics::{InstrumentationSpec, Metrics};

/// Queue depth snapshot for the front-end's introspection endpoint.
#[derive(Debug, Clone)]
pub struct QueueSizes {
    /// Emitted batches awaiting a free worker.
    pub batch_queue: usize,
    /// Items buffered per task, not yet batched.
    pub per_task: BTreeMap<String, usize>,
    /// Mean size of the most recently dispatched batches.
    pub recent_avg_batch_size: f64,
}

/// Batching inference scheduler for one model type.
///
/// Turns concurrent single-item submissions into bounded batches executed on
/// a pool of isolated workers, and demultiplexes results back to the
/// submitters in input order.
impl<M: InferenceModel> std::fmt::Debug for Scheduler<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler").finish_non_exhaustive()
    }
}

pub struct Scheduler<M: InferenceModel> {
    config: SchedulerConfig,
    metrics: Arc<Metrics>,
    backend: Arc<dyn WorkerBackend>,
    queues: BTreeMap<String, flume::Sender<TaskItem>>,
    queue_receivers: BTreeMap<String, flume::Receiver<TaskItem>>,
    pending_batchers: Mutex<Vec<(String, flume::Receiver<TaskItem>)>>,
    dispatch_tx: flume::Sender<TaskBatch>,
    dispatch_rx: flume::Receiver<TaskBatch>,
    recent_batch_sizes: Arc<Mutex<VecDeque<usize>>>,
    loops: Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
    _model: PhantomData<fn() -> M>,
}

impl<M: InferenceModel> Scheduler<M> {
    /// Build a scheduler from configuration.
    ///
    /// Declares the model's tasks into a fresh registry, creates one queue
    /// per task, and constructs the configured pool backend. Workers are not
    /// spawned until [`Scheduler::start`].
    ///
    /// # Errors
    ///
    /// - [`SchedulerError::InvalidConfig`] for invalid settings or a model
    ///   declaring no tasks
    /// - [`SchedulerError::DuplicateTask`] from colliding task declarations
    /// - [`SchedulerError::Metrics`] when instrument registration fails
    pub fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        config.validate()?;
        let registry = TaskRegistry::<M>::for_model()?;
        if registry.is_empty() {
            return Err(SchedulerError::InvalidConfig(format!(
                "model `{}` declares no tasks",
                M::MODEL_NAME
            )));
        }

        let metrics = Arc::new(Metrics::new(M::timing_buckets())?);
        let mut queues = BTreeMap::new();
        let mut queue_receivers = BTreeMap::new();
        let mut pending_batchers = Vec::new();
        for task_name in registry.task_names() {
            let (queue_tx, queue_rx) = flume::unbounded();
            queues.insert(task_name.to_string(), queue_tx);
            queue_receivers.insert(task_name.to_string(), queue_rx.clone());
            pending_batchers.push((task_name.to_string(), queue_rx));
            metrics
                .task_queue_size
                .with_label_values(&[task_name])
                .set(0);
        }

        let backend: Arc<dyn WorkerBackend> = match config.isolation {
            PoolIsolation::Process => Arc::new(ProcessPool::new(&config)?),
            PoolIsolation::Thread => Arc::new(ThreadPool::<M>::new(&config)),
        };

        let (dispatch_tx, dispatch_rx) = flume::unbounded();
        info!(
            model = M::MODEL_NAME,
            tasks = ?registry.task_names(),
            pool_workers = config.pool_workers,
            "scheduler built"
        );
        Ok(Self {
            config,
            metrics,
            backend,
            queues,
            queue_receivers,
            pending_batchers: Mutex::new(pending_batchers),
            dispatch_tx,
            dispatch_rx,
            recent_batch_sizes: Arc::new(Mutex::new(VecDeque::new())),
            loops: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
            _model: PhantomData,
        })
    }

    /// Spawn the worker pool, one batcher per task, and the dispatch workers.
    ///
    /// With warm-up enabled, returns only after every worker has materialized
    /// its model and completed a no-op round-trip, so the first real batch
    /// does not pay initialization latency. Idempotent.
    ///
    /// # Errors
    ///
    /// Propagates worker startup failures (bad worker executable, model
    /// construction errors).
    pub async fn start(&self) -> Result<(), SchedulerError> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Err(err) = self.backend.start().await {
            // Tear down any workers that did come up.
            self.backend.shutdown().await;
            self.running.store(false, Ordering::Release);
            return Err(err);
        }

        let mut loops = self.loops.lock();
        for (task_name, queue_rx) in self.pending_batchers.lock().drain(..) {
            let batcher = Batcher {
                task_name,
                queue: queue_rx,
                dispatch_tx: self.dispatch_tx.clone(),
                metrics: Arc::clone(&self.metrics),
                max_batch_size: self.config.max_batch_size,
                max_batch_wait: self.config.max_batch_wait,
                fill_queue_threshold: self.config.fill_queue_threshold,
            };
            loops.push(tokio::spawn(batcher.run()));
        }
        for worker_id in 0..self.config.pool_workers {
            let dispatcher = DispatchWorker {
                worker_id,
                dispatch_rx: self.dispatch_rx.clone(),
                backend: Arc::clone(&self.backend),
                metrics: Arc::clone(&self.metrics),
                recent_batch_sizes: Arc::clone(&self.recent_batch_sizes),
            };
            loops.push(tokio::spawn(dispatcher.run()));
        }
        info!(model = M::MODEL_NAME, "scheduler started");
        Ok(())
    }

    /// Stop batching and dispatch, then shut the worker pool down.
    ///
    /// Queued work is discarded, not executed: submitters still awaiting
    /// completions observe [`SchedulerError::Cancelled`]. Idempotent.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        let handles: Vec<_> = self.loops.lock().drain(..).collect();
        for handle in &handles {
            handle.abort();
        }
        for handle in handles {
            let _ = handle.await;
        }
        // Anything still queued resolves as cancelled when dropped here.
        for receiver in self.queue_receivers.values() {
            while receiver.try_recv().is_ok() {}
        }
        while self.dispatch_rx.try_recv().is_ok() {}
        self.backend.shutdown().await;
        info!(model = M::MODEL_NAME, "scheduler stopped");
    }

    /// Submit a list of items to a task and await their outputs.
    ///
    /// Outputs correspond positionally to inputs. Items of one submission
    /// enter the task queue in order and stay in order through batching and
    /// execution. The task name is always resolved first; an empty input
    /// then returns an empty output without touching the queues.
    ///
    /// # Errors
    ///
    /// - [`SchedulerError::UnknownTask`] before anything is enqueued
    /// - [`SchedulerError::NotRunning`] when called before `start()`/after
    ///   `stop()`
    /// - the first per-item error encountered, in input order; items of one
    ///   failed batch all carry the same error
    /// - [`SchedulerError::Cancelled`] when the scheduler stopped before the
    ///   items were executed
    pub async fn submit_tasks(
        &self,
        task_name: &str,
        items: Vec<Payload>,
    ) -> Result<Vec<Payload>, SchedulerError> {
        let queue = self
            .queues
            .get(task_name)
            .ok_or_else(|| SchedulerError::UnknownTask(task_name.to_string()))?;
        if items.is_empty() {
            return Ok(Vec::new());
        }
        if !self.running.load(Ordering::Acquire) {
            return Err(SchedulerError::NotRunning);
        }

        let mut completions = Vec::with_capacity(items.len());
        for data in items {
            let (completion, handle) = oneshot::channel();
            queue
                .send(TaskItem { data, completion })
                .map_err(|_| SchedulerError::NotRunning)?;
            completions.push(handle);
        }

        let mut outputs = Vec::with_capacity(completions.len());
        for handle in completions {
            match handle.await {
                Ok(Ok(output)) => outputs.push(output),
                Ok(Err(err)) => return Err(err),
                Err(_) => return Err(SchedulerError::Cancelled),
            }
        }
        Ok(outputs)
    }

    /// Submit a single item and await its output.
    ///
    /// # Errors
    ///
    /// As [`Scheduler::submit_tasks`].
    pub async fn submit_task(
        &self,
        task_name: &str,
        item: Payload,
    ) -> Result<Payload, SchedulerError> {
        let mut outputs = self.submit_tasks(task_name, vec![item]).await?;
        outputs
            .pop()
            .ok_or_else(|| SchedulerError::Unknown("empty result for single submission".into()))
    }

    /// Current queue depths and the rolling mean batch size.
    #[must_use]
    pub fn queue_sizes(&self) -> QueueSizes {
        let recent = self.recent_batch_sizes.lock();
        let recent_avg_batch_size = if recent.is_empty() {
            0.0
        } else {
            recent.iter().sum::<usize>() as f64 / recent.len() as f64
        };
        QueueSizes {
            batch_queue: self.dispatch_rx.len(),
            per_task: self
                .queues
                .iter()
                .map(|(name, queue)| (name.clone(), queue.len()))
                .collect(),
            recent_avg_batch_size,
        }
    }

    /// Declared instruments for the front-end's metrics endpoint.
    #[must_use]
    pub fn instrumentations(&self) -> Vec<InstrumentationSpec> {
        self.metrics.instrumentations()
    }

    /// The registry holding this scheduler's instruments, for `gather()`.
    #[must_use]
    pub fn metrics_registry(&self) -> &prometheus::Registry {
        self.metrics.registry()
    }
}
