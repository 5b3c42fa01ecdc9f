//! Dispatch workers: drain the shared batch queue into the worker pool and
//! fan results back to per-item completion handles.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::core::batcher::{TaskBatch, TaskItem};
use crate::core::error::{SchedulerError, TaskError};
use crate::core::model::Payload;
use crate::core::worker_pool::WorkerBackend;
use crate::metrics::Metrics;

/// Batches observed for the rolling average reported by `queue_sizes()`.
pub(crate) const RECENT_BATCH_WINDOW: usize = 10;

/// One of `pool_workers` cooperative tasks pumping batches into the pool.
pub(crate) struct DispatchWorker {
    pub(crate) worker_id: usize,
    pub(crate) dispatch_rx: flume::Receiver<TaskBatch>,
    pub(crate) backend: Arc<dyn WorkerBackend>,
    pub(crate) metrics: Arc<Metrics>,
    pub(crate) recent_batch_sizes: Arc<Mutex<VecDeque<usize>>>,
}

impl DispatchWorker {
    /// Pop/submit/fan-out loop. Exits when the dispatch queue closes.
    pub(crate) async fn run(self) {
        while let Ok(batch) = self.dispatch_rx.recv_async().await {
            let batch_size = batch.items.len();
            self.metrics.batch_queue_size.set(self.dispatch_rx.len() as i64);
            self.metrics.batch_sizes.observe(batch_size as f64);
            {
                let mut recent = self.recent_batch_sizes.lock();
                if recent.len() == RECENT_BATCH_WINDOW {
                    recent.pop_front();
                }
                recent.push_back(batch_size);
            }

            let TaskBatch { task_name, items } = batch;
            let (data, handles): (Vec<_>, Vec<_>) = items
                .into_iter()
                .map(|TaskItem { data, completion }| (data, completion))
                .unzip();

            match self.backend.submit(&task_name, data).await {
                Ok(result) => {
                    let latency_ms = result.latency_ms;
                    match result.outcome {
                        Ok(outputs) if outputs.len() == handles.len() => {
                            info!(
                                batch_size,
                                latency_ms,
                                task = %task_name,
                                "batch completed"
                            );
                            for (handle, output) in handles.into_iter().zip(outputs) {
                                let _ = handle.send(Ok(output));
                            }
                            self.metrics
                                .task_inference_time
                                .with_label_values(&[&task_name])
                                .observe(latency_ms as f64 / 1000.0);
                        }
                        Ok(outputs) => {
                            // Handler contract violation; fail the batch but
                            // keep the scheduler alive.
                            error!(
                                batch_size,
                                outputs = outputs.len(),
                                task = %task_name,
                                "handler returned wrong output count"
                            );
                            let err = TaskError::unknown(format!(
                                "handler returned {} outputs for {batch_size} inputs",
                                outputs.len()
                            ));
                            fail_batch(handles, &err);
                        }
                        Err(err) => {
                            warn!(
                                batch_size,
                                latency_ms,
                                task = %task_name,
                                kind = ?err.kind,
                                error = %err.message,
                                "batch failed"
                            );
                            fail_batch(handles, &err);
                        }
                    }
                }
                Err(err) => {
                    warn!(batch_size, task = %task_name, error = %err, "pool rejected batch");
                    let err = match err {
                        SchedulerError::WorkerCrash => TaskError::worker_crash(),
                        other => TaskError::unknown(other.to_string()),
                    };
                    fail_batch(handles, &err);
                }
            }
        }
        debug!(worker_id = self.worker_id, "dispatch worker exiting");
    }
}

/// A batch fails atomically: every handle gets an error of equal kind and
/// message.
fn fail_batch(handles: Vec<oneshot::Sender<Result<Payload, SchedulerError>>>, err: &TaskError) {
    for handle in handles {
        let _ = handle.send(Err(SchedulerError::from(err.clone())));
    }
}
