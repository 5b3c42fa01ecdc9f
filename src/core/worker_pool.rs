//! Worker pool: isolated workers that each hold one materialized model and
//! serve batch execution requests.
//!
//! Two backends implement the [`WorkerBackend`] seam:
//!
//! - [`process::ProcessPool`] spawns one OS process per worker so native
//!   model libraries, GPU contexts, and allocators are never shared and a
//!   crashing worker cannot corrupt the scheduler. This is the default.
//! - [`thread::ThreadPool`] runs workers on dedicated OS threads inside the
//!   scheduler process. Only safe for models whose runtime is reentrant.
//!
//! Batches reach the pool through a rendezvous channel: a submission blocks
//! until a worker is free, which is the pool's natural backpressure.

/// Worker-process entry point and guard.
pub mod child;
/// Process-isolated backend, the default.
pub mod process;
/// Parent/worker wire protocol.
pub mod protocol;
/// In-process backend for reentrant models.
pub mod thread;

use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::core::error::{SchedulerError, TaskError};
use crate::core::model::{InferenceModel, Payload};
use crate::core::registry::TaskRegistry;

/// Outcome of one batch execution, produced by a worker and consumed by a
/// dispatch worker. Crosses the process boundary, hence serializable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    /// Wall-clock handler latency in milliseconds.
    pub latency_ms: u64,
    /// Equal-length outputs in input order, or the batch-level failure.
    pub outcome: Result<Vec<Payload>, TaskError>,
}

/// A batch job travelling from a dispatch worker to a pool worker.
pub(crate) struct BatchJob {
    pub task_name: String,
    pub items: Vec<Payload>,
    pub reply: oneshot::Sender<TaskResult>,
}

/// The seam between the scheduler and its isolated workers.
#[async_trait::async_trait]
pub trait WorkerBackend: Send + Sync {
    /// Spawn the workers. When warm-up is configured, returns only after
    /// every worker has finished model construction and its no-op prepare
    /// round-trip.
    async fn start(&self) -> Result<(), SchedulerError>;

    /// Execute one batch on one free worker, blocking (asynchronously) until
    /// a worker picks the job up. At most one batch runs per worker.
    async fn submit(&self, task_name: &str, items: Vec<Payload>)
        -> Result<TaskResult, SchedulerError>;

    /// Request orderly worker termination and join them.
    async fn shutdown(&self);
}

/// Run one batch against a model, mapping handler failures to the wire error
/// taxonomy. Shared by the worker-process loop and the thread backend.
pub(crate) fn execute_batch<M: InferenceModel>(
    registry: &TaskRegistry<M>,
    model: &M,
    task_name: &str,
    items: Vec<Payload>,
) -> TaskResult {
    let started = Instant::now();
    let outcome = match registry.lookup(task_name) {
        None => {
            tracing::error!(task = task_name, "no handler registered");
            Err(TaskError::unknown(format!(
                "no handler registered for task `{task_name}`"
            )))
        }
        Some(handler) => match panic::catch_unwind(AssertUnwindSafe(|| handler(model, items))) {
            Ok(Ok(outputs)) => Ok(outputs),
            Ok(Err(err)) => {
                tracing::error!(task = task_name, error = %err.message, "model error");
                Err(TaskError::model(err))
            }
            Err(payload) => {
                let message = format!("panic: {}", panic_message(payload.as_ref()));
                tracing::error!(task = task_name, error = %message, "handler panicked");
                Err(TaskError::unknown(message))
            }
        },
    };
    TaskResult {
        latency_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        outcome,
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// Hand a job to a free worker and await its result.
///
/// The crossbeam send happens on the blocking pool because the rendezvous
/// channel parks the sender until a worker receives.
pub(crate) async fn submit_job(
    jobs: Option<crossbeam_channel::Sender<BatchJob>>,
    task_name: &str,
    items: Vec<Payload>,
) -> Result<TaskResult, SchedulerError> {
    let Some(jobs) = jobs else {
        return Err(SchedulerError::NotRunning);
    };
    let (reply_tx, reply_rx) = oneshot::channel();
    let job = BatchJob {
        task_name: task_name.to_string(),
        items,
        reply: reply_tx,
    };
    tokio::task::spawn_blocking(move || jobs.send(job))
        .await
        .map_err(|err| SchedulerError::Unknown(format!("pool submission aborted: {err}")))?
        .map_err(|_| SchedulerError::NotRunning)?;
    reply_rx.await.map_err(|_| SchedulerError::WorkerCrash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::{ModelError, TaskErrorKind};
    use crate::core::model::ModelContext;

    struct Flaky;

    fn ok(_: &Flaky, items: Vec<Payload>) -> Result<Vec<Payload>, ModelError> {
        Ok(items)
    }

    fn hiccup(_: &Flaky, _items: Vec<Payload>) -> Result<Vec<Payload>, ModelError> {
        Err(ModelError::with_status("hiccup", 503))
    }

    fn blows_up(_: &Flaky, _items: Vec<Payload>) -> Result<Vec<Payload>, ModelError> {
        panic!("boom");
    }

    impl InferenceModel for Flaky {
        const MODEL_NAME: &'static str = "flaky";

        fn create(_ctx: &ModelContext) -> Result<Self, ModelError> {
            Ok(Self)
        }

        fn tasks(registry: &mut TaskRegistry<Self>) -> Result<(), SchedulerError> {
            registry.register("ok", ok)?;
            registry.register("hiccup", hiccup)?;
            registry.register("blows_up", blows_up)?;
            Ok(())
        }
    }

    #[test]
    fn success_preserves_items() {
        let registry = TaskRegistry::<Flaky>::for_model().unwrap();
        let items = vec![serde_json::json!(1), serde_json::json!(2)];
        let result = execute_batch(&registry, &Flaky, "ok", items.clone());
        assert_eq!(result.outcome.unwrap(), items);
    }

    #[test]
    fn model_error_keeps_message_and_status() {
        let registry = TaskRegistry::<Flaky>::for_model().unwrap();
        let result = execute_batch(&registry, &Flaky, "hiccup", vec![serde_json::json!("x")]);
        let err = result.outcome.unwrap_err();
        assert_eq!(err.kind, TaskErrorKind::Model);
        assert_eq!(err.message, "hiccup");
        assert_eq!(err.http_status, 503);
    }

    #[test]
    fn panic_is_caught_as_unknown() {
        let registry = TaskRegistry::<Flaky>::for_model().unwrap();
        let result = execute_batch(&registry, &Flaky, "blows_up", vec![serde_json::json!("x")]);
        let err = result.outcome.unwrap_err();
        assert_eq!(err.kind, TaskErrorKind::Unknown);
        assert!(err.message.contains("boom"), "message was {}", err.message);
    }

    #[test]
    fn missing_handler_is_unknown() {
        let registry = TaskRegistry::<Flaky>::for_model().unwrap();
        let result = execute_batch(&registry, &Flaky, "absent", vec![]);
        let err = result.outcome.unwrap_err();
        assert_eq!(err.kind, TaskErrorKind::Unknown);
    }
}
