//! Core scheduling abstractions: task registry, per-task batching, dispatch,
//! the isolated worker pool, and the submission API.

/// Error taxonomy for scheduler operations.
pub mod error;
/// Model contract: factory, task declaration, warm-up.
pub mod model;
/// Catalogue of task handlers for one model type.
pub mod registry;
/// The caller-facing scheduler.
pub mod scheduler;
/// Isolated workers executing batches.
pub mod worker_pool;

mod batcher;
mod dispatch;

pub use error::{AppResult, ModelError, SchedulerError, TaskError, TaskErrorKind};
pub use model::{InferenceModel, ModelContext, Payload, DEFAULT_TIMING_BUCKETS};
pub use registry::{TaskHandler, TaskKey, TaskRegistry};
pub use scheduler::{QueueSizes, Scheduler};
pub use worker_pool::{TaskResult, WorkerBackend};
