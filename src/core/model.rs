//! Model contract: the factory, task declaration, and warm-up hooks a model
//! implements to be served by the scheduler.

use std::path::PathBuf;

use crate::config::SchedulerConfig;
use crate::core::error::{ModelError, SchedulerError};
use crate::core::registry::TaskRegistry;

/// Opaque item payload carried through queues and across the worker process
/// boundary. The scheduler never introspects payloads; handlers perform their
/// own decode/encode.
pub type Payload = serde_json::Value;

/// Default latency histogram buckets in seconds, used when a model does not
/// supply its own.
pub const DEFAULT_TIMING_BUCKETS: [f64; 11] = [
    0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 90.0, 120.0, 200.0,
];

/// Ambient settings handed to the model factory.
///
/// Models read their environment from here instead of consulting global
/// configuration, so a worker process and an in-process worker construct
/// models identically.
#[derive(Debug, Clone)]
pub struct ModelContext {
    /// Whether the model should place itself on an accelerator.
    pub use_gpu: bool,
    /// Directory for downloaded model weights.
    pub model_cache: PathBuf,
}

impl ModelContext {
    /// Extract the model-facing settings from a scheduler configuration.
    #[must_use]
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self {
            use_gpu: config.use_gpu,
            model_cache: config.model_cache.clone(),
        }
    }
}

/// An inference model servable by the scheduler.
///
/// One instance is materialized per worker by [`InferenceModel::create`] (the
/// model factory) and held for the worker's lifetime. Task handlers are
/// declared once in [`InferenceModel::tasks`]; after the scheduler starts the
/// registry is read-only.
pub trait InferenceModel: Sized + 'static {
    /// Model name, the first half of every task key.
    const MODEL_NAME: &'static str;

    /// Materialize the model. Invoked once per worker, in the worker's own
    /// process for the process backend.
    ///
    /// # Errors
    ///
    /// Returns a [`ModelError`] when the model cannot be constructed (missing
    /// weights, no device, ...). The worker fails to start and the scheduler
    /// surfaces the failure from `start()`.
    fn create(ctx: &ModelContext) -> Result<Self, ModelError>;

    /// Declare the model's task handlers into `registry`.
    ///
    /// # Errors
    ///
    /// Propagates [`SchedulerError::DuplicateTask`] from colliding
    /// registrations; a configuration error detected at startup.
    fn tasks(registry: &mut TaskRegistry<Self>) -> Result<(), SchedulerError>;

    /// Warm-up hook, run once per worker before the first batch when the
    /// `warmup` setting is enabled. Default is a no-op.
    fn prepare(&mut self) {}

    /// Latency histogram buckets in seconds for this model's tasks.
    #[must_use]
    fn timing_buckets() -> Vec<f64> {
        DEFAULT_TIMING_BUCKETS.to_vec()
    }
}
