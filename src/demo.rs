//! A small model with no real weights, used by the `echo-model` worker
//! harness binary and the integration tests.
//!
//! Its tasks cover the handler contract end to end: plain success, domain
//! errors, and a worker-killing failure mode for exercising crash recovery
//! under process isolation.

use crate::core::error::{ModelError, SchedulerError};
use crate::core::model::{InferenceModel, ModelContext, Payload};
use crate::core::registry::TaskRegistry;

/// Demo model: echoes payloads back, with a few deliberate failure modes.
pub struct EchoModel {
    device: &'static str,
}

fn echo(_model: &EchoModel, items: Vec<Payload>) -> Result<Vec<Payload>, ModelError> {
    Ok(items)
}

fn upper(_model: &EchoModel, items: Vec<Payload>) -> Result<Vec<Payload>, ModelError> {
    items
        .into_iter()
        .map(|item| match item {
            Payload::String(text) => Ok(Payload::String(text.to_uppercase())),
            other => Err(ModelError::with_status(
                format!("expected a string item, got {other}"),
                422,
            )),
        })
        .collect()
}

fn flaky(_model: &EchoModel, _items: Vec<Payload>) -> Result<Vec<Payload>, ModelError> {
    Err(ModelError::with_status("synthetic failure", 503))
}

/// Echoes items, but exits the whole process on a `"poison"` item. Only
/// meaningful under process isolation, where the exit takes down a single
/// worker and the pool respawns it.
fn unstable(_model: &EchoModel, items: Vec<Payload>) -> Result<Vec<Payload>, ModelError> {
    if items.iter().any(|item| item == &Payload::from("poison")) {
        std::process::exit(7);
    }
    Ok(items)
}

impl InferenceModel for EchoModel {
    const MODEL_NAME: &'static str = "echo_model";

    fn create(ctx: &ModelContext) -> Result<Self, ModelError> {
        Ok(Self {
            device: if ctx.use_gpu { "cuda" } else { "cpu" },
        })
    }

    fn tasks(registry: &mut TaskRegistry<Self>) -> Result<(), SchedulerError> {
        registry.register("echo", echo)?;
        registry.register("upper", upper)?;
        registry.register("flaky", flaky)?;
        registry.register("unstable", unstable)?;
        Ok(())
    }

    fn prepare(&mut self) {
        tracing::debug!(device = self.device, "echo model warmed up");
    }
}
