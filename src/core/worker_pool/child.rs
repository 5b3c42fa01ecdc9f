//! Entry point for a worker process.
//!
//! A host binary embedding the scheduler calls [`is_worker_process`] at the
//! very top of `main` and, when it returns true, hands control to
//! [`run_worker`] instead of starting the service:
//!
//! ```rust,no_run
//! use inference_scheduler::core::worker_pool::child;
//! use inference_scheduler::demo::EchoModel;
//!
//! fn main() -> anyhow::Result<()> {
//!     if child::is_worker_process() {
//!         inference_scheduler::util::telemetry::init_worker_tracing();
//!         return child::run_worker::<EchoModel>();
//!     }
//!     // ... start the service ...
//!     Ok(())
//! }
//! ```

use std::io::{self, BufRead, Write};

use anyhow::Context;

use crate::config::SchedulerConfig;
use crate::core::error::AppResult;
use crate::core::model::{InferenceModel, ModelContext};
use crate::core::registry::TaskRegistry;
use crate::core::worker_pool::execute_batch;
use crate::core::worker_pool::protocol::{
    read_message, write_message, WorkerRequest, WorkerResponse,
};

/// Environment marker the pool sets on spawned worker processes.
pub const WORKER_ENV_VAR: &str = "INFERENCE_WORKER";

/// True when this process was spawned as a pool worker.
#[must_use]
pub fn is_worker_process() -> bool {
    std::env::var_os(WORKER_ENV_VAR).is_some_and(|value| value == "1")
}

/// Serve batch execution requests on stdin/stdout until the parent sends
/// `Shutdown` or closes the pipe.
///
/// Stdout carries the wire protocol; worker logging must go to stderr (see
/// [`crate::util::telemetry::init_worker_tracing`]).
///
/// # Errors
///
/// Fails when configuration cannot be loaded, the model cannot be
/// constructed, or the protocol streams break mid-message.
pub fn run_worker<M: InferenceModel>() -> AppResult<()> {
    let config = SchedulerConfig::from_env().context("loading worker configuration")?;
    let registry = TaskRegistry::<M>::for_model().context("building task registry")?;
    let ctx = ModelContext::from_config(&config);
    let mut model = M::create(&ctx).context("materializing model")?;
    tracing::info!(
        model = M::MODEL_NAME,
        tasks = ?registry.task_names(),
        "worker process serving"
    );

    let stdin = io::stdin();
    let mut reader = stdin.lock();
    let stdout = io::stdout();
    let mut writer = stdout.lock();
    serve(&registry, &mut model, &mut reader, &mut writer)
}

fn serve<M: InferenceModel>(
    registry: &TaskRegistry<M>,
    model: &mut M,
    reader: &mut impl BufRead,
    writer: &mut impl Write,
) -> AppResult<()> {
    loop {
        let request: WorkerRequest = match read_message(reader) {
            Ok(request) => request,
            // Parent dropped the pipe; treat like an orderly shutdown.
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(err) => return Err(err).context("reading request"),
        };
        match request {
            WorkerRequest::Prepare => {
                model.prepare();
                write_message(writer, &WorkerResponse::Ready).context("writing ready")?;
            }
            WorkerRequest::Run { task_name, items } => {
                let result = execute_batch(registry, model, &task_name, items);
                write_message(writer, &WorkerResponse::Result(result))
                    .context("writing result")?;
            }
            WorkerRequest::Shutdown => {
                tracing::info!(model = M::MODEL_NAME, "worker shutting down");
                return Ok(());
            }
        }
    }
}
