//! # Inference Scheduler
//!
//! A batching inference scheduler with process-isolated model workers.
//!
//! This library turns a stream of concurrent single-item requests into
//! bounded multi-item batches, dispatches each batch to an isolated worker
//! process that holds a heavyweight model, and demultiplexes results back to
//! the originating requests with per-item error propagation.
//!
//! ## Core Problem Solved
//!
//! Inference workloads have constraints that typical request/response
//! services do not:
//!
//! - **Batch efficiency**: model kernels amortize poorly over single items;
//!   grouping requests into batches multiplies throughput
//! - **Native library state**: model runtimes (CUDA contexts, allocators,
//!   BLAS threads) are rarely reentrant - each model needs a private address
//!   space
//! - **Fault containment**: a malformed item must not take the service down;
//!   a crashed worker must be replaced without corrupting queued work
//! - **Latency bounds**: waiting for a fuller batch is only acceptable up to
//!   a configured bound
//!
//! ## Key Features
//!
//! - **Per-task batching**: one batcher per registered task accumulates items
//!   under a size/time policy with adaptive fill pressure
//! - **Process-isolated workers**: each worker process owns one model
//!   instance; crashed workers are respawned automatically
//! - **Order preservation**: outputs correspond positionally to inputs, and
//!   per-task FIFO ordering holds end-to-end
//! - **Prometheus instrumentation**: queue depths, batch sizes, and per-task
//!   inference latency
//!
//! ## Quick Example
//!
//! ```rust,no_run
//! use inference_scheduler::config::SchedulerConfig;
//! use inference_scheduler::core::Scheduler;
//! use inference_scheduler::demo::EchoModel;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let scheduler = Scheduler::<EchoModel>::new(SchedulerConfig::from_env()?)?;
//! scheduler.start().await?;
//! let outputs = scheduler
//!     .submit_tasks("echo", vec![serde_json::json!("hello")])
//!     .await?;
//! assert_eq!(outputs, vec![serde_json::json!("hello")]);
//! scheduler.stop().await;
//! # Ok(())
//! # }
//! ```
//!
//! For complete examples, see:
//! - `tests/scheduler_test.rs` - full scheduling scenarios
//! - `tests/process_pool_test.rs` - process isolation and crash recovery

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

/// Environment-driven scheduler configuration.
pub mod config;
/// Core scheduling: registry, batcher, dispatch, worker pool, submission API.
pub mod core;
/// Demo model used by the worker harness binary and the integration tests.
pub mod demo;
/// Prometheus instruments exposed to the metrics endpoint.
pub mod metrics;
/// Shared utilities.
pub mod util;
