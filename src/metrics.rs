//! Prometheus instruments for the scheduler.
//!
//! Instruments are registered on a per-scheduler [`Registry`] rather than the
//! process-global default, so embedding hosts control exposure and tests stay
//! isolated. The front-end gathers from [`Metrics::registry`] and can list
//! the declared instruments via [`Metrics::instrumentations`].

use prometheus::{Histogram, HistogramOpts, HistogramVec, IntGauge, IntGaugeVec, Opts, Registry};

use crate::core::error::SchedulerError;

/// Histogram buckets for observed batch sizes.
pub const BATCH_SIZE_BUCKETS: [f64; 8] = [1.0, 2.0, 4.0, 6.0, 8.0, 16.0, 32.0, 64.0];

/// Instrument kinds the front-end can expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstrumentKind {
    /// Monotonically increasing counter.
    Counter,
    /// Point-in-time value.
    Gauge,
    /// Bucketed distribution.
    Histogram,
}

/// Declaration of one instrument: name, kind, labels, and buckets where
/// applicable.
#[derive(Debug, Clone)]
pub struct InstrumentationSpec {
    /// Metric family name.
    pub name: &'static str,
    /// Instrument kind.
    pub kind: InstrumentKind,
    /// Label names, empty for unlabelled instruments.
    pub labels: &'static [&'static str],
    /// Histogram buckets, `None` for counters and gauges.
    pub buckets: Option<Vec<f64>>,
}

/// The scheduler's metrics sink: queue depth gauges and batch/latency
/// histograms, write-only from the scheduler's side.
pub struct Metrics {
    registry: Registry,
    pub(crate) batch_queue_size: IntGauge,
    pub(crate) task_queue_size: IntGaugeVec,
    pub(crate) batch_sizes: Histogram,
    pub(crate) task_inference_time: HistogramVec,
    timing_buckets: Vec<f64>,
}

impl Metrics {
    /// Create and register all instruments. `timing_buckets` are the
    /// model-supplied latency buckets in seconds.
    ///
    /// # Errors
    ///
    /// Propagates instrument construction/registration failures.
    pub fn new(timing_buckets: Vec<f64>) -> Result<Self, SchedulerError> {
        let registry = Registry::new();
        let batch_queue_size =
            IntGauge::new("batch_queue_size", "Queue size for batch queue")?;
        let task_queue_size = IntGaugeVec::new(
            Opts::new("task_queue_size", "Queue size for task"),
            &["task_name"],
        )?;
        let batch_sizes = Histogram::with_opts(
            HistogramOpts::new("batch_sizes", "Batch sizes used")
                .buckets(BATCH_SIZE_BUCKETS.to_vec()),
        )?;
        let task_inference_time = HistogramVec::new(
            HistogramOpts::new("task_inference_time", "Inference time for task")
                .buckets(timing_buckets.clone()),
            &["task_name"],
        )?;

        registry.register(Box::new(batch_queue_size.clone()))?;
        registry.register(Box::new(task_queue_size.clone()))?;
        registry.register(Box::new(batch_sizes.clone()))?;
        registry.register(Box::new(task_inference_time.clone()))?;

        Ok(Self {
            registry,
            batch_queue_size,
            task_queue_size,
            batch_sizes,
            task_inference_time,
            timing_buckets,
        })
    }

    /// The registry holding the instruments.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Declared instruments, for the front-end's exposure list.
    #[must_use]
    pub fn instrumentations(&self) -> Vec<InstrumentationSpec> {
        vec![
            InstrumentationSpec {
                name: "batch_queue_size",
                kind: InstrumentKind::Gauge,
                labels: &[],
                buckets: None,
            },
            InstrumentationSpec {
                name: "task_queue_size",
                kind: InstrumentKind::Gauge,
                labels: &["task_name"],
                buckets: None,
            },
            InstrumentationSpec {
                name: "batch_sizes",
                kind: InstrumentKind::Histogram,
                labels: &[],
                buckets: Some(BATCH_SIZE_BUCKETS.to_vec()),
            },
            InstrumentationSpec {
                name: "task_inference_time",
                kind: InstrumentKind::Histogram,
                labels: &["task_name"],
                buckets: Some(self.timing_buckets.clone()),
            },
        ]
    }
}
