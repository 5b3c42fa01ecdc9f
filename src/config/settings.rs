//! Scheduler settings, loaded once from `INFERENCE_*` environment variables
//! and immutable afterwards.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::core::error::SchedulerError;

/// Prefix of every configuration environment variable, e.g.
/// `INFERENCE_USE_GPU=true`.
pub const ENV_PREFIX: &str = "INFERENCE_";

/// How the worker pool isolates model instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PoolIsolation {
    /// One OS process per worker. The default: native model libraries, GPU
    /// contexts, and allocators are never shared.
    #[default]
    Process,
    /// One OS thread per worker inside the scheduler process. Only for
    /// models whose runtime is provably reentrant.
    Thread,
}

impl FromStr for PoolIsolation {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "process" => Ok(Self::Process),
            "thread" => Ok(Self::Thread),
            other => Err(format!("expected `process` or `thread`, got `{other}`")),
        }
    }
}

/// Scheduler configuration. Loaded once; immutable after construction.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Number of pool workers, each holding one model instance.
    pub pool_workers: usize,
    /// Whether models should place themselves on an accelerator.
    pub use_gpu: bool,
    /// Run a no-op round-trip per worker at start so the first real batch
    /// does not pay initialization latency.
    pub warmup: bool,
    /// Upper bound on items per batch.
    pub max_batch_size: usize,
    /// Upper bound on the added latency of a partially filled batch.
    pub max_batch_wait: Duration,
    /// Dispatch queue depth above which batchers hold partial batches back
    /// to fill them further.
    pub fill_queue_threshold: usize,
    /// Directory for downloaded model weights.
    pub model_cache: PathBuf,
    /// Worker isolation backend.
    pub isolation: PoolIsolation,
    /// Worker executable for the process backend. Defaults to the current
    /// executable, which re-enters through the worker guard in `main`.
    pub worker_exe: Option<PathBuf>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            pool_workers: 1,
            use_gpu: true,
            warmup: true,
            max_batch_size: 32,
            max_batch_wait: Duration::from_millis(50),
            fill_queue_threshold: 3,
            model_cache: default_model_cache(),
            isolation: PoolIsolation::default(),
            worker_exe: None,
        }
    }
}

impl SchedulerConfig {
    /// Load settings from the environment (after `.env`, if present) and
    /// validate them.
    ///
    /// # Errors
    ///
    /// Fails with [`SchedulerError::InvalidConfig`] naming the offending
    /// variable on parse or validation failures.
    pub fn from_env() -> Result<Self, SchedulerError> {
        dotenvy::dotenv().ok();
        let mut config = Self::default();
        if let Some(raw) = env_raw("POOL_WORKERS") {
            config.pool_workers = parse_value("POOL_WORKERS", &raw)?;
        }
        if let Some(raw) = env_raw("USE_GPU") {
            config.use_gpu = parse_bool("USE_GPU", &raw)?;
        }
        if let Some(raw) = env_raw("WARMUP") {
            config.warmup = parse_bool("WARMUP", &raw)?;
        }
        if let Some(raw) = env_raw("MAX_BATCH_SIZE") {
            config.max_batch_size = parse_value("MAX_BATCH_SIZE", &raw)?;
        }
        if let Some(raw) = env_raw("MAX_BATCH_WAIT_TIME") {
            let seconds: f64 = parse_value("MAX_BATCH_WAIT_TIME", &raw)?;
            if !seconds.is_finite() || seconds <= 0.0 {
                return Err(invalid("MAX_BATCH_WAIT_TIME", "must be a positive duration"));
            }
            config.max_batch_wait = Duration::from_secs_f64(seconds);
        }
        if let Some(raw) = env_raw("FILL_QUEUE_SIZE_THRESHOLD") {
            config.fill_queue_threshold = parse_value("FILL_QUEUE_SIZE_THRESHOLD", &raw)?;
        }
        if let Some(raw) = env_raw("MODEL_CACHE") {
            config.model_cache = PathBuf::from(raw);
        }
        if let Some(raw) = env_raw("POOL_ISOLATION") {
            config.isolation = parse_value("POOL_ISOLATION", &raw)?;
        }
        if let Some(raw) = env_raw("WORKER_EXE") {
            config.worker_exe = Some(PathBuf::from(raw));
        }
        config.validate()?;
        Ok(config)
    }

    /// Validate settings values.
    ///
    /// # Errors
    ///
    /// Fails with [`SchedulerError::InvalidConfig`] on the first violation.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.pool_workers == 0 {
            return Err(invalid("POOL_WORKERS", "must be greater than 0"));
        }
        if self.max_batch_size == 0 {
            return Err(invalid("MAX_BATCH_SIZE", "must be greater than 0"));
        }
        if self.max_batch_wait.is_zero() {
            return Err(invalid("MAX_BATCH_WAIT_TIME", "must be a positive duration"));
        }
        Ok(())
    }
}

fn default_model_cache() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".cache/inference_api_models")
}

fn env_raw(name: &str) -> Option<String> {
    std::env::var(format!("{ENV_PREFIX}{name}")).ok()
}

fn invalid(name: &str, reason: &str) -> SchedulerError {
    SchedulerError::InvalidConfig(format!("{ENV_PREFIX}{name}: {reason}"))
}

fn parse_value<T>(name: &str, raw: &str) -> Result<T, SchedulerError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|err| invalid(name, &format!("{err}")))
}

fn parse_bool(name: &str, raw: &str) -> Result<bool, SchedulerError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(invalid(name, &format!("expected a boolean, got `{other}`"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_table() {
        let config = SchedulerConfig::default();
        assert_eq!(config.pool_workers, 1);
        assert!(config.use_gpu);
        assert!(config.warmup);
        assert_eq!(config.max_batch_size, 32);
        assert_eq!(config.max_batch_wait, Duration::from_millis(50));
        assert_eq!(config.fill_queue_threshold, 3);
        assert_eq!(config.isolation, PoolIsolation::Process);
        assert!(config.worker_exe.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn parses_integers_and_floats() {
        assert_eq!(parse_value::<usize>("POOL_WORKERS", "4").unwrap(), 4);
        assert_eq!(
            parse_value::<f64>("MAX_BATCH_WAIT_TIME", "0.05").unwrap(),
            0.05
        );
        assert!(parse_value::<usize>("POOL_WORKERS", "four").is_err());
    }

    #[test]
    fn parses_booleans_loosely() {
        for raw in ["1", "true", "TRUE", "yes", "On"] {
            assert!(parse_bool("USE_GPU", raw).unwrap(), "{raw}");
        }
        for raw in ["0", "false", "no", "OFF"] {
            assert!(!parse_bool("USE_GPU", raw).unwrap(), "{raw}");
        }
        assert!(parse_bool("USE_GPU", "maybe").is_err());
    }

    #[test]
    fn parses_isolation() {
        assert_eq!(
            parse_value::<PoolIsolation>("POOL_ISOLATION", "process").unwrap(),
            PoolIsolation::Process
        );
        assert_eq!(
            parse_value::<PoolIsolation>("POOL_ISOLATION", "Thread").unwrap(),
            PoolIsolation::Thread
        );
        assert!(parse_value::<PoolIsolation>("POOL_ISOLATION", "fiber").is_err());
    }

    #[test]
    fn rejects_degenerate_values() {
        let mut config = SchedulerConfig::default();
        config.pool_workers = 0;
        assert!(config.validate().is_err());

        let mut config = SchedulerConfig::default();
        config.max_batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = SchedulerConfig::default();
        config.max_batch_wait = Duration::ZERO;
        assert!(config.validate().is_err());
    }
}
