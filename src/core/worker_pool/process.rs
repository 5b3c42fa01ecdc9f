//! Process-isolated pool backend.
//!
//! One OS manager thread per worker process: the manager pulls batch jobs
//! from the shared rendezvous channel, round-trips them over the child's
//! stdin/stdout, and respawns the child when it dies mid-batch. Dropping the
//! job sender unblocks idle managers for a clean shutdown.

use std::io::{BufReader, BufWriter};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::config::SchedulerConfig;
use crate::core::error::{SchedulerError, TaskError};
use crate::core::model::Payload;
use crate::core::worker_pool::child::WORKER_ENV_VAR;
use crate::core::worker_pool::protocol::{
    read_message, write_message, WorkerRequest, WorkerResponse,
};
use crate::core::worker_pool::{submit_job, BatchJob, TaskResult, WorkerBackend};

/// How a manager spawns (and respawns) its worker process.
#[derive(Debug, Clone)]
struct WorkerSpec {
    exe: PathBuf,
    warmup: bool,
}

/// A live worker process with buffered protocol streams.
struct WorkerProcess {
    child: Child,
    stdin: BufWriter<ChildStdin>,
    stdout: BufReader<ChildStdout>,
}

impl WorkerProcess {
    fn spawn(spec: &WorkerSpec) -> std::io::Result<Self> {
        let mut child = Command::new(&spec.exe)
            .env(WORKER_ENV_VAR, "1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| std::io::Error::other("worker stdin not piped"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("worker stdout not piped"))?;
        Ok(Self {
            child,
            stdin: BufWriter::new(stdin),
            stdout: BufReader::new(stdout),
        })
    }

    fn round_trip(&mut self, request: &WorkerRequest) -> std::io::Result<WorkerResponse> {
        write_message(&mut self.stdin, request)?;
        read_message(&mut self.stdout)
    }

    /// No-op round-trip confirming the child has materialized its model.
    fn prepare(&mut self) -> std::io::Result<()> {
        match self.round_trip(&WorkerRequest::Prepare)? {
            WorkerResponse::Ready => Ok(()),
            WorkerResponse::Result(_) => Err(std::io::Error::other(
                "unexpected result reply to prepare",
            )),
        }
    }

    fn terminate(mut self) {
        let _ = write_message(&mut self.stdin, &WorkerRequest::Shutdown);
        drop(self.stdin);
        let _ = self.child.wait();
    }

    fn kill(mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Fixed pool of isolated worker processes, each holding one model instance.
pub struct ProcessPool {
    spec: WorkerSpec,
    pool_workers: usize,
    jobs: Mutex<Option<Sender<BatchJob>>>,
    job_rx: Receiver<BatchJob>,
    managers: Mutex<Vec<JoinHandle<()>>>,
}

impl ProcessPool {
    /// Build the pool from configuration. Workers are spawned by `start()`.
    ///
    /// # Errors
    ///
    /// Fails when no worker executable is configured and the current
    /// executable cannot be resolved.
    pub fn new(config: &SchedulerConfig) -> Result<Self, SchedulerError> {
        let exe = match &config.worker_exe {
            Some(path) => path.clone(),
            None => std::env::current_exe().map_err(|err| {
                SchedulerError::InvalidConfig(format!("cannot resolve worker executable: {err}"))
            })?,
        };
        // Rendezvous channel: a submission parks until a worker is free.
        let (jobs_tx, job_rx) = bounded(0);
        Ok(Self {
            spec: WorkerSpec {
                exe,
                warmup: config.warmup,
            },
            pool_workers: config.pool_workers,
            jobs: Mutex::new(Some(jobs_tx)),
            job_rx,
            managers: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait::async_trait]
impl WorkerBackend for ProcessPool {
    async fn start(&self) -> Result<(), SchedulerError> {
        let mut ready = Vec::with_capacity(self.pool_workers);
        {
            let mut managers = self.managers.lock();
            for worker_id in 0..self.pool_workers {
                let (ready_tx, ready_rx) = oneshot::channel();
                let spec = self.spec.clone();
                let jobs = self.job_rx.clone();
                let handle = thread::Builder::new()
                    .name(format!("inference-worker-{worker_id}"))
                    .spawn(move || manager_loop(worker_id, &spec, &jobs, ready_tx))
                    .map_err(|err| {
                        SchedulerError::InvalidConfig(format!(
                            "failed to spawn worker manager: {err}"
                        ))
                    })?;
                managers.push(handle);
                ready.push(ready_rx);
            }
        }
        for ready_rx in ready {
            match ready_rx.await {
                Ok(Ok(())) => {}
                Ok(Err(message)) => return Err(SchedulerError::InvalidConfig(message)),
                Err(_) => {
                    return Err(SchedulerError::InvalidConfig(
                        "worker manager exited before reporting readiness".into(),
                    ))
                }
            }
        }
        info!(
            pool_workers = self.pool_workers,
            exe = %self.spec.exe.display(),
            warmup = self.spec.warmup,
            "process pool started"
        );
        Ok(())
    }

    async fn submit(
        &self,
        task_name: &str,
        items: Vec<Payload>,
    ) -> Result<TaskResult, SchedulerError> {
        let jobs = self.jobs.lock().clone();
        submit_job(jobs, task_name, items).await
    }

    async fn shutdown(&self) {
        drop(self.jobs.lock().take());
        let handles: Vec<_> = self.managers.lock().drain(..).collect();
        let joined = tokio::task::spawn_blocking(move || {
            for handle in handles {
                let _ = handle.join();
            }
        })
        .await;
        if joined.is_err() {
            warn!("worker managers did not join cleanly");
        }
        info!("process pool shut down");
    }
}

/// One manager: owns a worker process for the life of the pool, replacing it
/// whenever it dies.
fn manager_loop(
    worker_id: usize,
    spec: &WorkerSpec,
    jobs: &Receiver<BatchJob>,
    ready_tx: oneshot::Sender<Result<(), String>>,
) {
    let mut worker = match boot_worker(spec) {
        Ok(worker) => worker,
        Err(err) => {
            let _ = ready_tx.send(Err(format!("worker {worker_id} failed to start: {err}")));
            return;
        }
    };
    let _ = ready_tx.send(Ok(()));
    debug!(worker_id, "worker process ready");

    while let Ok(job) = jobs.recv() {
        let BatchJob {
            task_name,
            items,
            reply,
        } = job;
        let request = WorkerRequest::Run { task_name, items };
        match worker.round_trip(&request) {
            Ok(WorkerResponse::Result(result)) => {
                let _ = reply.send(result);
            }
            Ok(WorkerResponse::Ready) => {
                error!(worker_id, "protocol violation: ready reply to run");
                let _ = reply.send(TaskResult {
                    latency_ms: 0,
                    outcome: Err(TaskError::worker_crash()),
                });
                worker.kill();
                match boot_worker(spec) {
                    Ok(next) => worker = next,
                    Err(err) => {
                        error!(worker_id, error = %err, "failed to respawn worker");
                        return;
                    }
                }
            }
            Err(err) => {
                warn!(worker_id, error = %err, "worker died mid-batch; respawning");
                let _ = reply.send(TaskResult {
                    latency_ms: 0,
                    outcome: Err(TaskError::worker_crash()),
                });
                worker.kill();
                // Replace the dead worker before accepting further work.
                match boot_worker(spec) {
                    Ok(next) => worker = next,
                    Err(err) => {
                        error!(worker_id, error = %err, "failed to respawn worker");
                        return;
                    }
                }
            }
        }
    }

    worker.terminate();
    debug!(worker_id, "worker manager exiting");
}

fn boot_worker(spec: &WorkerSpec) -> std::io::Result<WorkerProcess> {
    let mut worker = WorkerProcess::spawn(spec)?;
    if spec.warmup {
        worker.prepare()?;
    }
    Ok(worker)
}
