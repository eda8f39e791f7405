//! Bounded pool of execution units pulling jobs from one shared queue.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, info, warn};

use super::events::JobEvent;
use super::progress::ProgressReporter;
use crate::engine::{CodecEngine, SourceMedia};
use crate::job::{Job, JobId};
use crate::output::{HandleRegistry, ResultItem, output_name};
use crate::{Error, Result};

/// Upper bound applied by [`default_concurrency`].
const MAX_DEFAULT_WORKERS: usize = 3;

/// `min(available_parallelism - 1, 3)`, never below 1.
pub fn default_concurrency() -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2);
    cores.saturating_sub(1).clamp(1, MAX_DEFAULT_WORKERS)
}

/// Configuration for a worker pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerPoolConfig {
    /// Maximum concurrent execution units.
    pub max_workers: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            max_workers: default_concurrency(),
        }
    }
}

impl WorkerPoolConfig {
    pub fn new(max_workers: usize) -> Self {
        Self {
            max_workers: max_workers.max(1),
        }
    }
}

/// Everything a scheduler invocation produced.
#[derive(Debug, Clone, Default)]
pub struct RunOutcome {
    /// Results in completion order.
    pub results: Vec<ResultItem>,
    /// Failure message per job.
    pub errors: BTreeMap<JobId, String>,
    /// The run observed its cancellation token before the queue drained.
    pub cancelled: bool,
}

impl RunOutcome {
    fn record(&mut self, event: &JobEvent) {
        match event {
            JobEvent::Result { item, .. } => self.results.push(item.clone()),
            JobEvent::Error { job_id, message } => {
                self.errors.insert(job_id.clone(), message.clone());
            }
            JobEvent::Progress { .. } | JobEvent::Done { .. } => {}
        }
    }
}

/// Runs jobs on at most `max_workers` isolated execution units.
///
/// Every job executes in its own task, so a panic inside the codec engine is
/// reported as that job's failure and the unit moves on to the next job.
pub struct WorkerPool {
    engine: Arc<dyn CodecEngine>,
    handles: Arc<HandleRegistry>,
    config: WorkerPoolConfig,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl WorkerPool {
    pub fn new(engine: Arc<dyn CodecEngine>, handles: Arc<HandleRegistry>) -> Self {
        Self::with_config(engine, handles, WorkerPoolConfig::default())
    }

    pub fn with_config(
        engine: Arc<dyn CodecEngine>,
        handles: Arc<HandleRegistry>,
        config: WorkerPoolConfig,
    ) -> Self {
        Self {
            engine,
            handles,
            config,
            active: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }

    /// Jobs currently executing.
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously executing jobs seen so far.
    pub fn peak_active(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Execute `jobs` against `source`.
    ///
    /// Events are forwarded to `observer` as they arrive. Once `cancel` fires
    /// the units stop pulling, in-flight executions are aborted, and the call
    /// returns with whatever had already completed.
    pub async fn run(
        &self,
        source: SourceMedia,
        jobs: Vec<Job>,
        cancel: CancellationToken,
        observer: Option<mpsc::UnboundedSender<JobEvent>>,
    ) -> RunOutcome {
        let mut outcome = RunOutcome::default();
        if jobs.is_empty() {
            return outcome;
        }

        let units = self.config.max_workers.max(1).min(jobs.len());
        info!(
            jobs = jobs.len(),
            units,
            engine = self.engine.name(),
            "Starting execution units"
        );

        let jobs = Arc::new(jobs);
        let cursor = Arc::new(AtomicUsize::new(0));
        let (tx, mut rx) = mpsc::unbounded_channel::<JobEvent>();

        let mut join_set = JoinSet::new();
        for unit_id in 0..units {
            let unit = ExecutionUnit {
                unit_id,
                jobs: jobs.clone(),
                cursor: cursor.clone(),
                source: source.clone(),
                engine: self.engine.clone(),
                handles: self.handles.clone(),
                cancel: cancel.clone(),
                tx: tx.clone(),
                active: self.active.clone(),
                peak: self.peak.clone(),
            };
            join_set.spawn(unit.run());
        }
        // The channel closes once every unit and job task has exited.
        drop(tx);

        let forward = |event: &JobEvent| {
            if let Some(observer) = &observer {
                let _ = observer.send(event.clone());
            }
        };

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    outcome.cancelled = true;
                    break;
                }
                event = rx.recv() => match event {
                    Some(event) => {
                        outcome.record(&event);
                        forward(&event);
                    }
                    None => break,
                },
            }
        }

        // Units exit on their own once cancelled, dropping (and so aborting)
        // any job still in flight. Waiting for them guarantees every minted
        // handle has been sent before the final drain.
        while join_set.join_next().await.is_some() {}
        while let Ok(event) = rx.try_recv() {
            outcome.record(&event);
            forward(&event);
        }

        if outcome.cancelled {
            info!(
                completed = outcome.results.len(),
                failed = outcome.errors.len(),
                "Run cancelled"
            );
        } else {
            info!(
                completed = outcome.results.len(),
                failed = outcome.errors.len(),
                "All jobs finished"
            );
        }

        outcome
    }
}

struct ExecutionUnit {
    unit_id: usize,
    jobs: Arc<Vec<Job>>,
    cursor: Arc<AtomicUsize>,
    source: SourceMedia,
    engine: Arc<dyn CodecEngine>,
    handles: Arc<HandleRegistry>,
    cancel: CancellationToken,
    tx: mpsc::UnboundedSender<JobEvent>,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl ExecutionUnit {
    async fn run(self) {
        debug!(unit = self.unit_id, "Execution unit started");

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let index = self.cursor.fetch_add(1, Ordering::SeqCst);
            let Some(job) = self.jobs.get(index).cloned() else {
                break;
            };

            let running = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(running, Ordering::SeqCst);
            debug!(unit = self.unit_id, job_id = %job.id, "Executing job");

            let reporter = ProgressReporter::new(job.id.clone(), self.tx.clone());
            let mut task = AbortOnDropHandle::new(tokio::spawn(execute_job(
                job.clone(),
                self.source.clone(),
                self.engine.clone(),
                reporter.clone(),
            )));

            let joined = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    // A job that finished alongside the cancellation still counts.
                    if task.is_finished() {
                        Some((&mut task).await)
                    } else {
                        None
                    }
                }
                joined = &mut task => Some(joined),
            };
            self.active.fetch_sub(1, Ordering::SeqCst);

            let Some(joined) = joined else {
                debug!(unit = self.unit_id, job_id = %job.id, "Abandoned in-flight job");
                break;
            };

            // Minted here, with no await before the send, so every handle
            // reaches the aggregator.
            let event = match joined.map_err(join_error).and_then(|r| r) {
                Ok(bytes) => {
                    info!(job_id = %job.id, size = bytes.len(), "Job completed");
                    JobEvent::Result {
                        job_id: job.id.clone(),
                        item: ResultItem {
                            id: job.id.clone(),
                            name: output_name(self.source.name.as_deref(), &job.ext),
                            size: bytes.len() as u64,
                            handle: self.handles.mint(bytes),
                            mime: job.mime.clone(),
                            label: job.label.clone(),
                        },
                    }
                }
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "Job failed");
                    JobEvent::Error {
                        job_id: job.id.clone(),
                        message: e.job_message(),
                    }
                }
            };

            let _ = self.tx.send(event);
            reporter.report(1.0);
            let _ = self.tx.send(JobEvent::Done { job_id: job.id });
        }

        debug!(unit = self.unit_id, "Execution unit finished");
    }
}

async fn execute_job(
    job: Job,
    source: SourceMedia,
    engine: Arc<dyn CodecEngine>,
    reporter: ProgressReporter,
) -> Result<Bytes> {
    if job.copy_source {
        return Ok(source.bytes.clone());
    }
    engine
        .encode(&source, &job.format, job.bitrate_bps(), &reporter)
        .await
}

fn join_error(err: JoinError) -> Error {
    if err.is_cancelled() {
        return Error::Cancelled;
    }
    Error::Panicked(panic_message(err.into_panic()))
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
