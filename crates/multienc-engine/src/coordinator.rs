//! Run coordination: hashing, cache reuse, scheduling and reconciliation.
//!
//! Each call to [`RunCoordinator::run`] walks
//! `Idle -> Hashing -> CacheCheck -> (AllCached | Scheduling) -> Reconciling -> Idle`.
//! Starting a run cancels the one before it, and at most one scheduler
//! invocation is active at any time.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cache::{ContentCache, SourceHash, hash_source};
use crate::engine::{CodecEngine, SourceMedia};
use crate::job::{Job, JobId};
use crate::output::{HandleRegistry, OutputHandle, ResultItem};
use crate::pipeline::{JobEvent, WorkerPool, WorkerPoolConfig};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Phase of the current run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Hashing,
    CacheCheck,
    AllCached,
    Scheduling,
    Reconciling,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Idle => "idle",
            RunState::Hashing => "hashing",
            RunState::CacheCheck => "cache_check",
            RunState::AllCached => "all_cached",
            RunState::Scheduling => "scheduling",
            RunState::Reconciling => "reconciling",
        };
        f.write_str(name)
    }
}

/// Event broadcast to subscribers, tagged with the run it belongs to.
#[derive(Debug, Clone)]
pub enum RunEvent {
    StateChanged { generation: u64, state: RunState },
    /// A result served from the cache instead of being scheduled.
    Cached { generation: u64, item: ResultItem },
    Job { generation: u64, event: JobEvent },
}

impl RunEvent {
    pub fn generation(&self) -> u64 {
        match self {
            RunEvent::StateChanged { generation, .. }
            | RunEvent::Cached { generation, .. }
            | RunEvent::Job { generation, .. } => *generation,
        }
    }
}

/// What a run produced.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub generation: u64,
    /// `None` when the run was superseded before it could hash its source.
    pub hash: Option<SourceHash>,
    /// Results in compiled job order.
    pub results: Vec<ResultItem>,
    pub errors: BTreeMap<JobId, String>,
    /// Jobs satisfied from the cache.
    pub cache_hits: usize,
    /// Jobs handed to the scheduler.
    pub scheduled: usize,
    pub cancelled: bool,
}

impl RunReport {
    pub fn result(&self, id: &str) -> Option<&ResultItem> {
        self.results.iter().find(|r| r.id.as_str() == id)
    }
}

pub struct RunCoordinator {
    cache: ContentCache,
    pool: WorkerPool,
    handles: Arc<HandleRegistry>,
    state: Mutex<RunState>,
    /// Generation and token of the most recently started run.
    active: Mutex<Option<(u64, CancellationToken)>>,
    /// Serializes runs so only one scheduler invocation is ever active.
    run_lock: tokio::sync::Mutex<()>,
    generation: AtomicU64,
    /// Results currently exposed to the caller.
    current: Mutex<Vec<ResultItem>>,
    event_tx: broadcast::Sender<RunEvent>,
}

impl RunCoordinator {
    pub fn new(engine: Arc<dyn CodecEngine>, cache: ContentCache) -> Self {
        Self::with_pool_config(engine, cache, WorkerPoolConfig::default())
    }

    pub fn with_pool_config(
        engine: Arc<dyn CodecEngine>,
        cache: ContentCache,
        pool_config: WorkerPoolConfig,
    ) -> Self {
        let handles = Arc::new(HandleRegistry::new());
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            cache,
            pool: WorkerPool::with_config(engine, handles.clone(), pool_config),
            handles,
            state: Mutex::new(RunState::Idle),
            active: Mutex::new(None),
            run_lock: tokio::sync::Mutex::new(()),
            generation: AtomicU64::new(0),
            current: Mutex::new(Vec::new()),
            event_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.event_tx.subscribe()
    }

    pub fn state(&self) -> RunState {
        *self.state.lock()
    }

    /// Generation of the most recently started run.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn cache(&self) -> &ContentCache {
        &self.cache
    }

    /// Results currently exposed.
    pub fn results(&self) -> Vec<ResultItem> {
        self.current.lock().clone()
    }

    /// Bytes behind a result handle, while it is live.
    pub fn resolve(&self, handle: &OutputHandle) -> Option<Bytes> {
        self.handles.resolve(handle)
    }

    /// Cancel the active run, if any. Completed results are kept.
    pub fn cancel(&self) {
        if let Some((generation, token)) = self.active.lock().as_ref()
            && !token.is_cancelled()
        {
            info!(generation, "Cancelling run");
            token.cancel();
        }
    }

    /// Execute `jobs` against `source`, reusing cached outputs.
    pub async fn run(&self, source: SourceMedia, jobs: Vec<Job>) -> RunReport {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let token = CancellationToken::new();
        if let Some((_, previous)) = self.active.lock().replace((generation, token.clone())) {
            previous.cancel();
        }

        let _guard = self.run_lock.lock().await;
        let mut report = RunReport {
            generation,
            ..RunReport::default()
        };

        if token.is_cancelled() {
            debug!(generation, "Run superseded before it started");
            report.cancelled = true;
            return report;
        }
        if jobs.is_empty() {
            debug!(generation, "Nothing to run");
            self.clear_active(generation);
            return report;
        }

        info!(generation, jobs = jobs.len(), source_size = source.len(), "Run started");

        self.set_state(generation, RunState::Hashing);
        let hash = hash_source(source.bytes.clone()).await;
        report.hash = Some(hash.clone());

        self.set_state(generation, RunState::CacheCheck);
        let compiled: HashSet<&JobId> = jobs.iter().map(|j| &j.id).collect();
        let records: Vec<_> = self
            .cache
            .lookup(&hash)
            .await
            .into_iter()
            .filter(|r| compiled.contains(&r.job_id))
            .collect();
        let mut accumulated = self.cache.materialize(&records, &self.handles);
        report.cache_hits = accumulated.len();

        let residual: Vec<Job> = jobs
            .iter()
            .filter(|j| !accumulated.contains_key(&j.id))
            .cloned()
            .collect();
        report.scheduled = residual.len();

        if residual.is_empty() {
            info!(generation, hash = hash.short(), cached = report.cache_hits, "All outputs cached");
            self.set_state(generation, RunState::AllCached);
            self.publish_cached(generation, &accumulated);
            self.set_state(generation, RunState::Reconciling);
            self.cache.mark_last_run(&hash).await;
        } else {
            info!(
                generation,
                hash = hash.short(),
                cached = report.cache_hits,
                scheduled = residual.len(),
                "Scheduling residual jobs"
            );
            self.set_state(generation, RunState::Scheduling);
            self.publish_cached(generation, &accumulated);

            let outcome = self.schedule(generation, source, residual, token.clone()).await;

            self.set_state(generation, RunState::Reconciling);
            report.cancelled = outcome.cancelled;
            report.errors = outcome.errors;
            for item in outcome.results {
                if let Some(stale) = accumulated.insert(item.id.clone(), item) {
                    self.handles.revoke(&stale.handle);
                }
            }

            let items: Vec<ResultItem> = accumulated.values().cloned().collect();
            self.cache.write_back(&hash, &items, &self.handles).await;
        }

        report.results = jobs
            .iter()
            .filter_map(|job| accumulated.remove(&job.id))
            .collect();

        if self.generation() == generation {
            let previous = std::mem::replace(&mut *self.current.lock(), report.results.clone());
            self.handles.revoke_all(&previous);
        } else {
            // A newer run owns the exposed results; these were only cached.
            self.handles.revoke_all(&report.results);
            report.cancelled = true;
        }

        info!(
            generation,
            results = report.results.len(),
            errors = report.errors.len(),
            cancelled = report.cancelled,
            "Run finished"
        );
        self.set_state(generation, RunState::Idle);
        self.clear_active(generation);
        report
    }

    /// Expose the cached results of the most recent run, as on start-up.
    ///
    /// Returns the restored results, empty when nothing is cached.
    pub async fn resume_last_run(&self) -> Vec<ResultItem> {
        let _guard = self.run_lock.lock().await;
        let Some(hash) = self.cache.last_run().await else {
            return Vec::new();
        };

        let records = self.cache.lookup(&hash).await;
        let restored: Vec<ResultItem> = self
            .cache
            .materialize(&records, &self.handles)
            .into_values()
            .collect();
        info!(hash = hash.short(), results = restored.len(), "Resumed most recent run");

        let previous = std::mem::replace(&mut *self.current.lock(), restored.clone());
        self.handles.revoke_all(&previous);
        restored
    }

    /// Cancel any active run, release every exposed handle and empty the cache.
    pub async fn clear_cache(&self) {
        self.cancel();
        let _guard = self.run_lock.lock().await;

        let previous = std::mem::take(&mut *self.current.lock());
        self.handles.revoke_all(&previous);
        self.cache.clear().await;
    }

    async fn schedule(
        &self,
        generation: u64,
        source: SourceMedia,
        jobs: Vec<Job>,
        token: CancellationToken,
    ) -> crate::pipeline::RunOutcome {
        let (observer_tx, mut observer_rx) = mpsc::unbounded_channel();
        let run = self.pool.run(source, jobs, token, Some(observer_tx));
        tokio::pin!(run);

        let outcome = loop {
            tokio::select! {
                outcome = &mut run => break outcome,
                Some(event) = observer_rx.recv() => self.publish_job(generation, event),
            }
        };
        while let Ok(event) = observer_rx.try_recv() {
            self.publish_job(generation, event);
        }
        outcome
    }

    fn publish_cached(&self, generation: u64, items: &BTreeMap<JobId, ResultItem>) {
        for item in items.values() {
            let _ = self.event_tx.send(RunEvent::Cached {
                generation,
                item: item.clone(),
            });
        }
    }

    /// Events of superseded runs, or arriving outside `Scheduling`, are dropped.
    fn publish_job(&self, generation: u64, event: JobEvent) {
        if self.generation() != generation || self.state() != RunState::Scheduling {
            return;
        }
        let _ = self.event_tx.send(RunEvent::Job { generation, event });
    }

    fn set_state(&self, generation: u64, state: RunState) {
        *self.state.lock() = state;
        debug!(generation, %state, "Run state changed");
        let _ = self.event_tx.send(RunEvent::StateChanged { generation, state });
    }

    /// Drop the active token if it still belongs to `generation`.
    fn clear_active(&self, generation: u64) {
        let mut active = self.active.lock();
        if active.as_ref().is_some_and(|(g, _)| *g == generation) {
            *active = None;
        }
    }
}
