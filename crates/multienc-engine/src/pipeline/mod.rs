//! Job scheduling.
//!
//! A [`WorkerPool`] runs a compiled job list on a bounded number of execution
//! units. Units share a single queue cursor, report through [`JobEvent`]s, and
//! stop cooperatively when the run's cancellation token fires.

mod events;
mod progress;
mod worker_pool;

pub use events::JobEvent;
pub use progress::ProgressReporter;
pub use worker_pool::{RunOutcome, WorkerPool, WorkerPoolConfig, default_concurrency};
