use serde::{Deserialize, Serialize};

use crate::job::JobId;
use crate::output::ResultItem;

/// Event emitted by an execution unit for one job.
///
/// For every job a unit picks up, the stream ends with `Progress(1.0)`
/// followed by `Done`, whether the job produced a `Result` or an `Error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    Progress { job_id: JobId, fraction: f32 },
    Result { job_id: JobId, item: ResultItem },
    Error { job_id: JobId, message: String },
    Done { job_id: JobId },
}

impl JobEvent {
    pub fn job_id(&self) -> &JobId {
        match self {
            JobEvent::Progress { job_id, .. }
            | JobEvent::Result { job_id, .. }
            | JobEvent::Error { job_id, .. }
            | JobEvent::Done { job_id } => job_id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobEvent::Done { .. })
    }
}
