use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::events::JobEvent;
use crate::job::JobId;

/// Relays codec engine progress for one job.
///
/// Fractions are clamped to `0..=1` and never move backwards: a report lower
/// than the last one sent is dropped, so observers always see a
/// non-decreasing sequence for the job.
#[derive(Clone)]
pub struct ProgressReporter {
    job_id: JobId,
    tx: mpsc::UnboundedSender<JobEvent>,
    last: Arc<Mutex<f32>>,
}

impl ProgressReporter {
    pub fn new(job_id: JobId, tx: mpsc::UnboundedSender<JobEvent>) -> Self {
        Self {
            job_id,
            tx,
            last: Arc::new(Mutex::new(0.0)),
        }
    }

    pub fn noop(job_id: JobId) -> Self {
        let (tx, _rx) = mpsc::unbounded_channel::<JobEvent>();
        Self::new(job_id, tx)
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn report(&self, fraction: f32) {
        if fraction.is_nan() {
            return;
        }
        let fraction = fraction.clamp(0.0, 1.0);
        {
            let mut last = self.last.lock();
            if fraction < *last {
                return;
            }
            *last = fraction;
        }
        let _ = self.tx.send(JobEvent::Progress {
            job_id: self.job_id.clone(),
            fraction,
        });
    }

    /// Last fraction relayed.
    pub fn current(&self) -> f32 {
        *self.last.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &mut mpsc::UnboundedReceiver<JobEvent>) -> Vec<f32> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let JobEvent::Progress { fraction, .. } = event {
                out.push(fraction);
            }
        }
        out
    }

    #[test]
    fn test_progress_is_clamped_and_monotonic() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let reporter = ProgressReporter::new(JobId::from("opus-64"), tx);

        reporter.report(0.2);
        reporter.report(0.1);
        reporter.report(f32::NAN);
        reporter.report(0.6);
        reporter.report(4.0);

        assert_eq!(drain(&mut rx), vec![0.2, 0.6, 1.0]);
        assert_eq!(reporter.current(), 1.0);
    }

    #[test]
    fn test_clones_share_watermark() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let a = ProgressReporter::new(JobId::from("mp3-128"), tx);
        let b = a.clone();

        a.report(0.7);
        b.report(0.3);

        assert_eq!(drain(&mut rx), vec![0.7]);
    }

    #[test]
    fn test_noop_does_not_panic() {
        let reporter = ProgressReporter::noop(JobId::from("wav-lossless"));
        reporter.report(0.5);
        assert_eq!(reporter.current(), 0.5);
    }
}
