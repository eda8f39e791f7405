//! Terminal progress bars driven by coordinator events.

use std::collections::HashMap;
use std::sync::Arc;

use indicatif::{HumanBytes, MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use multienc_engine::{Job, JobEvent, JobId, RunEvent, RunState};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

const BAR_LENGTH: u64 = 100;

pub struct ProgressDisplay {
    _multi: MultiProgress,
    bars: HashMap<JobId, ProgressBar>,
}

impl ProgressDisplay {
    pub fn new(jobs: &[Job], hidden: bool) -> Self {
        let multi = if hidden {
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
        } else {
            MultiProgress::new()
        };
        let style = ProgressStyle::with_template("{prefix:>16} [{bar:30.cyan/blue}] {percent:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");

        let bars = jobs
            .iter()
            .map(|job| {
                let bar = multi.add(ProgressBar::new(BAR_LENGTH));
                bar.set_style(style.clone());
                bar.set_prefix(job.label.clone());
                (job.id.clone(), bar)
            })
            .collect();

        Self {
            _multi: multi,
            bars,
        }
    }

    pub fn handle(&self, event: &RunEvent) {
        match event {
            RunEvent::Cached { item, .. } => {
                if let Some(bar) = self.bars.get(&item.id) {
                    bar.finish_with_message(format!("cached, {}", HumanBytes(item.size)));
                }
            }
            RunEvent::Job { event, .. } => self.handle_job(event),
            RunEvent::StateChanged { .. } => {}
        }
    }

    fn handle_job(&self, event: &JobEvent) {
        let Some(bar) = self.bars.get(event.job_id()) else {
            return;
        };
        match event {
            JobEvent::Progress { fraction, .. } => {
                bar.set_position((fraction * BAR_LENGTH as f32).round() as u64);
            }
            JobEvent::Result { item, .. } => {
                bar.set_message(HumanBytes(item.size).to_string());
            }
            JobEvent::Error { message, .. } => {
                bar.abandon_with_message(format!("failed: {message}"));
            }
            JobEvent::Done { .. } => {
                if !bar.is_finished() {
                    bar.finish();
                }
            }
        }
    }

    /// Leave unfinished bars (cancelled jobs) where they stopped.
    pub fn finish(&self) {
        for bar in self.bars.values() {
            if !bar.is_finished() {
                bar.abandon_with_message("cancelled");
            }
        }
    }
}

/// Render events of run `generation` until it returns to idle.
pub fn spawn_display(
    display: Arc<ProgressDisplay>,
    generation: u64,
    mut rx: broadcast::Receiver<RunEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) if event.generation() == generation => {
                    display.handle(&event);
                    if matches!(
                        event,
                        RunEvent::StateChanged {
                            state: RunState::Idle,
                            ..
                        }
                    ) {
                        break;
                    }
                }
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    })
}
