//! Feedback tone injection task.
//!
//! One task per injection.  The sequence is fixed:
//!
//! ```text
//! [assert talking → settle]   (VAD path only)
//! render tone at engine rate
//! spawn_blocking(inject_raw_audio)        paced, blocks for the tone length
//! [trailing delay]            (only when the engine accepted the audio)
//! set_talking(false)          always
//! release delay               swallows the engine's talk echo
//! → InjectionFinished
//! ```
//!
//! `InjectionFinished` is sent from a drop guard, so the session hears about
//! the end of the task even when it fails or is aborted.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::TimingConfig;
use crate::engine::VoiceEngine;
use crate::tone::{BeepTarget, FeedbackTone};

use super::runner::SessionInternal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InjectionTiming {
    /// Wait after asserting talk before audio follows.
    pub settle: Duration,
    /// Wait after injection so the last frames flush.
    pub trailing: Duration,
    /// Wait after deasserting before the talk guard lifts.
    pub release: Duration,
}

impl InjectionTiming {
    pub fn from_config(timing: &TimingConfig) -> Self {
        Self {
            settle: Duration::from_millis(timing.talk_settle_ms),
            trailing: Duration::from_millis(timing.injection_trailing_ms),
            release: Duration::from_millis(timing.guard_release_ms),
        }
    }
}

impl Default for InjectionTiming {
    fn default() -> Self {
        Self::from_config(&TimingConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InjectionOutcome {
    Sent { samples: usize },
    /// The engine refused the buffer.
    Rejected,
    Failed(String),
    /// The task was cancelled before it completed.
    Aborted,
}

pub(crate) struct InjectionJob {
    pub id: u64,
    pub tone: FeedbackTone,
    pub assert_talking: bool,
    pub timing: InjectionTiming,
}

struct CompletionGuard {
    id: u64,
    outcome: InjectionOutcome,
    tx: mpsc::UnboundedSender<SessionInternal>,
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        let outcome = std::mem::replace(&mut self.outcome, InjectionOutcome::Aborted);
        let _ = self.tx.send(SessionInternal::InjectionFinished {
            id: self.id,
            outcome,
        });
    }
}

pub(crate) fn spawn_injection(
    engine: Arc<dyn VoiceEngine>,
    job: InjectionJob,
    tx: mpsc::UnboundedSender<SessionInternal>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut guard = CompletionGuard {
            id: job.id,
            outcome: InjectionOutcome::Aborted,
            tx,
        };
        guard.outcome = inject(engine, &job).await;
    })
}

async fn inject(engine: Arc<dyn VoiceEngine>, job: &InjectionJob) -> InjectionOutcome {
    if job.assert_talking {
        engine.set_talking(true);
        tokio::time::sleep(job.timing.settle).await;
    }

    let sample_rate = engine.sample_rate();
    let outcome = match job.tone.render(BeepTarget::Transmitted, sample_rate) {
        Ok(pcm) => {
            let samples = pcm.len();
            log::debug!(
                "feedback: injecting {} ({samples} samples @ {sample_rate} Hz)",
                job.tone.style().label()
            );
            let blocking_engine = Arc::clone(&engine);
            match tokio::task::spawn_blocking(move || blocking_engine.inject_raw_audio(&pcm)).await {
                Ok(true) => {
                    tokio::time::sleep(job.timing.trailing).await;
                    InjectionOutcome::Sent { samples }
                }
                Ok(false) => InjectionOutcome::Rejected,
                Err(e) => InjectionOutcome::Failed(format!("injection task failed: {e}")),
            }
        }
        Err(e) => InjectionOutcome::Failed(e.to_string()),
    };

    engine.set_talking(false);
    tokio::time::sleep(job.timing.release).await;
    outcome
}
