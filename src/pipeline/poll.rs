//! Polling state machine for a single remote stage.
//!
//! A remote job passes through stages the provider only exposes via status
//! reads: first the upload target becomes available, later the converted
//! file does. [`poll_stage`] turns one such stage into a bounded wait:
//!
//! ```text
//!            ┌──────── Pending (sleep interval) ───────┐
//!            ▼                                          │
//!   ──▶  Waiting ──check──▶ classify ───────────────────┘
//!            │                 │ Done(payload)   ──▶ Succeeded
//!            │                 │ Failed(reason)  ──▶ Failed
//!            └─ attempts == max ───────────────────▶ TimedOut
//! ```
//!
//! The classifier is supplied per stage, so the same loop handles "upload
//! URL ready" and "conversion finished" with independent budgets.

use crate::error::ConvertError;
use crate::pipeline::task::TaskStatus;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A polled phase of a remote job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Waiting for the provider to hand out an upload target.
    UploadReady,
    /// Waiting for the provider to finish transcoding.
    Conversion,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::UploadReady => f.write_str("upload-ready"),
            Stage::Conversion => f.write_str("conversion"),
        }
    }
}

/// Inter-poll delay and attempt budget for one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    /// Always ≥ 1.
    pub max_attempts: u32,
}

impl PollPolicy {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Time spent sleeping if every attempt comes back pending.
    pub fn ceiling(&self) -> Duration {
        self.interval * self.max_attempts.saturating_sub(1)
    }
}

/// What one status report means for the stage being polled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageStep<T> {
    Done(T),
    Failed(String),
    Pending,
}

/// Terminal state of a polled stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Succeeded { value: T, attempts: u32 },
    Failed { reason: String, attempts: u32 },
    TimedOut { attempts: u32 },
    /// The caller's token fired during an inter-poll sleep.
    Cancelled { attempts: u32 },
}

impl<T> PollOutcome<T> {
    pub fn attempts(&self) -> u32 {
        match self {
            PollOutcome::Succeeded { attempts, .. }
            | PollOutcome::Failed { attempts, .. }
            | PollOutcome::TimedOut { attempts }
            | PollOutcome::Cancelled { attempts } => *attempts,
        }
    }
}

/// Classifier for stages whose payload is the task's result URL.
///
/// `finished` without a URL is a provider contract violation and fails the
/// stage. Unknown status strings fail it too.
pub fn require_result_url(status: TaskStatus) -> StageStep<String> {
    match status {
        TaskStatus::Finished {
            result_url: Some(url),
        } => StageStep::Done(url),
        TaskStatus::Finished { result_url: None } => StageStep::Failed(
            "provider reported the task finished but sent no result URL".to_string(),
        ),
        TaskStatus::Error { message } => {
            StageStep::Failed(message.unwrap_or_else(|| "unknown provider error".to_string()))
        }
        TaskStatus::Queued | TaskStatus::Processing => StageStep::Pending,
        TaskStatus::Unrecognized(s) => {
            StageStep::Failed(format!("unrecognized task status '{s}'"))
        }
    }
}

/// Drive one stage until it reaches a terminal state.
///
/// `check` is called with the 1-based attempt number and performs exactly
/// one status read. Transient read failures count as a pending attempt;
/// permanent ones fail the stage. After `policy.max_attempts` checks without
/// a terminal answer the stage times out. No sleep follows the last check.
pub async fn poll_stage<T, F, Fut, C>(
    stage: Stage,
    policy: PollPolicy,
    cancel: &CancellationToken,
    mut check: F,
    mut classify: C,
) -> PollOutcome<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<TaskStatus, ConvertError>>,
    C: FnMut(TaskStatus) -> StageStep<T>,
{
    for attempt in 1..=policy.max_attempts {
        match check(attempt).await {
            Ok(status) => {
                debug!(
                    "{} stage: attempt {}/{} reports '{}'",
                    stage,
                    attempt,
                    policy.max_attempts,
                    status.label()
                );
                match classify(status) {
                    StageStep::Done(value) => {
                        return PollOutcome::Succeeded {
                            value,
                            attempts: attempt,
                        }
                    }
                    StageStep::Failed(reason) => {
                        return PollOutcome::Failed {
                            reason,
                            attempts: attempt,
                        }
                    }
                    StageStep::Pending => {}
                }
            }
            Err(e) if e.is_transient() => {
                warn!(
                    "{} stage: attempt {}/{} status check failed, will retry: {}",
                    stage, attempt, policy.max_attempts, e
                );
            }
            Err(e) => {
                return PollOutcome::Failed {
                    reason: e.to_string(),
                    attempts: attempt,
                }
            }
        }

        if attempt < policy.max_attempts {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return PollOutcome::Cancelled { attempts: attempt };
                }
                _ = sleep(policy.interval) => {}
            }
        }
    }

    PollOutcome::TimedOut {
        attempts: policy.max_attempts,
    }
}
