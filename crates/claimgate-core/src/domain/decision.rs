//! Decision model: what a worker may do with a file, given the record it observed.
//!
//! The functions here are pure: given a snapshot and the current time they
//! return the next step without touching the store. Executing the step
//! (the compare-and-swap) is the job of `app::claim` and `app::completion`,
//! which re-run the decision from scratch whenever their write loses a race.

use serde::{Deserialize, Serialize};

use super::{ClaimState, StatusRecord};
use crate::error::{ClaimError, Result};

/// Answer of a claim attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClaimDecision {
    /// This worker owns the file until the retry timeout elapses.
    Granted,

    /// Someone already finished the file.
    DeniedDone,

    /// Another worker plausibly still owns the file.
    DeniedInProgress,

    /// The retry budget is exhausted.
    DeniedRejected,
}

impl ClaimDecision {
    pub fn is_granted(self) -> bool {
        matches!(self, ClaimDecision::Granted)
    }
}

impl std::fmt::Display for ClaimDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ClaimDecision::Granted => "granted",
            ClaimDecision::DeniedDone => "denied_done",
            ClaimDecision::DeniedInProgress => "denied_in_progress",
            ClaimDecision::DeniedRejected => "denied_rejected",
        };
        write!(f, "{s}")
    }
}

/// Next step for the claim engine after observing an existing record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimStep {
    /// Answer without writing anything.
    Deny(ClaimDecision),

    /// Replace the observed record with this one (conditionally).
    Write(StatusRecord),
}

impl ClaimStep {
    /// Decision to report once a `Write` step has been applied.
    pub fn written_decision(next: &StatusRecord) -> ClaimDecision {
        match next.state {
            ClaimState::InProgress => ClaimDecision::Granted,
            _ => ClaimDecision::DeniedRejected,
        }
    }
}

/// Retry/timeout policy for claims.
///
/// - A claim younger than `retry_timeout_secs` is left alone.
/// - A stale claim is taken over while `tries < max_tries`.
/// - A stale claim with `tries >= max_tries` is rejected for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimPolicy {
    retry_timeout_secs: i64,
    max_tries: u32,
}

impl ClaimPolicy {
    pub fn new(retry_timeout_secs: u64, max_tries: u32) -> Result<Self> {
        if max_tries == 0 {
            return Err(ClaimError::InvalidConfig(
                "max_tries must be at least 1".to_string(),
            ));
        }
        let retry_timeout_secs = i64::try_from(retry_timeout_secs).map_err(|_| {
            ClaimError::InvalidConfig(format!(
                "retry_timeout_secs={retry_timeout_secs} is out of range"
            ))
        })?;
        Ok(Self {
            retry_timeout_secs,
            max_tries,
        })
    }

    pub fn retry_timeout_secs(&self) -> i64 {
        self.retry_timeout_secs
    }

    pub fn max_tries(&self) -> u32 {
        self.max_tries
    }

    /// Has the claim recorded in `current` outlived the retry timeout?
    pub fn is_stale(&self, current: &StatusRecord, now: i64) -> bool {
        current.age(now) >= self.retry_timeout_secs
    }

    /// Decide what to do with an existing record.
    pub fn decide(&self, current: &StatusRecord, now: i64) -> ClaimStep {
        match current.state {
            ClaimState::Done => ClaimStep::Deny(ClaimDecision::DeniedDone),
            ClaimState::Rejected => ClaimStep::Deny(ClaimDecision::DeniedRejected),
            ClaimState::InProgress if !self.is_stale(current, now) => {
                ClaimStep::Deny(ClaimDecision::DeniedInProgress)
            }
            ClaimState::InProgress if current.tries >= self.max_tries => {
                ClaimStep::Write(StatusRecord {
                    state: ClaimState::Rejected,
                    ..*current
                })
            }
            ClaimState::InProgress => ClaimStep::Write(StatusRecord {
                state: ClaimState::InProgress,
                tries: current.tries.saturating_add(1),
                last_try_timestamp: now,
            }),
        }
    }
}

/// Something unusual observed while recording a completion.
///
/// Not a failure. It points at a tuning problem (retry timeout shorter than
/// real processing time) or a wiring problem upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Anomaly {
    /// The file was completed but no claim record existed for it.
    NoPriorClaim,

    /// A racing worker had already marked the file done.
    AlreadyDone,

    /// The claim was rejected (budget exhausted) while this worker was still processing.
    AlreadyRejected,
}

/// Result of recording an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Completion {
    /// The record moved to Done.
    Recorded,

    /// Finished, but worth an operator's attention.
    Anomalous(Anomaly),
}

/// Next step for the completion recorder after observing a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStep {
    /// Nothing to write; report the anomaly.
    Skip(Anomaly),

    Write(StatusRecord),
}

/// Decide how to finalize `current`. Tries and timestamp are preserved.
pub fn decide_completion(current: &StatusRecord) -> CompletionStep {
    match current.state {
        ClaimState::Done => CompletionStep::Skip(Anomaly::AlreadyDone),
        ClaimState::Rejected => CompletionStep::Skip(Anomaly::AlreadyRejected),
        ClaimState::InProgress => CompletionStep::Write(StatusRecord {
            state: ClaimState::Done,
            ..*current
        }),
    }
}
