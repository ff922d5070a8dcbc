//! Claim state machine for a single file key.

use serde::{Deserialize, Serialize};

/// State of a status record.
///
/// State transitions:
/// - InProgress -> InProgress (stale claim taken over, tries + 1)
/// - InProgress -> Done
/// - InProgress -> Rejected (retry budget exhausted)
///
/// Done and Rejected are terminal. The wire form is a small integer so
/// workers of different versions sharing one store agree on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ClaimState {
    /// Some worker holds (or held, if it crashed) a claim on the file.
    InProgress,

    /// Processing finished; nobody may claim the file again.
    Done,

    /// Retry budget exhausted; the file is ignored from now on.
    Rejected,
}

impl ClaimState {
    pub const fn code(self) -> u8 {
        match self {
            ClaimState::InProgress => 0,
            ClaimState::Done => 1,
            ClaimState::Rejected => 2,
        }
    }

    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, ClaimState::Done | ClaimState::Rejected)
    }

    /// Can a record move from `self` to `to`?
    pub fn can_transition_to(self, to: ClaimState) -> bool {
        use ClaimState::*;
        matches!(
            (self, to),
            (InProgress, InProgress) | (InProgress, Done) | (InProgress, Rejected)
        )
    }
}

impl From<ClaimState> for u8 {
    fn from(state: ClaimState) -> Self {
        state.code()
    }
}

impl TryFrom<u8> for ClaimState {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(ClaimState::InProgress),
            1 => Ok(ClaimState::Done),
            2 => Ok(ClaimState::Rejected),
            other => Err(format!("unknown claim state code {other}")),
        }
    }
}

impl std::fmt::Display for ClaimState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ClaimState::InProgress => "in_progress",
            ClaimState::Done => "done",
            ClaimState::Rejected => "rejected",
        };
        write!(f, "{s}")
    }
}
