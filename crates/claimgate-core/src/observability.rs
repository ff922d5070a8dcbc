//! Tracing setup and per-batch decision counts.

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use crate::domain::ClaimDecision;

/// Initializes a `tracing_subscriber` using `CLAIMGATE_LOG` first, then `RUST_LOG`, then `info`.
///
/// Log field contract:
/// - `worker` on every filter-level event.
/// - `key` on every claim or completion event.
/// - `tries` whenever a record is written.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_target(false)
        .try_init();
}

pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env("CLAIMGATE_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// How the candidates of one batch poll were decided.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimCounts {
    pub granted: usize,
    pub denied_done: usize,
    pub denied_in_progress: usize,
    pub denied_rejected: usize,

    /// Candidates never claimed this cycle because the cap was reached
    /// before their turn. Their state is unknown; they may be free or not.
    pub not_evaluated: usize,
}

impl ClaimCounts {
    pub fn record(&mut self, decision: ClaimDecision) {
        match decision {
            ClaimDecision::Granted => self.granted += 1,
            ClaimDecision::DeniedDone => self.denied_done += 1,
            ClaimDecision::DeniedInProgress => self.denied_in_progress += 1,
            ClaimDecision::DeniedRejected => self.denied_rejected += 1,
        }
    }

    pub fn evaluated(&self) -> usize {
        self.granted + self.denied_done + self.denied_in_progress + self.denied_rejected
    }
}
