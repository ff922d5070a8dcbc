//! Candidate files handed in by the discovery side.

use serde::{Deserialize, Serialize};

/// A file discovered by a poll cycle.
///
/// Only `name` matters to the claim protocol. `last_modified` is carried for
/// callers that want to order or pre-filter candidates themselves.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CandidateFile {
    /// Stable identifying name (identical on every worker).
    pub name: String,

    /// Unix seconds, when the source exposes it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<i64>,
}

impl CandidateFile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            last_modified: None,
        }
    }

    pub fn with_last_modified(mut self, ts: i64) -> Self {
        self.last_modified = Some(ts);
        self
    }
}
