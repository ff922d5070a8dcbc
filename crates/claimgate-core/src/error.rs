//! Error types for claimgate-core.
//!
//! CAS contention is not an error and never shows up here: the engine and
//! the recorder retry it internally.

use thiserror::Error;

/// Failure reported by a `KeyValueStore` adapter.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Transport or connectivity failure talking to the store.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ClaimError {
    #[error("store unavailable while operating on key={key}: {source}")]
    StoreUnavailable {
        key: String,
        #[source]
        source: StoreError,
    },

    /// The stored value for `key` does not decode into a status record.
    #[error("corrupt status record at key={key}: {source} (raw={raw:?})")]
    CorruptRecord {
        key: String,
        raw: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode status record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ClaimError {
    pub(crate) fn store(key: &str) -> impl FnOnce(StoreError) -> ClaimError + '_ {
        move |source| ClaimError::StoreUnavailable {
            key: key.to_string(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClaimError>;
