//! Status record: the value stored per file key.

use serde::{Deserialize, Serialize};

use super::ClaimState;

/// The value stored under a `FileKey`.
///
/// Pure data. All transition logic lives in `ClaimPolicy` and the app layer.
///
/// Wire form (shared by every worker on one store):
/// `{"status":0,"tries":1,"lastTryTimestamp":1700000000}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    #[serde(rename = "status")]
    pub state: ClaimState,

    /// Number of claim attempts made so far (>= 1).
    pub tries: u32,

    /// Unix seconds of the most recent claim attempt.
    #[serde(rename = "lastTryTimestamp")]
    pub last_try_timestamp: i64,
}

impl StatusRecord {
    /// Record written by the very first claim of a key.
    pub fn first_claim(now: i64) -> Self {
        Self {
            state: ClaimState::InProgress,
            tries: 1,
            last_try_timestamp: now,
        }
    }

    /// Seconds elapsed since the last claim attempt.
    pub fn age(&self, now: i64) -> i64 {
        now.saturating_sub(self.last_try_timestamp)
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn decode(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn encodes_the_shared_wire_layout() {
        let record = StatusRecord {
            state: ClaimState::Done,
            tries: 2,
            last_try_timestamp: 1_700_000_000,
        };
        let v: serde_json::Value = serde_json::from_str(&record.encode().unwrap()).unwrap();
        assert_eq!(v["status"], 1);
        assert_eq!(v["tries"], 2);
        assert_eq!(v["lastTryTimestamp"], 1_700_000_000_i64);
    }

    #[rstest]
    #[case::first_claim(ClaimState::InProgress, 1, 0)]
    #[case::scenario_end(ClaimState::Rejected, 3, 183)]
    #[case::realistic(ClaimState::Done, 2, 1_700_000_000)]
    #[case::negative_timestamp(ClaimState::InProgress, 2, -1)]
    #[case::oldest_timestamp(ClaimState::Rejected, 1, i64::MIN)]
    #[case::max_tries(ClaimState::InProgress, u32::MAX, 61)]
    #[case::max_everything(ClaimState::Done, u32::MAX, i64::MAX)]
    fn decode_restores_every_field(
        #[case] state: ClaimState,
        #[case] tries: u32,
        #[case] last_try_timestamp: i64,
    ) {
        let record = StatusRecord {
            state,
            tries,
            last_try_timestamp,
        };
        let back = StatusRecord::decode(&record.encode().unwrap()).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn decode_accepts_foreign_whitespace_and_field_order() {
        let raw = r#"{ "lastTryTimestamp": 61, "tries": 2, "status": 0 }"#;
        let record = StatusRecord::decode(raw).unwrap();
        assert_eq!(record, StatusRecord {
            state: ClaimState::InProgress,
            tries: 2,
            last_try_timestamp: 61,
        });
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(StatusRecord::decode("not json").is_err());
        assert!(StatusRecord::decode(r#"{"status":9,"tries":1,"lastTryTimestamp":0}"#).is_err());
        assert!(StatusRecord::decode(r#"{"status":0}"#).is_err());
    }

    #[test]
    fn age_is_measured_in_seconds() {
        let record = StatusRecord::first_claim(100);
        assert_eq!(record.age(160), 60);
        assert_eq!(record.age(90), -10);
    }
}
