//! CompletionRecorder - ファイルのレコードを Done に確定する
//!
//! # 学習ポイント
//! - ClaimEngine と同じ CAS ループで「最後に書いた人が勝つ」を防ぐ
//! - 異常（claim なしの完了、二重完了）をエラーではなく結果として返す
//!
//! claim したファイルの処理が終わったら、成功でも失敗でも 1 回呼びます。
//! 失敗したビジネスロジックのリトライは呼び出し側の責任で、ここより前に
//! 済ませること。ここを過ぎたファイルが再び配られることはありません。

use tracing::{debug, error, trace, warn};

use crate::domain::{
    Anomaly, ClaimState, Completion, CompletionStep, FileKey, StatusRecord, decide_completion,
};
use crate::error::{ClaimError, Result};
use crate::ports::KeyValueStore;

/// CompletionRecorder は完了を store に記録する
pub struct CompletionRecorder<S> {
    store: S,
}

impl<S: KeyValueStore> CompletionRecorder<S> {
    /// store から CompletionRecorder を作成
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// `key` を Done にする
    ///
    /// `now` はレコードが存在しないとき（誰も claim していない完了）だけ使う。
    /// それ以外は既存レコードの tries と timestamp をそのまま残す。
    ///
    /// # エラー
    /// - `StoreUnavailable`: store に届かない
    /// - `CorruptRecord`: 保存された値をデコードできない（値は変更しない）
    pub async fn record_outcome(&self, key: &FileKey, now: i64) -> Result<Completion> {
        let mut cas_attempts: u32 = 0;

        'commit: loop {
            let read = self
                .store
                .get(key.as_str())
                .await
                .map_err(ClaimError::store(key.as_str()))?;

            let mut snapshot = match read {
                Some(raw) => raw,
                None => {
                    let synthesized = StatusRecord {
                        state: ClaimState::Done,
                        ..StatusRecord::first_claim(now)
                    }
                    .encode()?;
                    match self
                        .store
                        .put_if_absent(key.as_str(), &synthesized)
                        .await
                        .map_err(ClaimError::store(key.as_str()))?
                    {
                        None => {
                            error!(
                                %key,
                                anomaly = "no_prior_claim",
                                "completed a file that was never claimed through this filter"
                            );
                            return Ok(Completion::Anomalous(Anomaly::NoPriorClaim));
                        }
                        Some(existing) => existing,
                    }
                }
            };

            loop {
                let current = StatusRecord::decode(&snapshot).map_err(|source| {
                    let err = ClaimError::CorruptRecord {
                        key: key.to_string(),
                        raw: snapshot.clone(),
                        source,
                    };
                    error!(%key, error = %err, "cannot record completion on a corrupt record");
                    err
                })?;

                let next = match decide_completion(&current) {
                    CompletionStep::Skip(anomaly) => {
                        warn!(
                            %key,
                            ?anomaly,
                            tries = current.tries,
                            "completion raced with another worker; consider a longer retry timeout"
                        );
                        return Ok(Completion::Anomalous(anomaly));
                    }
                    CompletionStep::Write(next) => next,
                };

                debug_assert!(current.state.can_transition_to(next.state));
                cas_attempts += 1;
                let swapped = self
                    .store
                    .compare_and_swap(key.as_str(), &snapshot, &next.encode()?)
                    .await
                    .map_err(ClaimError::store(key.as_str()))?;
                if swapped {
                    debug!(%key, tries = next.tries, "completion recorded");
                    return Ok(Completion::Recorded);
                }

                trace!(%key, cas_attempts, "lost compare-and-swap race; re-reading");
                match self
                    .store
                    .get(key.as_str())
                    .await
                    .map_err(ClaimError::store(key.as_str()))?
                {
                    Some(fresh) => snapshot = fresh,
                    None => continue 'commit,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::ClaimEngine;
    use crate::domain::{ClaimDecision, ClaimPolicy, KeyPrefix};
    use crate::impls::InMemoryStore;

    fn key(name: &str) -> FileKey {
        KeyPrefix::default().key_for(name)
    }

    async fn stored(store: &InMemoryStore, key: &FileKey) -> StatusRecord {
        let raw = store.get(key.as_str()).await.unwrap().unwrap();
        StatusRecord::decode(&raw).unwrap()
    }

    #[tokio::test]
    async fn claim_then_commit_blocks_later_claims() {
        let store = InMemoryStore::new();
        let engine = ClaimEngine::new(store.clone(), ClaimPolicy::new(60, 3).unwrap());
        let recorder = CompletionRecorder::new(store.clone());
        let key = key("a.csv");

        assert_eq!(engine.try_claim(&key, 0).await.unwrap(), ClaimDecision::Granted);
        assert_eq!(
            recorder.record_outcome(&key, 5).await.unwrap(),
            Completion::Recorded
        );
        assert_eq!(stored(&store, &key).await, StatusRecord {
            state: ClaimState::Done,
            tries: 1,
            last_try_timestamp: 0,
        });
        assert_eq!(
            engine.try_claim(&key, 10).await.unwrap(),
            ClaimDecision::DeniedDone
        );
    }

    #[tokio::test]
    async fn second_commit_is_a_no_op() {
        let store = InMemoryStore::new();
        let recorder = CompletionRecorder::new(store.clone());
        let key = key("a.csv");
        store
            .insert(key.as_str(), &StatusRecord::first_claim(0).encode().unwrap())
            .await;

        assert_eq!(
            recorder.record_outcome(&key, 5).await.unwrap(),
            Completion::Recorded
        );
        let cas_after_first = store.cas_calls().await;
        assert_eq!(
            recorder.record_outcome(&key, 6).await.unwrap(),
            Completion::Anomalous(Anomaly::AlreadyDone)
        );
        assert_eq!(store.cas_calls().await, cas_after_first);
        assert_eq!(stored(&store, &key).await.state, ClaimState::Done);
    }

    #[tokio::test]
    async fn commit_without_claim_writes_done_and_reports_it() {
        let store = InMemoryStore::new();
        let recorder = CompletionRecorder::new(store.clone());
        let key = key("orphan.csv");

        assert_eq!(
            recorder.record_outcome(&key, 42).await.unwrap(),
            Completion::Anomalous(Anomaly::NoPriorClaim)
        );
        assert_eq!(stored(&store, &key).await, StatusRecord {
            state: ClaimState::Done,
            tries: 1,
            last_try_timestamp: 42,
        });
    }

    #[tokio::test]
    async fn rejected_record_stays_rejected() {
        let store = InMemoryStore::new();
        let recorder = CompletionRecorder::new(store.clone());
        let key = key("slow.csv");
        let rejected = StatusRecord {
            state: ClaimState::Rejected,
            tries: 3,
            last_try_timestamp: 122,
        };
        store.insert(key.as_str(), &rejected.encode().unwrap()).await;

        assert_eq!(
            recorder.record_outcome(&key, 200).await.unwrap(),
            Completion::Anomalous(Anomaly::AlreadyRejected)
        );
        assert_eq!(stored(&store, &key).await, rejected);
    }

    #[tokio::test]
    async fn lost_cas_is_retried() {
        let store = InMemoryStore::new();
        let recorder = CompletionRecorder::new(store.clone());
        let key = key("a.csv");
        store
            .insert(key.as_str(), &StatusRecord::first_claim(0).encode().unwrap())
            .await;
        store.lose_next_cas(3).await;

        assert_eq!(
            recorder.record_outcome(&key, 5).await.unwrap(),
            Completion::Recorded
        );
        assert_eq!(store.cas_calls().await, 4);
    }

    #[tokio::test]
    async fn corrupt_record_is_reported_not_overwritten() {
        let store = InMemoryStore::new();
        let recorder = CompletionRecorder::new(store.clone());
        let key = key("a.csv");
        store.insert(key.as_str(), "42").await;

        assert!(matches!(
            recorder.record_outcome(&key, 5).await,
            Err(ClaimError::CorruptRecord { .. })
        ));
        assert_eq!(store.get(key.as_str()).await.unwrap(), Some("42".to_string()));
    }

    #[tokio::test]
    async fn store_outage_propagates() {
        let store = InMemoryStore::new();
        let recorder = CompletionRecorder::new(store.clone());
        store.fail_next(1).await;

        assert!(matches!(
            recorder.record_outcome(&key("a.csv"), 5).await,
            Err(ClaimError::StoreUnavailable { .. })
        ));
    }
}
