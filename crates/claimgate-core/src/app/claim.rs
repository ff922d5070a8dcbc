//! ClaimEngine - このワーカーがファイルを処理してよいかを決める
//!
//! # 学習ポイント
//! - 楽観的並行制御（ロックではなく compare-and-swap のリトライループ）
//! - 純粋な判断（`ClaimPolicy::decide`）と、それを適用する副作用の分離
//! - ラベル付き loop による「最初からやり直し」
//!
//! # 流れ
//! 1. 新しい `InProgress` レコード（tries = 1）を `put_if_absent` する。
//!    保存できたら誰もこのファイルを見ていない: Granted
//! 2. 既にあれば、そのレコードを `ClaimPolicy::decide` で判断する
//! 3. 書き込む判断なら、判断に使ったスナップショットそのものを条件に
//!    `compare_and_swap` する。負けたら誰かが書き換えたので、読み直して
//!    最初から判断し直す

use tracing::{debug, error, info, trace, warn};

use crate::domain::{ClaimDecision, ClaimPolicy, ClaimStep, FileKey, StatusRecord};
use crate::error::{ClaimError, Result};
use crate::ports::KeyValueStore;

/// ClaimEngine は claim の判断と書き込みを行う
pub struct ClaimEngine<S> {
    store: S,
    policy: ClaimPolicy,
}

impl<S: KeyValueStore> ClaimEngine<S> {
    /// store とリトライ方針から ClaimEngine を作成
    pub fn new(store: S, policy: ClaimPolicy) -> Self {
        Self { store, policy }
    }

    /// リトライ方針
    pub fn policy(&self) -> &ClaimPolicy {
        &self.policy
    }

    /// unix 時刻 `now` に `key` の claim を試みる
    ///
    /// # エラー
    /// store の障害だけをエラーとして返す。デコードできないレコードは
    /// ログに残して `DeniedInProgress` と答え、値には触らない
    /// （1 つの壊れたキーでポーリングサイクル全体を止めない）。
    pub async fn try_claim(&self, key: &FileKey, now: i64) -> Result<ClaimDecision> {
        let candidate = StatusRecord::first_claim(now).encode()?;
        let mut cas_attempts: u32 = 0;

        'claim: loop {
            let existing = self
                .store
                .put_if_absent(key.as_str(), &candidate)
                .await
                .map_err(ClaimError::store(key.as_str()))?;

            let Some(mut snapshot) = existing else {
                debug!(%key, tries = 1, "first claim granted");
                return Ok(ClaimDecision::Granted);
            };

            loop {
                let current = match StatusRecord::decode(&snapshot) {
                    Ok(record) => record,
                    Err(source) => {
                        let err = ClaimError::CorruptRecord {
                            key: key.to_string(),
                            raw: snapshot,
                            source,
                        };
                        error!(%key, error = %err, "corrupt status record; leaving it for an operator");
                        return Ok(ClaimDecision::DeniedInProgress);
                    }
                };

                let next = match self.policy.decide(&current, now) {
                    ClaimStep::Deny(decision) => {
                        debug!(
                            %key,
                            state = %current.state,
                            tries = current.tries,
                            age_secs = current.age(now),
                            %decision,
                            "claim denied"
                        );
                        return Ok(decision);
                    }
                    ClaimStep::Write(next) => next,
                };

                debug_assert!(current.state.can_transition_to(next.state));
                let encoded = next.encode()?;
                cas_attempts += 1;
                let swapped = self
                    .store
                    .compare_and_swap(key.as_str(), &snapshot, &encoded)
                    .await
                    .map_err(ClaimError::store(key.as_str()))?;

                if swapped {
                    let decision = ClaimStep::written_decision(&next);
                    if next.state.is_terminal() {
                        warn!(
                            %key,
                            tries = next.tries,
                            max_tries = self.policy.max_tries(),
                            "retry budget exhausted; file rejected"
                        );
                    } else {
                        info!(
                            %key,
                            tries = next.tries,
                            stale_for_secs = current.age(now),
                            "took over stale claim"
                        );
                    }
                    return Ok(decision);
                }

                trace!(%key, cas_attempts, "lost compare-and-swap race; re-reading");
                match self
                    .store
                    .get(key.as_str())
                    .await
                    .map_err(ClaimError::store(key.as_str()))?
                {
                    Some(fresh) => snapshot = fresh,
                    None => {
                        debug!(%key, "record vanished during claim; starting over");
                        continue 'claim;
                    }
                }
            }
        }
    }
}
