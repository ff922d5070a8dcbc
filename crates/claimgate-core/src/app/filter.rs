//! ClaimFilter - ポーリングループが呼び出すファサード
//!
//! # 学習ポイント
//! - ClaimEngine と CompletionRecorder を 2 つの操作（取る？ / 終わった）にまとめる
//! - ローカルなロックを持たない並行安全性（判断は呼び出しごとのスタック上、
//!   共有状態は store だけ）
//! - `#[instrument]` による span への worker / file の付与
//!
//! # 使用例
//! ```ignore
//! let filter = ClaimFilterBuilder::new(store).config(config).build()?;
//!
//! for file in filter.filter_batch(discovered).await? {
//!     let result = process(&file).await;
//!     // success or failure alike
//!     filter.on_outcome(&file).await?;
//! }
//! ```
//!
//! 同一プロセスの複数タスクから共有してよい。キーが違う呼び出し同士は
//! 互いを待たない。同じキーへの同時呼び出しは store の compare-and-swap が
//! 順序づける。呼び出しをまたいでレコードをキャッシュすることはない。

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::{ClaimEngine, CompletionRecorder};
use crate::domain::{
    CandidateFile, ClaimDecision, ClaimPolicy, Completion, FileKey, KeyPrefix, StatusRecord,
    WorkerId,
};
use crate::error::{ClaimError, Result};
use crate::observability::ClaimCounts;
use crate::ports::{Clock, KeyValueStore};

/// 1 バッチ分の評価結果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    /// 許可されたファイル（入力順、1 サイクルの上限を超えない）
    pub accepted: Vec<CandidateFile>,
    pub counts: ClaimCounts,
}

/// ClaimFilter はポーリングループの入口
///
/// # 操作
/// - `should_accept` / `claim`: このワーカーがファイルを今処理してよいか
/// - `on_outcome`: 処理が終わったことを記録（成功・失敗を問わない）
/// - `filter_batch` / `evaluate_batch`: 候補リストをまとめて評価
/// - `status`: store 上の現在のレコードを読む
pub struct ClaimFilter<S, C> {
    worker: WorkerId,
    prefix: KeyPrefix,
    store: Arc<S>,
    engine: ClaimEngine<Arc<S>>,
    recorder: CompletionRecorder<Arc<S>>,
    clock: C,
    max_accepted_per_cycle: Option<usize>,
}

impl<S: KeyValueStore, C: Clock> ClaimFilter<S, C> {
    pub(crate) fn new(
        worker: WorkerId,
        prefix: KeyPrefix,
        store: Arc<S>,
        policy: ClaimPolicy,
        clock: C,
        max_accepted_per_cycle: Option<usize>,
    ) -> Self {
        Self {
            worker,
            prefix,
            engine: ClaimEngine::new(Arc::clone(&store), policy),
            recorder: CompletionRecorder::new(Arc::clone(&store)),
            store,
            clock,
            max_accepted_per_cycle,
        }
    }

    /// このフィルタのワーカー ID（ログの相関用）
    pub fn worker_id(&self) -> WorkerId {
        self.worker
    }

    /// 判断に使うリトライ方針
    pub fn policy(&self) -> &ClaimPolicy {
        self.engine.policy()
    }

    /// 1 サイクルで許可するファイル数の上限
    pub fn max_accepted_per_cycle(&self) -> Option<usize> {
        self.max_accepted_per_cycle
    }

    /// ファイルの store 上のキー（`<prefix><name>`）
    pub fn key_for(&self, file: &CandidateFile) -> FileKey {
        self.prefix.key_for(&file.name)
    }

    /// このワーカーが `file` を今処理してよいか（Granted のときだけ true）
    pub async fn should_accept(&self, file: &CandidateFile) -> Result<bool> {
        Ok(self.claim(file).await?.is_granted())
    }

    /// `file` を claim して、判断の詳細を返す
    #[instrument(level = "debug", skip_all, fields(worker = %self.worker, file = %file.name))]
    pub async fn claim(&self, file: &CandidateFile) -> Result<ClaimDecision> {
        let key = self.key_for(file);
        self.engine.try_claim(&key, self.clock.unix_seconds()).await
    }

    /// `file` の処理が終わったことを記録
    ///
    /// 許可されたファイルごとに 1 回、成功時も失敗時も呼ぶこと。
    #[instrument(level = "debug", skip_all, fields(worker = %self.worker, file = %file.name))]
    pub async fn on_outcome(&self, file: &CandidateFile) -> Result<Completion> {
        let key = self.key_for(file);
        self.recorder
            .record_outcome(&key, self.clock.unix_seconds())
            .await
    }

    /// 候補を順に claim し、許可されたものを返す
    ///
    /// 上限に達したら claim をやめるので、このサイクルで処理しない
    /// ファイルに claim を残さない。
    pub async fn filter_batch(
        &self,
        files: impl IntoIterator<Item = CandidateFile>,
    ) -> Result<Vec<CandidateFile>> {
        Ok(self.evaluate_batch(files).await?.accepted)
    }

    /// `filter_batch` と同じ。判断ごとの件数も返す
    ///
    /// # エラー
    /// store の失敗でバッチは中断する。それまでに許可されたファイルは
    /// claim されたまま残り、リトライタイムアウト後に再び取り合いになる。
    #[instrument(level = "debug", skip_all, fields(worker = %self.worker))]
    pub async fn evaluate_batch(
        &self,
        files: impl IntoIterator<Item = CandidateFile>,
    ) -> Result<BatchReport> {
        let mut report = BatchReport::default();
        let mut files = files.into_iter();

        for file in files.by_ref() {
            let decision = self.claim(&file).await?;
            report.counts.record(decision);
            if decision.is_granted() {
                report.accepted.push(file);
                if self
                    .max_accepted_per_cycle
                    .is_some_and(|cap| report.accepted.len() >= cap)
                {
                    break;
                }
            }
        }
        report.counts.not_evaluated = files.count();

        debug!(
            accepted = report.accepted.len(),
            evaluated = report.counts.evaluated(),
            not_evaluated = report.counts.not_evaluated,
            "batch evaluated"
        );
        Ok(report)
    }

    /// `file` の現在のレコードを store から直接読む
    ///
    /// 壊れたレコードは `ClaimError::CorruptRecord` として返す。
    pub async fn status(&self, file: &CandidateFile) -> Result<Option<StatusRecord>> {
        let key = self.key_for(file);
        let Some(raw) = self
            .store
            .get(key.as_str())
            .await
            .map_err(ClaimError::store(key.as_str()))?
        else {
            return Ok(None);
        };
        StatusRecord::decode(&raw)
            .map(Some)
            .map_err(|source| ClaimError::CorruptRecord {
                key: key.to_string(),
                raw,
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use super::*;
    use crate::app::ClaimFilterBuilder;
    use crate::config::FilterConfig;
    use crate::domain::{Anomaly, ClaimState};
    use crate::error::StoreError;
    use crate::impls::InMemoryStore;
    use crate::ports::FixedClock;

    fn filter(
        store: &InMemoryStore,
        clock: &FixedClock,
        cap: Option<usize>,
    ) -> ClaimFilter<InMemoryStore, FixedClock> {
        ClaimFilterBuilder::new(store.clone())
            .config(FilterConfig {
                max_accepted_per_cycle: cap,
                ..FilterConfig::default()
            })
            .clock(clock.clone())
            .build()
            .unwrap()
    }

    fn files(names: &[&str]) -> Vec<CandidateFile> {
        names.iter().map(|n| CandidateFile::new(*n)).collect()
    }

    #[tokio::test]
    async fn accept_process_commit_cycle() {
        let store = InMemoryStore::new();
        let clock = FixedClock::from_unix_seconds(0);
        let worker_a = filter(&store, &clock, None);
        let worker_b = filter(&store, &clock, None);
        let file = CandidateFile::new("a.csv");

        assert!(worker_a.should_accept(&file).await.unwrap());
        assert!(!worker_b.should_accept(&file).await.unwrap());

        clock.set(5);
        assert_eq!(worker_a.on_outcome(&file).await.unwrap(), Completion::Recorded);

        clock.set(10);
        assert_eq!(
            worker_b.claim(&file).await.unwrap(),
            ClaimDecision::DeniedDone
        );
        assert_eq!(
            worker_b.status(&file).await.unwrap().map(|r| r.state),
            Some(ClaimState::Done)
        );
    }

    #[tokio::test]
    async fn crashed_worker_is_taken_over_after_timeout() {
        let store = InMemoryStore::new();
        let clock = FixedClock::from_unix_seconds(1_000);
        let crashed = filter(&store, &clock, None);
        let survivor = filter(&store, &clock, None);
        let file = CandidateFile::new("a.csv");

        assert!(crashed.should_accept(&file).await.unwrap());
        drop(crashed);

        clock.advance(59);
        assert!(!survivor.should_accept(&file).await.unwrap());
        clock.advance(2);
        assert!(survivor.should_accept(&file).await.unwrap());
        assert_eq!(survivor.status(&file).await.unwrap().unwrap().tries, 2);
    }

    #[tokio::test]
    async fn on_outcome_twice_is_safe() {
        let store = InMemoryStore::new();
        let clock = FixedClock::from_unix_seconds(0);
        let filter = filter(&store, &clock, None);
        let file = CandidateFile::new("a.csv");

        filter.should_accept(&file).await.unwrap();
        assert_eq!(filter.on_outcome(&file).await.unwrap(), Completion::Recorded);
        assert_eq!(
            filter.on_outcome(&file).await.unwrap(),
            Completion::Anomalous(Anomaly::AlreadyDone)
        );
    }

    #[tokio::test]
    async fn batch_is_truncated_at_the_cap_without_extra_claims() {
        let store = InMemoryStore::new();
        let clock = FixedClock::from_unix_seconds(0);
        let filter = filter(&store, &clock, Some(2));

        let report = filter
            .evaluate_batch(files(&["a", "b", "c", "d"]))
            .await
            .unwrap();
        assert_eq!(report.accepted, files(&["a", "b"]));
        assert_eq!(report.counts.granted, 2);
        assert_eq!(report.counts.not_evaluated, 2);
        assert_eq!(store.len().await, 2);

        let next = filter
            .filter_batch(files(&["a", "b", "c", "d"]))
            .await
            .unwrap();
        assert_eq!(next, files(&["c", "d"]));
    }

    #[tokio::test]
    async fn batch_skips_files_owned_elsewhere() {
        let store = InMemoryStore::new();
        let clock = FixedClock::from_unix_seconds(0);
        let other = filter(&store, &clock, None);
        let filter = filter(&store, &clock, None);

        other.should_accept(&CandidateFile::new("b")).await.unwrap();
        let report = filter.evaluate_batch(files(&["a", "b", "c"])).await.unwrap();
        assert_eq!(report.accepted, files(&["a", "c"]));
        assert_eq!(report.counts.denied_in_progress, 1);
        assert_eq!(report.counts.not_evaluated, 0);
    }

    #[tokio::test]
    async fn prefixes_isolate_filters_on_one_store() {
        let store = InMemoryStore::new();
        let clock = FixedClock::from_unix_seconds(0);
        let build = |prefix: &str| {
            ClaimFilterBuilder::new(store.clone())
                .config(FilterConfig {
                    key_prefix: prefix.to_string(),
                    ..FilterConfig::default()
                })
                .clock(clock.clone())
                .build()
                .unwrap()
        };
        let archive = build("archive:");
        let billing = build("billing:");
        let file = CandidateFile::new("a.csv");

        assert!(archive.should_accept(&file).await.unwrap());
        assert!(billing.should_accept(&file).await.unwrap());
    }

    #[tokio::test]
    async fn store_outage_reaches_the_poller() {
        let store = InMemoryStore::new();
        let clock = FixedClock::from_unix_seconds(0);
        let filter = filter(&store, &clock, None);
        store.fail_next(1).await;

        assert!(matches!(
            filter.evaluate_batch(files(&["a", "b"])).await,
            Err(ClaimError::StoreUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn corrupt_status_is_an_error_for_inspection() {
        let store = InMemoryStore::new();
        let clock = FixedClock::from_unix_seconds(0);
        let filter = filter(&store, &clock, None);
        let file = CandidateFile::new("a.csv");
        store.insert(filter.key_for(&file).as_str(), "oops").await;

        assert!(!filter.should_accept(&file).await.unwrap());
        assert!(matches!(
            filter.status(&file).await,
            Err(ClaimError::CorruptRecord { .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn shared_filter_grants_each_file_once() {
        let store = InMemoryStore::new();
        let clock = FixedClock::from_unix_seconds(0);
        let filter = Arc::new(filter(&store, &clock, None));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let filter = Arc::clone(&filter);
            handles.push(tokio::spawn(async move {
                filter
                    .filter_batch(files(&["a", "b", "c", "d", "e"]))
                    .await
                    .unwrap()
                    .len()
            }));
        }
        let mut total = 0;
        for h in handles {
            total += h.await.unwrap();
        }
        assert_eq!(total, 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn workers_on_a_shared_directory_split_the_inbox() {
        let dir = tempfile::tempdir().unwrap();
        let names: Vec<String> = (0..20).map(|i| format!("file-{i:02}.csv")).collect();

        let mut handles = Vec::new();
        for _ in 0..4 {
            // One store handle per worker, as separate processes would have.
            let filter = ClaimFilterBuilder::new(crate::impls::FsStore::new(dir.path()))
                .build()
                .unwrap();
            let candidates: Vec<CandidateFile> =
                names.iter().map(|n| CandidateFile::new(n.clone())).collect();
            handles.push(tokio::spawn(async move {
                let accepted = filter.filter_batch(candidates).await.unwrap();
                for file in &accepted {
                    assert_eq!(filter.on_outcome(file).await.unwrap(), Completion::Recorded);
                }
                accepted
            }));
        }

        let mut all: Vec<String> = Vec::new();
        for h in handles {
            all.extend(h.await.unwrap().into_iter().map(|f| f.name));
        }
        all.sort();
        assert_eq!(all, names);
    }

    /// Holds `put_if_absent` for keys ending in `held.csv` until released.
    struct HeldStore {
        inner: InMemoryStore,
        entered: Arc<Notify>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl KeyValueStore for HeldStore {
        async fn get(&self, key: &str) -> std::result::Result<Option<String>, StoreError> {
            self.inner.get(key).await
        }

        async fn put_if_absent(
            &self,
            key: &str,
            value: &str,
        ) -> std::result::Result<Option<String>, StoreError> {
            if key.ends_with("held.csv") {
                self.entered.notify_one();
                self.release.notified().await;
            }
            self.inner.put_if_absent(key, value).await
        }

        async fn compare_and_swap(
            &self,
            key: &str,
            expected: &str,
            new: &str,
        ) -> std::result::Result<bool, StoreError> {
            self.inner.compare_and_swap(key, expected, new).await
        }
    }

    #[tokio::test]
    async fn slow_store_call_on_one_key_does_not_hold_up_another() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let store = HeldStore {
            inner: InMemoryStore::new(),
            entered: Arc::clone(&entered),
            release: Arc::clone(&release),
        };
        let filter = Arc::new(ClaimFilterBuilder::new(store).build().unwrap());

        let held = tokio::spawn({
            let filter = Arc::clone(&filter);
            async move { filter.claim(&CandidateFile::new("held.csv")).await.unwrap() }
        });
        entered.notified().await;

        let other = tokio::time::timeout(
            Duration::from_secs(1),
            filter.claim(&CandidateFile::new("other.csv")),
        )
        .await
        .expect("claim on another key waited for the held store call")
        .unwrap();
        assert_eq!(other, ClaimDecision::Granted);

        release.notify_one();
        assert_eq!(held.await.unwrap(), ClaimDecision::Granted);
    }
}
