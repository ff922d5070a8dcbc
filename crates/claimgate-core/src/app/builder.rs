//! ClaimFilterBuilder - ClaimFilter の構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装（型パラメータで Clock を差し替える）
//! - 起動時検証（Fail-fast 設計）
//! - テスト容易性（FixedClock と固定 WorkerId の注入）

use std::sync::Arc;

use tracing::info;

use super::ClaimFilter;
use crate::config::FilterConfig;
use crate::domain::WorkerId;
use crate::error::Result;
use crate::ports::{Clock, IdGenerator, KeyValueStore, SystemClock, UlidGenerator};

/// ClaimFilterBuilder は ClaimFilter を構築
///
/// # 使用例
/// ```ignore
/// let filter = ClaimFilterBuilder::new(FsStore::new("/shared/claims"))
///     .config(FilterConfig::from_toml_file("claimgate.toml")?.apply_env_overrides()?)
///     .build()?;
/// ```
///
/// # Fail-fast 設計
/// - build() 時に設定を検証する
/// - 不正な設定は `ClaimError::InvalidConfig` を返す
/// - 構築できた ClaimFilter は常に使える
pub struct ClaimFilterBuilder<S, C = SystemClock> {
    store: Arc<S>,
    config: FilterConfig,
    clock: C,
    worker: Option<WorkerId>,
}

impl<S: KeyValueStore> ClaimFilterBuilder<S, SystemClock> {
    /// store を受け取って新しい builder を作成
    pub fn new(store: S) -> Self {
        Self::from_shared(Arc::new(store))
    }

    /// 他のコンポーネントと共有している store ハンドルを使う
    pub fn from_shared(store: Arc<S>) -> Self {
        Self {
            store,
            config: FilterConfig::default(),
            clock: SystemClock,
            worker: None,
        }
    }
}

impl<S: KeyValueStore, C: Clock + Clone> ClaimFilterBuilder<S, C> {
    /// フィルタ設定を指定（省略時は `FilterConfig::default()`）
    pub fn config(mut self, config: FilterConfig) -> Self {
        self.config = config;
        self
    }

    /// Clock を差し替え（テストでは FixedClock を使う）
    pub fn clock<C2: Clock + Clone>(self, clock: C2) -> ClaimFilterBuilder<S, C2> {
        ClaimFilterBuilder {
            store: self.store,
            config: self.config,
            clock,
            worker: self.worker,
        }
    }

    /// WorkerId を生成せずに固定する
    pub fn worker_id(mut self, worker: WorkerId) -> Self {
        self.worker = Some(worker);
        self
    }

    /// 設定を検証して ClaimFilter を生成
    ///
    /// # 検証
    /// - `FilterConfig::validate()` と `ClaimPolicy::new()` のチェック
    /// - WorkerId が未指定なら UlidGenerator で生成
    pub fn build(self) -> Result<ClaimFilter<S, C>> {
        self.config.validate()?;
        let policy = self.config.policy()?;
        let worker = self
            .worker
            .unwrap_or_else(|| UlidGenerator::new(self.clock.clone()).generate_worker_id());

        info!(
            %worker,
            key_prefix = %self.config.key_prefix,
            retry_timeout_secs = policy.retry_timeout_secs(),
            max_tries = policy.max_tries(),
            max_accepted_per_cycle = ?self.config.max_accepted_per_cycle,
            "claim filter ready"
        );

        Ok(ClaimFilter::new(
            worker,
            self.config.key_prefix(),
            self.store,
            policy,
            self.clock,
            self.config.max_accepted_per_cycle,
        ))
    }
}
