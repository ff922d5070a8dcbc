//! InMemoryStore - プロセス内の key/value store（テスト用）
//!
//! # 学習ポイント
//! - 1 つの tokio `Mutex` を各操作の間だけ保持して atomic にする
//! - 障害注入（outage, CAS の敗北）でリトライ経路をテストする
//! - Clone したハンドル同士で同じ状態を共有する（Arc<Mutex<_>>）

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::ports::KeyValueStore;

#[derive(Default)]
struct InMemoryStoreState {
    entries: HashMap<String, String>,

    /// Fail this many upcoming operations with `StoreError::Unavailable`.
    fail_next: usize,

    /// Make this many upcoming CAS calls lose, as if another worker wrote first.
    lose_next_cas: usize,

    /// Number of CAS calls seen (won or lost).
    cas_calls: usize,
}

impl InMemoryStoreState {
    fn check_available(&mut self) -> Result<(), StoreError> {
        if self.fail_next > 0 {
            self.fail_next -= 1;
            return Err(StoreError::Unavailable("injected outage".to_string()));
        }
        Ok(())
    }
}

/// InMemoryStore は単一プロセス用の KeyValueStore
///
/// # 使用例
/// ```ignore
/// let store = InMemoryStore::new();
/// store.lose_next_cas(2).await;
/// let filter = ClaimFilterBuilder::new(store.clone()).build()?;
/// ```
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<InMemoryStoreState>>,
}

impl InMemoryStore {
    /// 空の InMemoryStore を作成
    pub fn new() -> Self {
        Self::default()
    }

    /// 値を無条件に書き込む（初期データ投入・テスト用）
    pub async fn insert(&self, key: &str, value: &str) {
        let mut state = self.state.lock().await;
        state.entries.insert(key.to_string(), value.to_string());
    }

    /// キーを削除する（claim プロトコル外の後始末）
    pub async fn remove(&self, key: &str) -> Option<String> {
        let mut state = self.state.lock().await;
        state.entries.remove(key)
    }

    /// 保存されているキーの数
    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.entries.is_empty()
    }

    /// 次の `n` 回の操作を、store に届かないかのように失敗させる
    pub async fn fail_next(&self, n: usize) {
        self.state.lock().await.fail_next = n;
    }

    /// 次の `n` 回の compare-and-swap を、競合に負けたことにする
    pub async fn lose_next_cas(&self, n: usize) {
        self.state.lock().await.lose_next_cas = n;
    }

    /// これまでの compare-and-swap 呼び出し回数（勝ち負けを問わない）
    pub async fn cas_calls(&self) -> usize {
        self.state.lock().await.cas_calls
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut state = self.state.lock().await;
        state.check_available()?;
        Ok(state.entries.get(key).cloned())
    }

    async fn put_if_absent(&self, key: &str, value: &str) -> Result<Option<String>, StoreError> {
        let mut state = self.state.lock().await;
        state.check_available()?;
        if let Some(existing) = state.entries.get(key) {
            return Ok(Some(existing.clone()));
        }
        state.entries.insert(key.to_string(), value.to_string());
        Ok(None)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        new: &str,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        state.check_available()?;
        state.cas_calls += 1;
        if state.lose_next_cas > 0 {
            state.lose_next_cas -= 1;
            return Ok(false);
        }
        match state.entries.get_mut(key) {
            Some(current) if current == expected => {
                *current = new.to_string();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
