//! KeyValueStore port - 全ワーカーが協調に使う共有 store（正本）
//!
//! # 実装
//! - **InMemoryStore**: 単一プロセス・テスト用
//! - **FsStore**: 複数プロセスが共有するディレクトリ
//!
//! ネットワーク越しの store（Redis, etcd, DB のテーブルなど）も、
//! 同じ 3 つのプリミティブを実装すれば差し込めます。

use async_trait::async_trait;

use crate::error::StoreError;

/// KeyValueStore は claim プロトコルに必要な 3 つの atomic 操作を提供
///
/// # 契約
/// - 値は不透明な文字列。`compare_and_swap` の比較はバイト一致
/// - `put_if_absent` と `compare_and_swap` は、他プロセスを含む同じ store の
///   すべての呼び出しに対して atomic
/// - ロックや複数キーのトランザクションは要求しない
/// - 接続障害は `StoreError` で返す（「存在しない」「競合に負けた」にしない）
///
/// # Thread Safety
/// - `Send + Sync` を要求（複数タスクから共有できる）
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// `key` の現在の値を読む（なければ `None`）
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// `key` が存在しないときだけ `value` を保存
    ///
    /// 保存できたら `None`、既に存在していたらその値（変更しない）を返す。
    async fn put_if_absent(&self, key: &str, value: &str) -> Result<Option<String>, StoreError>;

    /// 現在の値が `expected` と一致するときだけ `new` に置き換える
    ///
    /// 値が違う、またはキーが存在しないときは `false`（store は変更しない）。
    async fn compare_and_swap(&self, key: &str, expected: &str, new: &str)
    -> Result<bool, StoreError>;
}

// Arc で共有した store もそのまま使えるようにする
#[async_trait]
impl<S: KeyValueStore + ?Sized> KeyValueStore for std::sync::Arc<S> {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        (**self).get(key).await
    }

    async fn put_if_absent(&self, key: &str, value: &str) -> Result<Option<String>, StoreError> {
        (**self).put_if_absent(key, value).await
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        new: &str,
    ) -> Result<bool, StoreError> {
        (**self).compare_and_swap(key, expected, new).await
    }
}
