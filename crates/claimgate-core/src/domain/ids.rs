//! Worker identity (強く型付けされた ID)
//!
//! `WorkerId` は 1 つのフィルタインスタンスをログ上で識別します。
//! 古い claim をどのプロセスが引き継いだかを運用者が追えるようにするためで、
//! store には一切書きません。
//!
//! ## ULID を使う理由
//! - 生成順に並ぶので、ログを時系列で追いやすい
//! - プロセス間の調整なしに一意な値を作れる

use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// WorkerId は ULID の newtype
///
/// Display は `worker-<ULID>` 形式です。
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkerId(Ulid);

impl WorkerId {
    /// ULID から WorkerId を作成
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    /// 中身の ULID を取り出す
    pub fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl From<Ulid> for WorkerId {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_has_worker_prefix() {
        let id = WorkerId::from_ulid(Ulid::new());
        assert!(id.to_string().starts_with("worker-"));
    }

    #[test]
    fn worker_ids_can_be_serialized() {
        let id = WorkerId::from_ulid(Ulid::new());
        let s = serde_json::to_string(&id).unwrap();
        let back: WorkerId = serde_json::from_str(&s).unwrap();
        assert_eq!(id, back);
    }
}
