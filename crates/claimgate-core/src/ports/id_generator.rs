//! IdGenerator port - ワーカー ID の生成
//!
//! WorkerId はログの相関だけに使い、store には書きません。
//! 生成を trait にしておくと、テストで時刻部分を固定できます。

use ulid::Ulid;

use crate::domain::WorkerId;
use crate::ports::Clock;

/// IdGenerator はフィルタごとの WorkerId を生成
pub trait IdGenerator: Send + Sync {
    /// 新しい WorkerId を生成（呼ぶたびに異なる）
    fn generate_worker_id(&self) -> WorkerId;
}

/// UlidGenerator は ULID ベースの生成器
///
/// ULID の先頭 48 bit（ミリ秒の時刻）は注入された Clock から取り、
/// 残り 80 bit は乱数です。
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    /// Clock を受け取って生成器を作成
    pub fn new(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_worker_id(&self) -> WorkerId {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        WorkerId::from(Ulid::from_parts(timestamp_ms, rand::random()))
    }
}
