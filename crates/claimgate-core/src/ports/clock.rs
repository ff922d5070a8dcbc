//! Clock port - 時刻の抽象化
//!
//! # 実装
//! - **SystemClock**: 本番用
//! - **FixedClock**: テスト用（手で進める）

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, TimeZone, Utc};

/// Clock は現在時刻を提供
///
/// # テスト容易性
/// - trait により時刻を差し替え可能
/// - テストでは FixedClock を使用し、タイムアウト境界を秒単位で検証する
pub trait Clock: Send + Sync {
    /// 現在時刻
    fn now(&self) -> DateTime<Utc>;

    /// 現在時刻の unix 秒（レコードに保存する解像度）
    fn unix_seconds(&self) -> i64 {
        self.now().timestamp()
    }
}

/// SystemClock は OS の時計を使う本番用の Clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// FixedClock は手で動かすテスト用の Clock（1 秒解像度）
///
/// clone は同じ時刻を共有するので、1 つをフィルタに渡し、
/// もう 1 つを手元に残して時刻を進められます。
#[derive(Debug, Clone)]
pub struct FixedClock {
    secs: Arc<AtomicI64>,
}

impl FixedClock {
    /// 指定した時刻で FixedClock を作成
    pub fn new(at: DateTime<Utc>) -> Self {
        Self::from_unix_seconds(at.timestamp())
    }

    /// unix 秒から FixedClock を作成
    pub fn from_unix_seconds(secs: i64) -> Self {
        Self {
            secs: Arc::new(AtomicI64::new(secs)),
        }
    }

    /// 時刻を設定
    pub fn set(&self, secs: i64) {
        self.secs.store(secs, Ordering::SeqCst);
    }

    /// 時刻を `secs` 秒進める
    pub fn advance(&self, secs: i64) {
        self.secs.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        let secs = self.secs.load(Ordering::SeqCst);
        Utc.timestamp_opt(secs, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }

    fn unix_seconds(&self) -> i64 {
        self.secs.load(Ordering::SeqCst)
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }

    fn unix_seconds(&self) -> i64 {
        (**self).unix_seconds()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_clones_share_time() {
        let clock = FixedClock::from_unix_seconds(0);
        let handle = clock.clone();
        handle.advance(61);
        assert_eq!(clock.unix_seconds(), 61);
        handle.set(183);
        assert_eq!(clock.now().timestamp(), 183);
    }

    #[test]
    fn system_clock_is_after_2020() {
        assert!(SystemClock.unix_seconds() > 1_577_836_800);
    }
}
