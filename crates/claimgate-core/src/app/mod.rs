//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせて claim プロトコルを実装します。
//!
//! # 主要コンポーネント
//! - **ClaimEngine**: put-if-absent → タイムアウト/リトライ方針による CAS ループ
//! - **CompletionRecorder**: レコードを Done に確定する CAS ループ
//! - **ClaimFilter**: ポーリングループが呼ぶファサード（accept / outcome / batch）
//! - **ClaimFilterBuilder**: 構築とワイヤリング

pub mod builder;
pub mod claim;
pub mod completion;
pub mod filter;

// 主要な型を再エクスポート
pub use self::builder::ClaimFilterBuilder;
pub use self::claim::ClaimEngine;
pub use self::completion::CompletionRecorder;
pub use self::filter::{BatchReport, ClaimFilter};
