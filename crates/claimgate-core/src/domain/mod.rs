//! Domain - ドメインモデル
//!
//! store とは一切やりとりしない純粋な型と判断ロジック。
//! app 層がこれらを ports と組み合わせて claim プロトコルを動かします。
//!
//! # 含まれる型
//! - **StatusRecord / ClaimState**: キーごとに保存される値と状態機械
//! - **ClaimPolicy / decide_completion**: 次に書くレコードを決める純粋関数
//! - **FileKey / KeyPrefix**: store 上のキー
//! - **WorkerId**: ログ相関用のワーカー ID

pub mod candidate;
pub mod decision;
pub mod ids;
pub mod key;
pub mod record;
pub mod state;

// 主要な型を再エクスポート
pub use candidate::CandidateFile;
pub use decision::{
    Anomaly, ClaimDecision, ClaimPolicy, ClaimStep, Completion, CompletionStep, decide_completion,
};
pub use ids::WorkerId;
pub use key::{FileKey, KeyPrefix};
pub use record::StatusRecord;
pub use state::ClaimState;
