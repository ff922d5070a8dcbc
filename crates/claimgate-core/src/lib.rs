//! claimgate-core
//!
//! File-claim coordination for workers polling a shared file source.
//!
//! Any number of worker processes agree, through a shared key/value store
//! with atomic conditional writes, on who processes each file. A crashed
//! worker's claim becomes contestable after a retry timeout, a file is
//! rejected after a bounded number of attempts, and completion is recorded
//! durably so nobody repeats finished work.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（record, state, key, decision, ids）
//! - **ports**: 抽象化レイヤー（KeyValueStore, Clock, IdGenerator）
//! - **app**: アプリケーションロジック（ClaimEngine, CompletionRecorder, ClaimFilter, builder）
//! - **impls**: 実装（InMemoryStore はテスト用、FsStore は共有ディレクトリ用）
//! - **config**: FilterConfig（TOML + 環境変数）
//! - **observability**: tracing の初期化とバッチの集計
//! - **error**: エラー型（ClaimError, StoreError）

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod observability;
pub mod ports;

// 主要な型を再エクスポート
pub use app::{BatchReport, ClaimFilter, ClaimFilterBuilder};
pub use config::FilterConfig;
pub use domain::{CandidateFile, ClaimDecision, ClaimState, Completion, StatusRecord};
pub use error::{ClaimError, Result, StoreError};
