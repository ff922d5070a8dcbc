//! Impls - KeyValueStore の実装
//!
//! このモジュールには ports の実装を含めます。
//!
//! # 含まれる実装
//! - **InMemoryStore**: 単一プロセス・テスト用（障害注入つき）
//! - **FsStore**: 複数のワーカープロセスが共有するディレクトリ

pub mod fs_store;
pub mod inmem_store;

// 主要な型を再エクスポート
pub use self::fs_store::FsStore;
pub use self::inmem_store::InMemoryStore;
