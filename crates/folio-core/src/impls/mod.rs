//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryBookStore**: テスト用の BookStore
//! - **FileBookStore**: JSON ファイルの BookStore（CLI が使う）
//! - **HttpModel**: messages 形式の HTTP API
//! - **ScriptedModel**: テスト・オフライン用の言語モデル
//!
//! ジョブストアの実装は `queue` にある。

pub mod file_book_store;
pub mod http_model;
pub mod inmem_book_store;
pub mod scripted_model;

// 主要な型を再エクスポート
pub use self::file_book_store::FileBookStore;
pub use self::http_model::HttpModel;
pub use self::inmem_book_store::InMemoryBookStore;
pub use self::scripted_model::ScriptedModel;
