//! Ports - 抽象化レイヤー
//!
//! 外部（ストレージ、言語モデル、時刻、ID）へのインターフェースを定義し、
//! 実装の詳細を隠蔽します。
//!
//! # 設計原則
//! - ジョブストアが実行状態の正本（source of truth）
//! - BookStore の Skeleton が書籍内容の正本
//! - ハンドラは必要なものを引数で受け取る（グローバルな文書ハンドルは持たない）

pub mod book_store;
pub mod clock;
pub mod id_generator;
pub mod job_store;
pub mod language_model;

// 主要な trait を再エクスポート
pub use self::book_store::BookStore;
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::job_store::JobStore;
pub use self::language_model::{LanguageModel, ModelError, ModelRequest};
