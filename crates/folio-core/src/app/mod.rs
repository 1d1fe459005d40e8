//! App - アプリケーション層
//!
//! ports を組み合わせてアプリケーションロジックを実装する。
//!
//! # 主要コンポーネント
//! - **AppBuilder**: handler の登録と起動時検証
//! - **Worker / WorkerGroup**: pump ループ（reap→claim→handle→complete/yield/fail）
//! - **Reaper**: heartbeat 切れの回収
//! - **BookService**: Skeleton 保存、生成開始、図版配置
//! - **status**: ステータス別の件数

pub mod books;
pub mod builder;
pub mod reaper;
pub mod status;
pub mod worker_loop;

pub use self::books::BookService;
pub use self::builder::{App, AppBuilder, BuildError};
pub use self::reaper::Reaper;
pub use self::status::QueueCounts;
pub use self::worker_loop::{PumpOutcome, Worker, WorkerGroup, WorkerSettings};
