//! Generation - 章・節の生成ハンドラ
//!
//! - **ChapterOrchestrator**: 章ごとの合成ハンドラ（yield で再開する状態機械）
//! - **SectionGenerator**: 節ごとの葉ハンドラ（言語モデル呼び出し + 検証）

pub mod chapter;
pub mod prompt;
pub mod section;

pub use self::chapter::{ChapterOrchestrator, ChapterResult, ChapterTask};
pub use self::section::{SectionContext, SectionError, SectionGenerator, SectionResult, SectionTask};
