//! Task trait - 型付き Task の定義
//!
//! ペイロード型と job_type 文字列を 1 対 1 に対応付ける。

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Task は job_type と型を対応付ける
///
/// # 使用例
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct SectionTask {
///     chapter_index: usize,
///     section_index: usize,
/// }
///
/// impl Task for SectionTask {
///     const TYPE: &'static str = "folio.section.generate.v1";
/// }
/// ```
///
/// # Trait Bounds
/// - `Serialize`: yield 時にペイロードとして保存するため
/// - `DeserializeOwned`: ジョブレコードから復元するため
/// - `Send + Sync + 'static`: ワーカーのタスク間で受け渡すため
pub trait Task: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// job_type の定義
    ///
    /// # 命名規約
    /// - `{namespace}.{domain}.{action}.v{major}`
    /// - 例: `folio.chapter.generate.v1`
    const TYPE: &'static str;
}
