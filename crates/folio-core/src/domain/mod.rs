//! Domain model (ids, errors, outcomes, documents).
//!
//! - ids / errors / outcome: ジョブ実行まわりの型
//! - skeleton / outline / canonical / figure: 書籍ドキュメントの型

pub mod canonical;
pub mod errors;
pub mod figure;
pub mod ids;
pub mod outcome;
pub mod outline;
pub mod skeleton;

pub use canonical::{Block, CanonicalChapter, CanonicalDocument, CanonicalSection};
pub use errors::{ErrorKind, FolioError, JobFailure, StructuralViolation, Violation};
pub use figure::{FigureAssignment, ImageLibrary, LibraryImage};
pub use ids::{JobId, ParseIdError};
pub use outcome::Outcome;
pub use outline::Outline;
pub use skeleton::{
    BookKey, Chapter, PLACEHOLDER_TEXT, Paragraph, ParagraphImage, Section, Skeleton, SkeletonMeta,
    Subparagraph,
};
