//! BookStore port - Skeleton / Canonical / 図版割り当ての保存先
//!
//! Skeleton が正本。Canonical Document と図版割り当ては派生物で、
//! いつでも作り直せる。

use async_trait::async_trait;

use crate::domain::{BookKey, CanonicalDocument, FigureAssignment, FolioError, Section, Skeleton};

#[async_trait]
pub trait BookStore: Send + Sync {
    async fn load_skeleton(&self, key: &BookKey) -> Result<Skeleton, FolioError>;

    async fn save_skeleton(&self, skeleton: &Skeleton) -> Result<(), FolioError>;

    /// Read-modify-write of exactly one section. Sibling sections are left
    /// as they are in storage at the time of the write.
    async fn replace_section(
        &self,
        key: &BookKey,
        chapter_index: usize,
        section: Section,
    ) -> Result<(), FolioError>;

    async fn save_canonical(&self, key: &BookKey, doc: &CanonicalDocument) -> Result<(), FolioError>;

    async fn load_canonical(&self, key: &BookKey) -> Result<Option<CanonicalDocument>, FolioError>;

    /// Drop the stored Canonical Document. Returns whether one existed.
    async fn clear_canonical(&self, key: &BookKey) -> Result<bool, FolioError>;

    /// Replace every assignment previously stored for `chapter_index`.
    async fn save_figure_assignments(
        &self,
        key: &BookKey,
        chapter_index: usize,
        assignments: &[FigureAssignment],
    ) -> Result<(), FolioError>;

    async fn load_figure_assignments(&self, key: &BookKey) -> Result<Vec<FigureAssignment>, FolioError>;
}

pub(crate) fn not_found(key: &BookKey) -> FolioError {
    FolioError::BookNotFound {
        book_id: key.book_id.clone(),
        version_id: key.version_id.clone(),
    }
}

/// Assignments for other chapters, followed by the new ones, sorted.
pub(crate) fn merge_assignments(
    existing: Vec<FigureAssignment>,
    chapter_index: usize,
    assignments: &[FigureAssignment],
) -> Vec<FigureAssignment> {
    let mut merged: Vec<FigureAssignment> = existing
        .into_iter()
        .filter(|a| a.chapter_index != chapter_index)
        .chain(assignments.iter().cloned())
        .collect();
    merged.sort_by(|a, b| {
        a.chapter_index
            .cmp(&b.chapter_index)
            .then_with(|| a.image_ref.cmp(&b.image_ref))
    });
    merged
}
