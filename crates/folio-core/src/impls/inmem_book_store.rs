//! InMemoryBookStore - テスト用の BookStore

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{BookKey, CanonicalDocument, FigureAssignment, FolioError, Section, Skeleton};
use crate::ports::BookStore;
use crate::ports::book_store::{merge_assignments, not_found};

#[derive(Debug, Default)]
struct BookEntry {
    skeleton: Option<Skeleton>,
    canonical: Option<CanonicalDocument>,
    figures: Vec<FigureAssignment>,
}

#[derive(Debug, Default)]
pub struct InMemoryBookStore {
    books: Mutex<HashMap<BookKey, BookEntry>>,
}

impl InMemoryBookStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BookStore for InMemoryBookStore {
    async fn load_skeleton(&self, key: &BookKey) -> Result<Skeleton, FolioError> {
        self.books
            .lock()
            .await
            .get(key)
            .and_then(|e| e.skeleton.clone())
            .ok_or_else(|| not_found(key))
    }

    async fn save_skeleton(&self, skeleton: &Skeleton) -> Result<(), FolioError> {
        self.books
            .lock()
            .await
            .entry(skeleton.key())
            .or_default()
            .skeleton = Some(skeleton.clone());
        Ok(())
    }

    async fn replace_section(
        &self,
        key: &BookKey,
        chapter_index: usize,
        section: Section,
    ) -> Result<(), FolioError> {
        let mut books = self.books.lock().await;
        let skeleton = books
            .get_mut(key)
            .and_then(|e| e.skeleton.as_mut())
            .ok_or_else(|| not_found(key))?;
        skeleton.replace_section(chapter_index, section)?;
        Ok(())
    }

    async fn save_canonical(&self, key: &BookKey, doc: &CanonicalDocument) -> Result<(), FolioError> {
        self.books.lock().await.entry(key.clone()).or_default().canonical = Some(doc.clone());
        Ok(())
    }

    async fn load_canonical(&self, key: &BookKey) -> Result<Option<CanonicalDocument>, FolioError> {
        Ok(self
            .books
            .lock()
            .await
            .get(key)
            .and_then(|e| e.canonical.clone()))
    }

    async fn clear_canonical(&self, key: &BookKey) -> Result<bool, FolioError> {
        Ok(self
            .books
            .lock()
            .await
            .get_mut(key)
            .and_then(|e| e.canonical.take())
            .is_some())
    }

    async fn save_figure_assignments(
        &self,
        key: &BookKey,
        chapter_index: usize,
        assignments: &[FigureAssignment],
    ) -> Result<(), FolioError> {
        let mut books = self.books.lock().await;
        let entry = books.entry(key.clone()).or_default();
        let existing = std::mem::take(&mut entry.figures);
        entry.figures = merge_assignments(existing, chapter_index, assignments);
        Ok(())
    }

    async fn load_figure_assignments(&self, key: &BookKey) -> Result<Vec<FigureAssignment>, FolioError> {
        Ok(self
            .books
            .lock()
            .await
            .get(key)
            .map(|e| e.figures.clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::skeleton::fixtures::two_section_skeleton;

    #[tokio::test]
    async fn missing_book_is_not_found() {
        let store = InMemoryBookStore::new();
        let err = store.load_skeleton(&BookKey::new("x", "y")).await.unwrap_err();
        assert!(matches!(err, FolioError::BookNotFound { .. }));
    }

    #[tokio::test]
    async fn replace_section_touches_only_that_section() {
        let store = InMemoryBookStore::new();
        let skeleton = two_section_skeleton();
        let key = skeleton.key();
        store.save_skeleton(&skeleton).await.unwrap();

        let mut section = skeleton.chapters[0].sections[1].clone();
        for p in section.paragraphs_mut() {
            p.basis_text = "filled".into();
        }
        store.replace_section(&key, 0, section).await.unwrap();

        let stored = store.load_skeleton(&key).await.unwrap();
        assert!(!stored.chapters[0].sections[0].is_generated());
        assert!(stored.chapters[0].sections[1].is_generated());
    }

    #[tokio::test]
    async fn figure_assignments_replace_per_chapter() {
        let store = InMemoryBookStore::new();
        let key = BookKey::new("b", "v");
        let a = |image: &str, chapter: usize| FigureAssignment {
            image_ref: image.into(),
            paragraph_id: "p".into(),
            chapter_index: chapter,
            confidence: 1.0,
            uncertain: false,
        };

        store
            .save_figure_assignments(&key, 0, &[a("one", 0), a("two", 0)])
            .await
            .unwrap();
        store.save_figure_assignments(&key, 1, &[a("three", 1)]).await.unwrap();
        store.save_figure_assignments(&key, 0, &[a("four", 0)]).await.unwrap();

        let refs: Vec<String> = store
            .load_figure_assignments(&key)
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.image_ref)
            .collect();
        assert_eq!(refs, vec!["four", "three"]);
    }
}
