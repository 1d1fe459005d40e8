//! FileBookStore - `<root>/books/<book>/<version>/` 以下の JSON ファイル
//!
//! - `skeleton.json`: 正本
//! - `canonical.json`: コンパイル結果
//! - `figures.json`: 図版割り当て
//!
//! 書き込みはすべて一時ファイル + rename。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;

use crate::domain::{BookKey, CanonicalDocument, FigureAssignment, FolioError, Section, Skeleton};
use crate::ports::BookStore;
use crate::ports::book_store::{merge_assignments, not_found};
use crate::queue::write_json_atomic;

const SKELETON_FILE: &str = "skeleton.json";
const CANONICAL_FILE: &str = "canonical.json";
const FIGURES_FILE: &str = "figures.json";

pub struct FileBookStore {
    root: PathBuf,
    /// Serializes read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl FileBookStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn book_dir(&self, key: &BookKey) -> Result<PathBuf, FolioError> {
        for part in [&key.book_id, &key.version_id] {
            if part.is_empty() || part == "." || part == ".." || part.contains(['/', '\\']) {
                return Err(FolioError::Config(format!("invalid book key '{key}'")));
            }
        }
        Ok(self
            .root
            .join("books")
            .join(&key.book_id)
            .join(&key.version_id))
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, FolioError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl BookStore for FileBookStore {
    async fn load_skeleton(&self, key: &BookKey) -> Result<Skeleton, FolioError> {
        let path = self.book_dir(key)?.join(SKELETON_FILE);
        read_json(&path).await?.ok_or_else(|| not_found(key))
    }

    async fn save_skeleton(&self, skeleton: &Skeleton) -> Result<(), FolioError> {
        let path = self.book_dir(&skeleton.key())?.join(SKELETON_FILE);
        let _guard = self.write_lock.lock().await;
        write_json_atomic(&path, skeleton).await
    }

    async fn replace_section(
        &self,
        key: &BookKey,
        chapter_index: usize,
        section: Section,
    ) -> Result<(), FolioError> {
        let path = self.book_dir(key)?.join(SKELETON_FILE);
        let _guard = self.write_lock.lock().await;
        let mut skeleton: Skeleton = read_json(&path).await?.ok_or_else(|| not_found(key))?;
        skeleton.replace_section(chapter_index, section)?;
        write_json_atomic(&path, &skeleton).await
    }

    async fn save_canonical(&self, key: &BookKey, doc: &CanonicalDocument) -> Result<(), FolioError> {
        let path = self.book_dir(key)?.join(CANONICAL_FILE);
        write_json_atomic(&path, doc).await
    }

    async fn load_canonical(&self, key: &BookKey) -> Result<Option<CanonicalDocument>, FolioError> {
        read_json(&self.book_dir(key)?.join(CANONICAL_FILE)).await
    }

    async fn clear_canonical(&self, key: &BookKey) -> Result<bool, FolioError> {
        match tokio::fs::remove_file(self.book_dir(key)?.join(CANONICAL_FILE)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn save_figure_assignments(
        &self,
        key: &BookKey,
        chapter_index: usize,
        assignments: &[FigureAssignment],
    ) -> Result<(), FolioError> {
        let path = self.book_dir(key)?.join(FIGURES_FILE);
        let _guard = self.write_lock.lock().await;
        let existing: Vec<FigureAssignment> = read_json(&path).await?.unwrap_or_default();
        let merged = merge_assignments(existing, chapter_index, assignments);
        write_json_atomic(&path, &merged).await
    }

    async fn load_figure_assignments(&self, key: &BookKey) -> Result<Vec<FigureAssignment>, FolioError> {
        Ok(read_json(&self.book_dir(key)?.join(FIGURES_FILE))
            .await?
            .unwrap_or_default())
    }
}
