//! BookService - 書籍操作の入口
//!
//! - Skeleton の保存（検証 + 任意でコンパイル）
//! - Outline からの Skeleton 生成
//! - 章生成ジョブの投入
//! - 図版配置

use std::sync::Arc;

use crate::compiler;
use crate::domain::{
    BookKey, CanonicalDocument, FigureAssignment, FolioError, ImageLibrary, JobId, Outline, Skeleton,
};
use crate::figures::FigureMatcher;
use crate::generation::ChapterTask;
use crate::ports::{BookStore, JobStore};
use crate::queue::JobView;

pub struct BookService {
    jobs: Arc<dyn JobStore>,
    books: Arc<dyn BookStore>,
    matcher: FigureMatcher,
}

impl BookService {
    pub fn new(jobs: Arc<dyn JobStore>, books: Arc<dyn BookStore>, matcher: FigureMatcher) -> Self {
        Self {
            jobs,
            books,
            matcher,
        }
    }

    /// Validate and persist a Skeleton. With `compile_canonical` the
    /// Canonical Document is rebuilt and persisted too; without it any stored
    /// Canonical Document is dropped, since it no longer matches.
    ///
    /// Nothing is written when validation fails.
    pub async fn save_skeleton(
        &self,
        skeleton: &Skeleton,
        compile_canonical: bool,
    ) -> Result<Option<CanonicalDocument>, FolioError> {
        let key = skeleton.key();
        let doc = if compile_canonical {
            Some(compiler::compile(skeleton)?)
        } else {
            compiler::validate(skeleton)?;
            None
        };

        self.books.save_skeleton(skeleton).await?;
        match &doc {
            Some(doc) => self.books.save_canonical(&key, doc).await?,
            None => {
                if self.books.clear_canonical(&key).await? {
                    tracing::debug!(book = %key, "outdated canonical document dropped");
                }
            }
        }
        tracing::info!(book = %key, chapters = skeleton.chapters.len(), compiled = doc.is_some(), "skeleton saved");
        Ok(doc)
    }

    /// Seed a placeholder Skeleton from an outline and save it.
    pub async fn seed(&self, outline: &Outline) -> Result<Skeleton, FolioError> {
        let skeleton = outline.seed();
        self.save_skeleton(&skeleton, false).await?;
        Ok(skeleton)
    }

    /// Enqueue the orchestrator for `chapter_index`. With `chain` the
    /// following chapters run after it.
    pub async fn start_generation(
        &self,
        key: &BookKey,
        chapter_index: usize,
        chain: bool,
        idempotency_key: Option<String>,
    ) -> Result<JobId, FolioError> {
        let skeleton = self.books.load_skeleton(key).await?;
        if chapter_index >= skeleton.chapters.len() {
            return Err(FolioError::ChapterNotFound {
                book: key.to_string(),
                chapter_index,
            });
        }

        let task = ChapterTask::new(key, chapter_index);
        let task = if chain { task } else { task.without_chain() };
        let mut job = task.into_job()?;
        if let Some(k) = idempotency_key {
            job = job.with_idempotency_key(k);
        }
        let id = self.jobs.enqueue(job).await?;
        tracing::info!(job_id = %id, book = %key, chapter_index, chain, "generation started");
        Ok(id)
    }

    /// Compile the stored Skeleton and persist the result.
    pub async fn compile(&self, key: &BookKey) -> Result<CanonicalDocument, FolioError> {
        let skeleton = self.books.load_skeleton(key).await?;
        let doc = compiler::compile(&skeleton).inspect_err(|v| {
            tracing::error!(book = %key, error = %v, "skeleton does not compile");
        })?;
        self.books.save_canonical(key, &doc).await?;
        Ok(doc)
    }

    /// Run the matcher over one chapter of the stored Canonical Document and
    /// replace that chapter's assignments.
    pub async fn place_figures(
        &self,
        key: &BookKey,
        chapter_index: usize,
        library: &ImageLibrary,
    ) -> Result<Vec<FigureAssignment>, FolioError> {
        let doc = self
            .books
            .load_canonical(key)
            .await?
            .ok_or_else(|| FolioError::CanonicalNotFound {
                book_id: key.book_id.clone(),
                version_id: key.version_id.clone(),
            })?;
        let chapter = doc
            .chapters
            .get(chapter_index)
            .ok_or_else(|| FolioError::ChapterNotFound {
                book: key.to_string(),
                chapter_index,
            })?;

        let assignments = self.matcher.place_chapter(library, chapter, chapter_index);
        self.books
            .save_figure_assignments(key, chapter_index, &assignments)
            .await?;
        tracing::info!(
            book = %key,
            chapter_index,
            placed = assignments.len(),
            uncertain = assignments.iter().filter(|a| a.uncertain).count(),
            "figures placed"
        );
        Ok(assignments)
    }

    pub async fn job(&self, id: JobId) -> Result<JobView, FolioError> {
        self.jobs
            .get(id)
            .await?
            .map(|r| r.view())
            .ok_or(FolioError::JobNotFound(id))
    }

    /// Manual reset of a dead-lettered job.
    pub async fn reset(&self, id: JobId) -> Result<bool, FolioError> {
        let reset = self.jobs.requeue_dead_letter(id).await?;
        if reset {
            tracing::info!(job_id = %id, "dead-lettered job re-queued");
        }
        Ok(reset)
    }
}
