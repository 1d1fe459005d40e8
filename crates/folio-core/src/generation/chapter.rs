//! Chapter Orchestrator: the composite handler.
//!
//! One job drives one chapter. Each invocation does one step and returns:
//!
//! 1. A pending section job is checked. Still running → yield. Done → its
//!    section is merged into the Skeleton and the index advances. Failed →
//!    the chapter fails as a unit and restarts from its first section.
//! 2. All sections done → compile (last chapter), chain the next chapter,
//!    finish.
//! 3. Otherwise the next section job is enqueued and the orchestrator
//!    yields with the child's id in its payload.
//!
//! All progress lives in the job payload, so a crash loses at most the
//! in-flight section.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::section::{SectionContext, SectionResult, SectionTask};
use crate::compiler;
use crate::domain::{BookKey, ErrorKind, FolioError, JobFailure, JobId, Outcome, Skeleton};
use crate::ports::{BookStore, JobStore};
use crate::queue::{JobRecord, JobStatus, NewJob};
use crate::typed::{Handler, JobContext, Task};

/// Orchestrator state, persisted as the job payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterTask {
    pub book_id: String,
    pub version_id: String,
    pub chapter_index: usize,
    #[serde(default)]
    pub next_section_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_section_job_id: Option<JobId>,
    /// Enqueue the next chapter when this one is done.
    #[serde(default = "default_chain")]
    pub chain: bool,
}

fn default_chain() -> bool {
    true
}

impl Task for ChapterTask {
    const TYPE: &'static str = "folio.chapter.generate.v1";
}

impl ChapterTask {
    pub fn new(key: &BookKey, chapter_index: usize) -> Self {
        Self {
            book_id: key.book_id.clone(),
            version_id: key.version_id.clone(),
            chapter_index,
            next_section_index: 0,
            pending_section_job_id: None,
            chain: true,
        }
    }

    pub fn without_chain(mut self) -> Self {
        self.chain = false;
        self
    }

    pub fn key(&self) -> BookKey {
        BookKey::new(&self.book_id, &self.version_id)
    }

    /// State a retried chapter starts from.
    pub fn restart(&self) -> Self {
        Self {
            next_section_index: 0,
            pending_section_job_id: None,
            ..self.clone()
        }
    }

    pub fn into_job(self) -> Result<NewJob, FolioError> {
        Ok(NewJob::new(Self::TYPE, serde_json::to_value(self)?))
    }
}

/// Job result of a finished chapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterResult {
    pub chapter_index: usize,
    pub sections: usize,
    pub compiled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_chapter_job_id: Option<JobId>,
}

pub struct ChapterOrchestrator {
    jobs: Arc<dyn JobStore>,
    books: Arc<dyn BookStore>,
    yield_delay: Duration,
}

impl ChapterOrchestrator {
    pub fn new(jobs: Arc<dyn JobStore>, books: Arc<dyn BookStore>, yield_delay: Duration) -> Self {
        Self {
            jobs,
            books,
            yield_delay,
        }
    }

    /// Step 1: look at the pending child, merging its section when done.
    /// Returns `Some(outcome)` when this invocation ends here.
    async fn settle_pending(
        &self,
        state: &mut ChapterTask,
        key: &BookKey,
    ) -> Result<Option<Outcome<ChapterTask>>, JobFailure> {
        let Some(child_id) = state.pending_section_job_id else {
            return Ok(None);
        };
        let Some(child) = self.jobs.get(child_id).await? else {
            tracing::warn!(
                child_job_id = %child_id,
                book = %key,
                chapter_index = state.chapter_index,
                "pending section job vanished, re-enqueueing"
            );
            state.pending_section_job_id = None;
            return Ok(None);
        };

        match child.status {
            JobStatus::Queued | JobStatus::Running | JobStatus::Stale => {
                Ok(Some(Outcome::yield_after(state.clone(), self.yield_delay)))
            }
            JobStatus::Done => {
                let result: SectionResult =
                    serde_json::from_value(child.result.clone().unwrap_or_default()).map_err(|e| {
                        JobFailure::configuration(format!("section job {child_id} result: {e}"))
                    })?;
                self.books
                    .replace_section(key, state.chapter_index, result.section)
                    .await?;
                tracing::debug!(
                    child_job_id = %child_id,
                    book = %key,
                    chapter_index = state.chapter_index,
                    section_index = state.next_section_index,
                    "section merged"
                );
                state.pending_section_job_id = None;
                state.next_section_index += 1;
                Ok(None)
            }
            JobStatus::Failed | JobStatus::DeadLetter => Err(child_failure(&child, state)),
        }
    }

    /// Step 2: every section is in. Compile on the last chapter and chain.
    async fn finish(
        &self,
        state: &ChapterTask,
        skeleton: &Skeleton,
        ctx: JobContext,
    ) -> Result<Outcome<ChapterTask>, JobFailure> {
        let key = state.key();
        let next_index = state.chapter_index + 1;
        let is_last = next_index >= skeleton.chapters.len();

        let compiled = if is_last {
            let doc = compiler::compile(skeleton).map_err(|v| {
                tracing::error!(book = %key, error = %v, "generated book does not compile");
                JobFailure::from(v)
            })?;
            self.books.save_canonical(&key, &doc).await?;
            true
        } else {
            false
        };

        let next_chapter_job_id = if state.chain && !is_last {
            let job = ChapterTask::new(&key, next_index)
                .into_job()?
                .with_idempotency_key(format!(
                    "chapter:{}:{}:{next_index}:after:{}",
                    key.book_id, key.version_id, ctx.job_id
                ));
            Some(self.jobs.enqueue(job).await?)
        } else {
            None
        };

        let result = ChapterResult {
            chapter_index: state.chapter_index,
            sections: state.next_section_index,
            compiled,
            next_chapter_job_id,
        };
        tracing::info!(
            job_id = %ctx.job_id,
            book = %key,
            chapter_index = state.chapter_index,
            compiled,
            next_chapter_job_id = ?next_chapter_job_id.map(|id| id.to_string()),
            "chapter generated"
        );
        let value = serde_json::to_value(&result)
            .map_err(|e| JobFailure::configuration(format!("chapter result encode: {e}")))?;
        Ok(Outcome::done(value))
    }

    /// Step 3: enqueue the section at `next_section_index` and yield.
    async fn spawn_section(
        &self,
        mut state: ChapterTask,
        skeleton: &Skeleton,
        ctx: JobContext,
    ) -> Result<Outcome<ChapterTask>, JobFailure> {
        let chapter = &skeleton.chapters[state.chapter_index];
        let index = state.next_section_index;
        let section = chapter.sections[index].clone();
        let context = SectionContext {
            chapter_title: chapter.title.clone(),
            sibling_titles: chapter
                .sections
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != index)
                .map(|(_, s)| s.title.clone())
                .collect(),
        };
        let task = SectionTask {
            meta: skeleton.meta.clone(),
            chapter_index: state.chapter_index,
            section_index: index,
            section,
            context,
        };
        let payload = serde_json::to_value(&task)
            .map_err(|e| JobFailure::configuration(format!("section task encode: {e}")))?;

        // Same key for the same attempt: a re-run after a crash finds the
        // child it already created. Retries and resets get fresh children.
        let job = NewJob::new(SectionTask::TYPE, payload).with_idempotency_key(format!(
            "section:{}:g{}:r{}:{index}",
            ctx.job_id, ctx.reset_count, ctx.retry_count
        ));
        let child_id = self.jobs.enqueue(job).await?;
        tracing::info!(
            job_id = %ctx.job_id,
            child_job_id = %child_id,
            book = %state.key(),
            chapter_index = state.chapter_index,
            section_index = index,
            "section job enqueued"
        );

        state.pending_section_job_id = Some(child_id);
        Ok(Outcome::yield_after(state, self.yield_delay))
    }
}

/// A failed child fails the chapter. Authoring and routing errors stay
/// terminal; anything else is retried as a whole chapter.
fn child_failure(child: &JobRecord, state: &ChapterTask) -> JobFailure {
    let cause = child
        .error
        .clone()
        .unwrap_or_else(|| JobFailure::transient("no error recorded"));
    let kind = match cause.kind {
        ErrorKind::StructuralViolation | ErrorKind::Configuration | ErrorKind::ModelOutputInvalid => {
            cause.kind
        }
        ErrorKind::TransientInfra | ErrorKind::Exhausted => ErrorKind::TransientInfra,
    };
    tracing::warn!(
        child_job_id = %child.id,
        book = %state.key(),
        chapter_index = state.chapter_index,
        section_index = state.next_section_index,
        status = %child.status,
        error = %cause,
        "section job failed, failing chapter"
    );
    let failure = JobFailure::new(
        kind,
        format!(
            "section {} (job {}) {}: {}",
            state.next_section_index, child.id, child.status, cause
        ),
    );
    match serde_json::to_value(state.restart()) {
        Ok(restart) => failure.with_restart_payload(restart),
        Err(_) => failure,
    }
}

#[async_trait]
impl Handler<ChapterTask> for ChapterOrchestrator {
    async fn handle(
        &self,
        task: ChapterTask,
        ctx: JobContext,
    ) -> Result<Outcome<ChapterTask>, JobFailure> {
        let key = task.key();
        let mut state = task;

        if let Some(outcome) = self.settle_pending(&mut state, &key).await? {
            return Ok(outcome);
        }

        let skeleton = self.books.load_skeleton(&key).await?;
        let Some(chapter) = skeleton.chapters.get(state.chapter_index) else {
            return Err(FolioError::ChapterNotFound {
                book: key.to_string(),
                chapter_index: state.chapter_index,
            }
            .into());
        };

        if state.next_section_index >= chapter.sections.len() {
            self.finish(&state, &skeleton, ctx).await
        } else {
            self.spawn_section(state, &skeleton, ctx).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::skeleton::fixtures::two_section_skeleton;
    use crate::impls::InMemoryBookStore;
    use crate::queue::{InMemoryJobStore, RetryPolicy};
    use ulid::Ulid;

    struct Fixture {
        jobs: Arc<InMemoryJobStore>,
        books: Arc<InMemoryBookStore>,
        orchestrator: ChapterOrchestrator,
        ctx: JobContext,
    }

    async fn fixture() -> Fixture {
        let jobs = Arc::new(InMemoryJobStore::new(RetryPolicy::immediate(0)));
        let books = Arc::new(InMemoryBookStore::new());
        books.save_skeleton(&two_section_skeleton()).await.unwrap();
        let orchestrator = ChapterOrchestrator::new(jobs.clone(), books.clone(), Duration::ZERO);
        Fixture {
            jobs,
            books,
            orchestrator,
            ctx: JobContext::new(JobId::from_ulid(Ulid::new())),
        }
    }

    fn start() -> ChapterTask {
        ChapterTask::new(&BookKey::new("book-a", "v1"), 0)
    }

    fn yielded(outcome: Outcome<ChapterTask>) -> ChapterTask {
        match outcome {
            Outcome::Yield { payload, .. } => payload,
            Outcome::Done(v) => panic!("expected yield, got done: {v}"),
        }
    }

    /// Claim the child section job and complete it with filled text.
    async fn finish_child(jobs: &InMemoryJobStore) {
        let child = jobs.claim_next().await.unwrap().unwrap();
        let task: SectionTask = serde_json::from_value(child.payload.clone()).unwrap();
        let mut section = task.section;
        for p in section.paragraphs_mut() {
            p.basis_text = format!("Generated {}", p.id);
        }
        let result = SectionResult {
            section,
            generated_blocks: 2,
        };
        jobs.complete(child.lease(), serde_json::to_value(result).unwrap())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn first_step_enqueues_first_section() {
        let f = fixture().await;
        let state = yielded(f.orchestrator.handle(start(), f.ctx).await.unwrap());

        let child_id = state.pending_section_job_id.unwrap();
        let child = f.jobs.get(child_id).await.unwrap().unwrap();
        assert_eq!(child.job_type, SectionTask::TYPE);
        assert_eq!(child.payload["section_index"], 0);
        assert_eq!(child.payload["context"]["sibling_titles"][0], "1.2 Section 2");
        assert_eq!(state.next_section_index, 0);
    }

    #[tokio::test]
    async fn running_child_means_yield_without_new_jobs() {
        let f = fixture().await;
        let state = yielded(f.orchestrator.handle(start(), f.ctx).await.unwrap());
        f.jobs.claim_next().await.unwrap();

        let again = yielded(f.orchestrator.handle(state.clone(), f.ctx).await.unwrap());
        assert_eq!(again, state);
        assert_eq!(f.jobs.counts().await.unwrap().total(), 1);
    }

    #[tokio::test]
    async fn rerun_before_payload_was_saved_reuses_child() {
        let f = fixture().await;
        let first = yielded(f.orchestrator.handle(start(), f.ctx).await.unwrap());
        // The yield was lost; the same attempt runs again from the old payload.
        let second = yielded(f.orchestrator.handle(start(), f.ctx).await.unwrap());

        assert_eq!(first.pending_section_job_id, second.pending_section_job_id);
        assert_eq!(f.jobs.counts().await.unwrap().total(), 1);
    }

    #[tokio::test]
    async fn walks_sections_then_compiles_last_chapter() {
        let f = fixture().await;
        let mut state = yielded(f.orchestrator.handle(start(), f.ctx).await.unwrap());

        finish_child(&f.jobs).await;
        state = yielded(f.orchestrator.handle(state, f.ctx).await.unwrap());
        assert_eq!(state.next_section_index, 1);

        finish_child(&f.jobs).await;
        let outcome = f.orchestrator.handle(state, f.ctx).await.unwrap();
        let Outcome::Done(value) = outcome else {
            panic!("expected done");
        };
        let result: ChapterResult = serde_json::from_value(value).unwrap();
        assert!(result.compiled);
        assert_eq!(result.sections, 2);
        assert_eq!(result.next_chapter_job_id, None);

        let key = BookKey::new("book-a", "v1");
        assert!(f.books.load_skeleton(&key).await.unwrap().is_fully_generated());
        let doc = f.books.load_canonical(&key).await.unwrap().unwrap();
        assert_eq!(doc.chapters[0].sections.len(), 2);
    }

    #[tokio::test]
    async fn failed_child_fails_chapter_with_restart_payload() {
        let f = fixture().await;
        let state = yielded(f.orchestrator.handle(start(), f.ctx).await.unwrap());
        let child = f.jobs.claim_next().await.unwrap().unwrap();
        f.jobs
            .fail(child.lease(), JobFailure::invalid_output("empty"))
            .await
            .unwrap();

        let err = f.orchestrator.handle(state, f.ctx).await.unwrap_err();

        // Budget 0: the child went straight to dead letter.
        assert_eq!(err.kind, ErrorKind::TransientInfra);
        assert!(err.message.contains("dead_letter"));
        let restart: ChapterTask = serde_json::from_value(err.restart_payload.unwrap()).unwrap();
        assert_eq!(restart, start());
    }

    #[tokio::test]
    async fn structural_child_failure_stays_terminal() {
        let f = fixture().await;
        let state = yielded(f.orchestrator.handle(start(), f.ctx).await.unwrap());
        let child = f.jobs.claim_next().await.unwrap().unwrap();
        f.jobs
            .fail(child.lease(), JobFailure::structural("bad numbering"))
            .await
            .unwrap();

        let err = f.orchestrator.handle(state, f.ctx).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::StructuralViolation);
        assert!(!err.kind.is_retryable());
    }

    #[tokio::test]
    async fn unknown_chapter_is_configuration_failure() {
        let f = fixture().await;
        let mut task = start();
        task.chapter_index = 7;
        let err = f.orchestrator.handle(task, f.ctx).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Configuration);
    }
}
