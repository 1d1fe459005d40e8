//! Section Generator: the leaf handler.
//!
//! Input is one Section of the Skeleton plus sibling context; output is the
//! same Section with every paragraph filled. The handler never writes to the
//! book store. The orchestrator merges the returned Section, so a generator
//! run can only ever affect its own section.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::prompt::{GeneratedParagraph, parse_paragraphs, section_request};
use crate::domain::{BookKey, JobFailure, Outcome, PLACEHOLDER_TEXT, Section, SkeletonMeta};
use crate::ports::{LanguageModel, ModelError};
use crate::typed::{Handler, JobContext, Task};

pub const DEFAULT_MAX_TOKENS: u32 = 4096;

/// What the model is told about the surroundings of the section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SectionContext {
    pub chapter_title: String,
    #[serde(default)]
    pub sibling_titles: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionTask {
    pub meta: SkeletonMeta,
    pub chapter_index: usize,
    pub section_index: usize,
    pub section: Section,
    pub context: SectionContext,
}

impl Task for SectionTask {
    const TYPE: &'static str = "folio.section.generate.v1";
}

impl SectionTask {
    pub fn key(&self) -> BookKey {
        BookKey::new(&self.meta.book_id, &self.meta.version_id)
    }
}

/// Job result of a successful generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionResult {
    pub section: Section,
    pub generated_blocks: usize,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SectionError {
    #[error("model call timed out after {0:?}")]
    ModelTimeout(Duration),

    #[error("model call failed: {0}")]
    ModelRejected(ModelError),

    #[error("model output failed validation: {0}")]
    ValidationFailed(String),
}

impl From<SectionError> for JobFailure {
    fn from(err: SectionError) -> Self {
        match err {
            SectionError::ValidationFailed(_) => JobFailure::invalid_output(err.to_string()),
            SectionError::ModelTimeout(_) | SectionError::ModelRejected(_) => {
                JobFailure::transient(err.to_string())
            }
        }
    }
}

pub struct SectionGenerator {
    model: Arc<dyn LanguageModel>,
    timeout: Duration,
    max_tokens: u32,
}

impl SectionGenerator {
    pub fn new(model: Arc<dyn LanguageModel>, timeout: Duration) -> Self {
        Self {
            model,
            timeout,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// One model call under the timeout, then validation.
    pub async fn generate(&self, task: &SectionTask) -> Result<SectionResult, SectionError> {
        let request = section_request(&task.meta, &task.section, &task.context, self.max_tokens);

        let raw = match tokio::time::timeout(self.timeout, self.model.generate(&request)).await {
            Err(_elapsed) => return Err(SectionError::ModelTimeout(self.timeout)),
            Ok(Err(ModelError::Timeout)) => return Err(SectionError::ModelTimeout(self.timeout)),
            Ok(Err(ModelError::Malformed(m))) => return Err(SectionError::ValidationFailed(m)),
            Ok(Err(other)) => return Err(SectionError::ModelRejected(other)),
            Ok(Ok(raw)) => raw,
        };

        let generated = parse_paragraphs(&raw).map_err(SectionError::ValidationFailed)?;
        let section = fill_section(&task.section, generated).map_err(SectionError::ValidationFailed)?;
        let generated_blocks = section.paragraphs().count();
        Ok(SectionResult {
            section,
            generated_blocks,
        })
    }
}

/// Copy of `section` with generated text in every paragraph, or the reason
/// the output does not fit.
fn fill_section(section: &Section, generated: Vec<GeneratedParagraph>) -> Result<Section, String> {
    let expected = section.paragraphs().count();
    if generated.len() != expected {
        return Err(format!(
            "expected {expected} paragraphs, got {}",
            generated.len()
        ));
    }

    let mut filled = section.clone();
    for (slot, g) in filled.paragraphs_mut().zip(generated) {
        if slot.id != g.id {
            return Err(format!("expected paragraph '{}', got '{}'", slot.id, g.id));
        }
        let basis = g.basis.trim();
        if basis.is_empty() || basis.starts_with(PLACEHOLDER_TEXT) {
            return Err(format!("paragraph '{}' has no text", g.id));
        }
        slot.basis_text = basis.to_string();
        slot.practice_text = non_blank(g.practice);
        slot.depth_text = non_blank(g.depth);
    }
    Ok(filled)
}

fn non_blank(text: Option<String>) -> Option<String> {
    text.map(|t| t.trim().to_string()).filter(|t| !t.is_empty())
}

#[async_trait]
impl Handler<SectionTask> for SectionGenerator {
    async fn handle(
        &self,
        task: SectionTask,
        ctx: JobContext,
    ) -> Result<Outcome<SectionTask>, JobFailure> {
        let key = task.key();
        match self.generate(&task).await {
            Ok(result) => {
                tracing::info!(
                    job_id = %ctx.job_id,
                    book = %key,
                    chapter_index = task.chapter_index,
                    section_index = task.section_index,
                    blocks = result.generated_blocks,
                    "section generated"
                );
                let value = serde_json::to_value(&result)
                    .map_err(|e| JobFailure::configuration(format!("section result encode: {e}")))?;
                Ok(Outcome::done(value))
            }
            Err(err) => {
                tracing::warn!(
                    job_id = %ctx.job_id,
                    book = %key,
                    chapter_index = task.chapter_index,
                    section_index = task.section_index,
                    retry_count = ctx.retry_count,
                    error = %err,
                    "section generation failed"
                );
                Err(err.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ErrorKind;
    use crate::domain::skeleton::fixtures::two_section_skeleton;
    use crate::impls::ScriptedModel;
    use rstest::rstest;

    fn task() -> SectionTask {
        let sk = two_section_skeleton();
        SectionTask {
            meta: sk.meta.clone(),
            chapter_index: 0,
            section_index: 0,
            section: sk.chapters[0].sections[0].clone(),
            context: SectionContext {
                chapter_title: "The cell".into(),
                sibling_titles: vec!["1.2 Section 2".into()],
            },
        }
    }

    fn answer(ids: &[&str]) -> String {
        let paragraphs: Vec<_> = ids
            .iter()
            .map(|id| serde_json::json!({"id": id, "basis": format!("About {id}."), "practice": " "}))
            .collect();
        serde_json::json!({ "paragraphs": paragraphs }).to_string()
    }

    fn generator(model: ScriptedModel) -> SectionGenerator {
        SectionGenerator::new(Arc::new(model), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn fills_every_paragraph_of_the_section() {
        let model = ScriptedModel::offline().reply(answer(&["ch1-s1-sp1-p1", "ch1-s1-sp1-p2"]));
        let result = generator(model).generate(&task()).await.unwrap();

        assert_eq!(result.generated_blocks, 2);
        assert!(result.section.is_generated());
        let first = result.section.paragraphs().next().unwrap();
        assert_eq!(first.basis_text, "About ch1-s1-sp1-p1.");
        assert_eq!(first.practice_text, None);
        assert_eq!(result.section.id, "ch1-s1");
    }

    #[rstest]
    #[case::too_few(answer(&["ch1-s1-sp1-p1"]), "expected 2 paragraphs")]
    #[case::wrong_order(answer(&["ch1-s1-sp1-p2", "ch1-s1-sp1-p1"]), "expected paragraph")]
    #[case::placeholder(
        serde_json::json!({"paragraphs": [
            {"id": "ch1-s1-sp1-p1", "basis": "[[placeholder]]"},
            {"id": "ch1-s1-sp1-p2", "basis": "ok"}
        ]}).to_string(),
        "has no text"
    )]
    #[case::not_json("I'd rather not.".to_string(), "no JSON object")]
    #[tokio::test]
    async fn unvalidated_output_is_validation_failure(#[case] raw: String, #[case] reason: &str) {
        let err = generator(ScriptedModel::offline().reply(raw))
            .generate(&task())
            .await
            .unwrap_err();
        assert!(matches!(&err, SectionError::ValidationFailed(m) if m.contains(reason)), "{err}");
        assert_eq!(JobFailure::from(err).kind, ErrorKind::ModelOutputInvalid);
    }

    #[tokio::test]
    async fn slow_model_times_out_as_transient() {
        let model = ScriptedModel::offline().stall(Duration::from_millis(200));
        let generator = SectionGenerator::new(Arc::new(model), Duration::from_millis(20));

        let err = generator.generate(&task()).await.unwrap_err();
        assert!(matches!(err, SectionError::ModelTimeout(_)));
        assert_eq!(JobFailure::from(err).kind, ErrorKind::TransientInfra);
    }

    #[tokio::test]
    async fn provider_failure_is_transient() {
        let model = ScriptedModel::offline().fail(ModelError::Unavailable("503".into()));
        let err = generator(model).generate(&task()).await.unwrap_err();
        assert!(matches!(err, SectionError::ModelRejected(_)));
        assert_eq!(JobFailure::from(err).kind, ErrorKind::TransientInfra);
    }

    #[tokio::test]
    async fn handler_returns_section_as_job_result() {
        let ctx = JobContext::new(crate::domain::JobId::from_ulid(ulid::Ulid::new()));
        let outcome = generator(ScriptedModel::offline())
            .handle(task(), ctx)
            .await
            .unwrap();

        let Outcome::Done(value) = outcome else {
            panic!("expected done");
        };
        let result: SectionResult = serde_json::from_value(value).unwrap();
        assert!(result.section.is_generated());
    }
}
