//! Errors - エラー型と分類
//!
//! - `ErrorKind`: ジョブ失敗の運用分類（リトライするかどうかはここで決まる）
//! - `JobFailure`: ジョブレコードに記録される失敗
//! - `StructuralViolation`: Skeleton の構造不変条件違反
//! - `FolioError`: ライブラリ全体のエラー

use std::fmt;

use serde::{Deserialize, Serialize};

use super::ids::JobId;

/// Operational classification of a job failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Timeouts, resets, provider unavailability.
    TransientInfra,
    /// The model answered but the answer failed structural validation.
    ModelOutputInvalid,
    /// The Skeleton breaks a compiler invariant. An authoring bug.
    StructuralViolation,
    /// Retry budget spent.
    Exhausted,
    /// The job cannot be routed or decoded (no handler, bad payload).
    Configuration,
}

impl ErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::TransientInfra | ErrorKind::ModelOutputInvalid)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::TransientInfra => "transient_infra",
            ErrorKind::ModelOutputInvalid => "model_output_invalid",
            ErrorKind::StructuralViolation => "structural_violation",
            ErrorKind::Exhausted => "exhausted",
            ErrorKind::Configuration => "configuration",
        };
        f.write_str(s)
    }
}

/// A failure reported by a handler and recorded on the job.
///
/// `restart_payload` is never persisted as part of the error. When set, the
/// job store swaps it in as the job payload on re-queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct JobFailure {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip)]
    pub restart_payload: Option<serde_json::Value>,
}

impl JobFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            restart_payload: None,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TransientInfra, message)
    }

    pub fn invalid_output(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ModelOutputInvalid, message)
    }

    pub fn structural(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::StructuralViolation, message)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    pub fn with_restart_payload(mut self, payload: serde_json::Value) -> Self {
        self.restart_payload = Some(payload);
        self
    }
}

/// One broken invariant, with the path of the offending node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub path: String,
    pub reason: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.reason)
    }
}

/// The Skeleton failed validation. Carries every violation found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub struct StructuralViolation {
    pub violations: Vec<Violation>,
}

impl StructuralViolation {
    pub fn single(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            violations: vec![Violation {
                path: path.into(),
                reason: reason.into(),
            }],
        }
    }
}

impl fmt::Display for StructuralViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "structural violation")?;
        for (i, v) in self.violations.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{sep}{v}")?;
        }
        Ok(())
    }
}

impl From<StructuralViolation> for JobFailure {
    fn from(err: StructuralViolation) -> Self {
        JobFailure::structural(err.to_string())
    }
}

/// Library-level error.
#[derive(Debug, thiserror::Error)]
pub enum FolioError {
    #[error("job not found: {0}")]
    JobNotFound(JobId),

    #[error("book not found: {book_id}/{version_id}")]
    BookNotFound { book_id: String, version_id: String },

    #[error("no canonical document for {book_id}/{version_id}, compile first")]
    CanonicalNotFound { book_id: String, version_id: String },

    #[error("chapter {chapter_index} not found in {book}")]
    ChapterNotFound { book: String, chapter_index: usize },

    #[error("handler not found for job_type={0}")]
    HandlerNotFound(String),

    #[error("duplicate handler for job_type={0}")]
    DuplicateHandler(String),

    #[error(transparent)]
    Structural(#[from] StructuralViolation),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("model error: {0}")]
    Model(String),
}

impl From<FolioError> for JobFailure {
    /// Storage and lookup errors inside a handler are retried; broken
    /// structure is not.
    fn from(err: FolioError) -> Self {
        match err {
            FolioError::Structural(v) => v.into(),
            FolioError::BookNotFound { .. }
            | FolioError::CanonicalNotFound { .. }
            | FolioError::ChapterNotFound { .. }
            | FolioError::HandlerNotFound(_)
            | FolioError::Json(_) => {
                JobFailure::configuration(err.to_string())
            }
            other => JobFailure::transient(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::transient(ErrorKind::TransientInfra, true)]
    #[case::invalid_output(ErrorKind::ModelOutputInvalid, true)]
    #[case::structural(ErrorKind::StructuralViolation, false)]
    #[case::exhausted(ErrorKind::Exhausted, false)]
    #[case::configuration(ErrorKind::Configuration, false)]
    fn retryable_kinds(#[case] kind: ErrorKind, #[case] retryable: bool) {
        assert_eq!(kind.is_retryable(), retryable);
    }

    #[test]
    fn kind_serializes_snake_case() {
        let s = serde_json::to_string(&ErrorKind::ModelOutputInvalid).unwrap();
        assert_eq!(s, "\"model_output_invalid\"");
    }

    #[test]
    fn restart_payload_is_not_persisted() {
        let f = JobFailure::transient("reset")
            .with_restart_payload(serde_json::json!({"next_section_index": 0}));
        let json = serde_json::to_value(&f).unwrap();
        assert!(json.get("restart_payload").is_none());
        assert_eq!(json["kind"], "transient_infra");
    }

    #[test]
    fn violation_display_lists_every_path() {
        let err = StructuralViolation {
            violations: vec![
                Violation {
                    path: "chapters[0].sections[1]".into(),
                    reason: "missing title".into(),
                },
                Violation {
                    path: "chapters[0].sections[2]".into(),
                    reason: "number 1.4 does not match position 1.3".into(),
                },
            ],
        };
        assert_eq!(
            err.to_string(),
            "structural violation: chapters[0].sections[1]: missing title; \
             chapters[0].sections[2]: number 1.4 does not match position 1.3"
        );
    }

    #[test]
    fn structural_folio_error_maps_to_non_retryable_failure() {
        let err = FolioError::Structural(StructuralViolation::single("x", "y"));
        let failure: JobFailure = err.into();
        assert_eq!(failure.kind, ErrorKind::StructuralViolation);
        assert!(!failure.kind.is_retryable());
    }
}
