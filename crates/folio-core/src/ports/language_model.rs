//! LanguageModel port - 外部の言語モデル呼び出し
//!
//! 遅い、たまに非決定的、たまに壊れた出力を返す。呼び出し側で必ず検証する。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::JobFailure;

/// One text-in/text-out request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRequest {
    pub system: String,
    pub prompt: String,
    /// Structured context for the call (ids of the requested blocks, sibling
    /// titles, ...). Implementations may ignore it.
    #[serde(default)]
    pub context: serde_json::Value,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ModelError {
    #[error("model call timed out")]
    Timeout,

    #[error("model unavailable: {0}")]
    Unavailable(String),

    #[error("model rejected the request: {0}")]
    Rejected(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed model response: {0}")]
    Malformed(String),
}

impl From<ModelError> for JobFailure {
    /// A malformed answer is worth re-prompting; everything else is
    /// infrastructure.
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::Malformed(_) => JobFailure::invalid_output(err.to_string()),
            other => JobFailure::transient(other.to_string()),
        }
    }
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, request: &ModelRequest) -> Result<String, ModelError>;
}
