//! ScriptedModel - テスト・オフライン用の LanguageModel
//!
//! 登録した応答を順に返す。スクリプトが空になったら
//! `context.paragraph_ids` から決定的な本文を組み立てて返す。

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::ports::{LanguageModel, ModelError, ModelRequest};

#[derive(Debug, Clone)]
enum Step {
    Reply(Result<String, ModelError>),
    Stall(Duration),
}

#[derive(Debug, Default)]
pub struct ScriptedModel {
    script: Mutex<VecDeque<Step>>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedModel {
    /// Empty script: every call gets the offline answer.
    pub fn offline() -> Self {
        Self::default()
    }

    pub fn reply(self, text: impl Into<String>) -> Self {
        self.push(Step::Reply(Ok(text.into())))
    }

    pub fn fail(self, err: ModelError) -> Self {
        self.push(Step::Reply(Err(err)))
    }

    /// Sleep for `delay` before the next reply (to exercise timeouts).
    pub fn stall(self, delay: Duration) -> Self {
        self.push(Step::Stall(delay))
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn push(self, step: Step) -> Self {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(step);
        self
    }

    fn next_step(&self) -> Option<Step> {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn generate(&self, request: &ModelRequest) -> Result<String, ModelError> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());

        loop {
            match self.next_step() {
                Some(Step::Stall(delay)) => tokio::time::sleep(delay).await,
                Some(Step::Reply(reply)) => return reply,
                None => return offline_answer(request),
            }
        }
    }
}

fn offline_answer(request: &ModelRequest) -> Result<String, ModelError> {
    let title = request
        .context
        .get("section_title")
        .and_then(|v| v.as_str())
        .unwrap_or("this section");
    let ids = request
        .context
        .get("paragraph_ids")
        .and_then(|v| v.as_array())
        .ok_or_else(|| ModelError::Rejected("offline model needs context.paragraph_ids".into()))?;

    let paragraphs: Vec<serde_json::Value> = ids
        .iter()
        .filter_map(|id| id.as_str())
        .enumerate()
        .map(|(i, id)| {
            serde_json::json!({
                "id": id,
                "basis": format!("Paragraph {} of {title}.", i + 1),
            })
        })
        .collect();
    Ok(serde_json::json!({ "paragraphs": paragraphs }).to_string())
}
