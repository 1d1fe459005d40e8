//! HttpModel - messages 形式の JSON HTTP API を呼ぶ LanguageModel 実装

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::ports::{LanguageModel, ModelError, ModelRequest};

const API_VERSION: &str = "2023-06-01";

#[derive(Debug, Clone, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Clone, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Clone, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    content_type: String,
    #[serde(default)]
    text: String,
}

pub struct HttpModel {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl HttpModel {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ModelError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()
            .map_err(|e| ModelError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model: model.into(),
        })
    }
}

#[async_trait]
impl LanguageModel for HttpModel {
    async fn generate(&self, request: &ModelRequest) -> Result<String, ModelError> {
        let body = MessagesRequest {
            model: &self.model,
            max_tokens: request.max_tokens,
            system: &request.system,
            messages: vec![Message {
                role: "user",
                content: &request.prompt,
            }],
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ModelError::Timeout
                } else {
                    ModelError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            let message = response.text().await.unwrap_or_default();
            return Err(ModelError::Unavailable(format!("status {}: {message}", status.as_u16())));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ModelError::Rejected(format!("status {}: {message}", status.as_u16())));
        }

        let body: MessagesResponse = response
            .json()
            .await
            .map_err(|e| ModelError::Malformed(e.to_string()))?;
        let text: String = body
            .content
            .into_iter()
            .filter(|b| b.content_type == "text")
            .map(|b| b.text)
            .collect();
        if text.trim().is_empty() {
            return Err(ModelError::Malformed("response has no text content".into()));
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> ModelRequest {
        ModelRequest {
            system: "You write textbooks.".into(),
            prompt: "Write 1.1".into(),
            context: serde_json::json!({}),
            max_tokens: 256,
        }
    }

    async fn model_for(server: &MockServer) -> HttpModel {
        HttpModel::new(
            format!("{}/v1/messages", server.uri()),
            "test-key",
            "test-model",
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn joins_text_blocks() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "msg_1",
                "content": [
                    {"type": "text", "text": "{\"paragraphs\":"},
                    {"type": "text", "text": "[]}"}
                ]
            })))
            .mount(&server)
            .await;

        let text = model_for(&server).await.generate(&request()).await.unwrap();
        assert_eq!(text, "{\"paragraphs\":[]}");
    }

    #[tokio::test]
    async fn rate_limit_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let err = model_for(&server).await.generate(&request()).await.unwrap_err();
        assert!(matches!(err, ModelError::Unavailable(m) if m.contains("429")));
    }

    #[tokio::test]
    async fn client_error_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad prompt"))
            .mount(&server)
            .await;

        let err = model_for(&server).await.generate(&request()).await.unwrap_err();
        assert!(matches!(err, ModelError::Rejected(m) if m.contains("bad prompt")));
    }

    #[tokio::test]
    async fn empty_content_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"content": []})))
            .mount(&server)
            .await;

        let err = model_for(&server).await.generate(&request()).await.unwrap_err();
        assert!(matches!(err, ModelError::Malformed(_)));
    }
}
