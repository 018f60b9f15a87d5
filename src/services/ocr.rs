//! OCR via an image-grounded chat request.
//!
//! The OCR backend is an Ollama-style REST API: we POST a single user
//! message whose text is the fixed instruction `<image>\nFree OCR.` and
//! whose attachment is the base64-encoded page PNG, and read back the
//! assistant message content as the page's raw text. The model is asked
//! for a plain transcription — all structure recovery happens later in
//! the segmentation stages, never here.
//!
//! The call is deliberately not retried: a failed page aborts the run and
//! the resume scanner picks up at exactly that page next time, which is
//! cheaper and safer than guessing which OCR failures are transient.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Fixed instruction sent with every page image.
const FREE_OCR_PROMPT: &str = "<image>\nFree OCR.";

/// Client for the OCR/chat service.
pub struct OcrClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
    images: Vec<String>,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: Option<ChatResponseMessage>,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Deserialize)]
struct ModelTag {
    name: String,
}

impl OcrClient {
    /// Build a client from the pipeline config.
    pub fn new(config: &PipelineConfig) -> Result<Self, PipelineError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.ocr_timeout_secs))
            .build()
            .map_err(|e| PipelineError::InvalidConfig(format!("HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: config.ocr_base_url.clone(),
            token: config.token.clone(),
        })
    }

    /// Transcribe one page image, returning the model's free-text OCR.
    ///
    /// `page` is only used for error context. An absent assistant message
    /// yields an empty string, which the caller persists as-is — the
    /// resume scanner then treats that page as still unprocessed.
    pub async fn free_ocr(
        &self,
        model: &str,
        page: usize,
        image: &[u8],
    ) -> Result<String, PipelineError> {
        let payload = ChatRequest {
            model,
            messages: vec![ChatMessage {
                role: "user",
                content: FREE_OCR_PROMPT,
                images: vec![STANDARD.encode(image)],
            }],
            stream: false,
        };

        let mut request = self
            .http
            .post(format!("{}/api/chat", self.base_url))
            .json(&payload);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| PipelineError::OcrFailed {
            page,
            detail: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::OcrFailed {
                page,
                detail: format!("HTTP {status}"),
            });
        }

        let body: ChatResponse =
            response.json().await.map_err(|e| PipelineError::OcrFailed {
                page,
                detail: format!("invalid JSON response: {e}"),
            })?;

        let text = body.message.map(|m| m.content).unwrap_or_default();
        debug!("page {page}: OCR returned {} bytes", text.len());
        Ok(text)
    }

    /// List the model names the service has available (`/api/tags`).
    pub async fn list_models(&self) -> Result<Vec<String>, PipelineError> {
        let mut request = self.http.get(format!("{}/api/tags", self.base_url));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| PipelineError::OcrFailed {
            page: 0,
            detail: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::OcrFailed {
                page: 0,
                detail: format!("HTTP {status}"),
            });
        }

        let body: TagsResponse =
            response.json().await.map_err(|e| PipelineError::OcrFailed {
                page: 0,
                detail: format!("invalid JSON response: {e}"),
            })?;

        Ok(body.models.into_iter().map(|m| m.name).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn client_for(server: &MockServer) -> OcrClient {
        let config = PipelineConfig::builder()
            .ocr_base_url(server.base_url())
            .token("test-token")
            .build()
            .unwrap();
        OcrClient::new(&config).unwrap()
    }

    #[tokio::test]
    async fn free_ocr_sends_image_and_reads_content() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/chat")
                    .header("authorization", "Bearer test-token")
                    .json_body_partial(r#"{"stream": false, "model": "llava"}"#);
                then.status(200)
                    .json_body(json!({"message": {"role": "assistant", "content": "Page text."}}));
            })
            .await;

        let client = client_for(&server);
        let text = client.free_ocr("llava", 1, b"\x89PNG fake").await.unwrap();

        mock.assert_async().await;
        assert_eq!(text, "Page text.");
    }

    #[tokio::test]
    async fn free_ocr_missing_message_is_empty_text() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/chat");
                then.status(200).json_body(json!({"done": true}));
            })
            .await;

        let client = client_for(&server);
        let text = client.free_ocr("llava", 2, b"png").await.unwrap();
        assert!(text.is_empty());
    }

    #[tokio::test]
    async fn free_ocr_surfaces_http_errors() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/chat");
                then.status(500);
            })
            .await;

        let client = client_for(&server);
        let err = client.free_ocr("llava", 3, b"png").await.unwrap_err();
        match err {
            PipelineError::OcrFailed { page, detail } => {
                assert_eq!(page, 3);
                assert!(detail.contains("500"), "got: {detail}");
            }
            other => panic!("expected OcrFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn list_models_reads_tag_names() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/tags");
                then.status(200).json_body(json!({
                    "models": [{"name": "llava"}, {"name": "llama3.2-vision"}]
                }));
            })
            .await;

        let client = client_for(&server);
        let models = client.list_models().await.unwrap();
        assert_eq!(models, vec!["llava", "llama3.2-vision"]);
    }
}
