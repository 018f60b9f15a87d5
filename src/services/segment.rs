//! Sentence and discourse segmentation service clients.
//!
//! ## Retry strategy
//!
//! The sentence splitter is the one dependency that routinely sheds load
//! with HTTP 503, so `split` retries exactly that status — up to
//! `max_split_retries` attempts with doubling backoff starting at
//! `split_backoff_ms` — and surfaces every other failure immediately.
//! The discourse endpoint and the OCR call are not retried at all; that
//! asymmetry mirrors the observed behaviour of the services and is kept
//! as specified.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Client for both segmentation endpoints.
///
/// They share the bearer token and differ only in URL, timeout, and
/// response shape, so one struct carries both.
pub struct SegmentationClient {
    http: reqwest::Client,
    split_url: String,
    rst_url: String,
    token: Option<String>,
    split_timeout: Duration,
    rst_timeout: Duration,
    max_retries: u32,
    backoff_ms: u64,
}

#[derive(Serialize)]
struct SplitRequest<'a> {
    texts: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    threshold: Option<f64>,
}

#[derive(Deserialize)]
struct SplitResponse {
    #[serde(default)]
    segments: Vec<Vec<String>>,
}

#[derive(Serialize)]
struct DiscourseRequest<'a> {
    text: &'a str,
}

impl SegmentationClient {
    /// Build a client from the pipeline config.
    pub fn new(config: &PipelineConfig) -> Result<Self, PipelineError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| PipelineError::InvalidConfig(format!("HTTP client: {e}")))?;
        Ok(Self {
            http,
            split_url: config.split_base_url.clone(),
            rst_url: config.rst_base_url.clone(),
            token: config.token.clone(),
            split_timeout: Duration::from_secs(config.split_timeout_secs),
            rst_timeout: Duration::from_secs(config.rst_timeout_secs),
            max_retries: config.max_split_retries,
            backoff_ms: config.split_backoff_ms,
        })
    }

    /// Split `text` into sentence-level segments.
    ///
    /// The response nests segments one list per input text; we send a
    /// single text, flatten the nesting, and drop empty strings.
    pub async fn split(
        &self,
        text: &str,
        threshold: Option<f64>,
    ) -> Result<Vec<String>, PipelineError> {
        if self.split_url.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "split endpoint URL is empty; set PDF2SENT_SPLIT_BASE_URL".into(),
            ));
        }

        let payload = SplitRequest { texts: text, threshold };
        let mut backoff = Duration::from_millis(self.backoff_ms);
        let mut response = None;

        for attempt in 0..self.max_retries {
            let mut request = self
                .http
                .post(&self.split_url)
                .timeout(self.split_timeout)
                .json(&payload);
            if let Some(token) = &self.token {
                request = request.bearer_auth(token);
            }

            let resp = request
                .send()
                .await
                .map_err(|e| PipelineError::SegmentationFailed {
                    service: "wtpsplit".into(),
                    detail: e.to_string(),
                })?;

            if resp.status() != StatusCode::SERVICE_UNAVAILABLE {
                response = Some(resp);
                break;
            }
            if attempt + 1 < self.max_retries {
                warn!(
                    "split service busy (503), retry {}/{} in {:?}",
                    attempt + 1,
                    self.max_retries - 1,
                    backoff
                );
                sleep(backoff).await;
                backoff *= 2;
            }
        }

        let Some(response) = response else {
            return Err(PipelineError::ServiceOverloaded {
                attempts: self.max_retries,
            });
        };

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::SegmentationFailed {
                service: "wtpsplit".into(),
                detail: format!("HTTP {status}"),
            });
        }

        let body: SplitResponse =
            response
                .json()
                .await
                .map_err(|e| PipelineError::SegmentationFailed {
                    service: "wtpsplit".into(),
                    detail: format!("invalid JSON response: {e}"),
                })?;

        let segments: Vec<String> = body
            .segments
            .into_iter()
            .flatten()
            .filter(|s| !s.is_empty())
            .collect();
        debug!("split returned {} segments", segments.len());
        Ok(segments)
    }

    /// Discourse-level segmentation: inclusive `(start, end)` character
    /// offsets into `text`, in order. Not retried.
    pub async fn discourse_spans(&self, text: &str) -> Result<Vec<(usize, usize)>, PipelineError> {
        if self.rst_url.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "discourse endpoint URL is empty; set PDF2SENT_RST_BASE_URL".into(),
            ));
        }

        let mut request = self
            .http
            .post(&self.rst_url)
            .timeout(self.rst_timeout)
            .json(&DiscourseRequest { text });
        if let Some(token) = &self.token {
            if !token.is_empty() {
                request = request.bearer_auth(token);
            }
        }

        let response = request
            .send()
            .await
            .map_err(|e| PipelineError::SegmentationFailed {
                service: "isanlp-rst".into(),
                detail: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::SegmentationFailed {
                service: "isanlp-rst".into(),
                detail: format!("HTTP {status}"),
            });
        }

        response
            .json()
            .await
            .map_err(|e| PipelineError::SegmentationFailed {
                service: "isanlp-rst".into(),
                detail: format!("invalid JSON response: {e}"),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn client_for(server: &MockServer) -> SegmentationClient {
        let config = PipelineConfig::builder()
            .split_base_url(server.url("/split"))
            .rst_base_url(server.url("/rst"))
            .token("test-token")
            .split_backoff_ms(1)
            .build()
            .unwrap();
        SegmentationClient::new(&config).unwrap()
    }

    #[tokio::test]
    async fn split_flattens_and_drops_empty_segments() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/split")
                    .header("authorization", "Bearer test-token")
                    .json_body_partial(r#"{"texts": "One. Two."}"#);
                then.status(200)
                    .json_body(json!({"segments": [["One.", "", "Two."]]}));
            })
            .await;

        let client = client_for(&server);
        let segments = client.split("One. Two.", None).await.unwrap();

        mock.assert_async().await;
        assert_eq!(segments, vec!["One.".to_string(), "Two.".to_string()]);
    }

    #[tokio::test]
    async fn split_forwards_threshold_when_set() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/split")
                    .json_body_partial(r#"{"threshold": 0.25}"#);
                then.status(200).json_body(json!({"segments": [["x"]]}));
            })
            .await;

        let client = client_for(&server);
        client.split("x", Some(0.25)).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn split_exhausts_retries_on_persistent_503() {
        let server = MockServer::start_async().await;
        let busy = server
            .mock_async(|when, then| {
                when.method(POST).path("/split");
                then.status(503);
            })
            .await;

        let client = client_for(&server);
        let err = client.split("text", None).await.unwrap_err();
        assert!(
            matches!(err, PipelineError::ServiceOverloaded { attempts: 3 }),
            "got {err:?}"
        );
        busy.assert_hits_async(3).await;
    }

    #[tokio::test]
    async fn split_does_not_retry_other_errors() {
        let server = MockServer::start_async().await;
        let failing = server
            .mock_async(|when, then| {
                when.method(POST).path("/split");
                then.status(500);
            })
            .await;

        let client = client_for(&server);
        let err = client.split("text", None).await.unwrap_err();
        assert!(
            matches!(err, PipelineError::SegmentationFailed { .. }),
            "got {err:?}"
        );
        failing.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn split_without_url_is_a_config_error() {
        let config = PipelineConfig::default();
        let client = SegmentationClient::new(&config).unwrap();
        let err = client.split("text", None).await.unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn discourse_spans_parses_offset_pairs() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/rst")
                    .json_body_partial(r#"{"text": "A long clause, and another."}"#);
                then.status(200).json_body(json!([[0, 13], [14, 26]]));
            })
            .await;

        let client = client_for(&server);
        let spans = client
            .discourse_spans("A long clause, and another.")
            .await
            .unwrap();
        assert_eq!(spans, vec![(0, 13), (14, 26)]);
    }

    #[tokio::test]
    async fn discourse_spans_surfaces_errors_without_retry() {
        let server = MockServer::start_async().await;
        let failing = server
            .mock_async(|when, then| {
                when.method(POST).path("/rst");
                then.status(503);
            })
            .await;

        let client = client_for(&server);
        let err = client.discourse_spans("text").await.unwrap_err();
        assert!(
            matches!(err, PipelineError::SegmentationFailed { .. }),
            "got {err:?}"
        );
        failing.assert_hits_async(1).await;
    }
}
