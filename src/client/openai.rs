//! OpenAI-compatible backend adapter.
//!
//! Epistemic foundation:
//! - K_i: the OpenAI chat-completions schema is the de facto standard
//! - B_i: the endpoint will respond within timeout (might fail)
//! - B_i: the body will be a well-shaped completion (might not: proxies
//!   and aggregators serve several near-miss shapes)

use crate::client::response::{
    contains_error_patterns, dump_response, truncate_chars, RawResponse,
};
use crate::models::{CallResult, DoxaError, Message, ResponseMetadata, Result};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

/// Chat completion request payload.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// API error response body.
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// The send-and-receive primitive an OpenAI-compatible endpoint must
/// provide. The seam lets tests substitute a scripted transport.
#[allow(async_fn_in_trait)]
pub trait OpenAiTransport {
    async fn send(&self, request: &ChatRequest) -> Result<RawResponse>;
}

/// HTTP transport over an OpenAI-compatible endpoint.
#[derive(Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(api_key: String, base_url: String, timeout_secs: u64) -> Result<Self> {
        let timeout = Duration::from_secs(timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(DoxaError::Network)?;

        Ok(Self {
            client,
            api_key,
            base_url,
            timeout,
        })
    }

    /// Build headers for a request.
    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", self.api_key)) {
            headers.insert(AUTHORIZATION, value);
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers
    }
}

impl OpenAiTransport for HttpTransport {
    async fn send(&self, request: &ChatRequest) -> Result<RawResponse> {
        let url = format!("{}/chat/completions", self.base_url);

        let response = self
            .client
            .post(&url)
            .headers(self.headers())
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DoxaError::Timeout(self.timeout)
                } else {
                    DoxaError::Network(e)
                }
            })?;

        let status = response.status();
        let body = response.text().await.map_err(DoxaError::Network)?;

        if !status.is_success() {
            let message = serde_json::from_str::<ApiErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(DoxaError::Api {
                status: status.as_u16(),
                message,
            });
        }

        RawResponse::from_json_body(&body)
    }
}

/// One attempt against an OpenAI-compatible backend: send, extract usage,
/// run the content cascade.
///
/// A content-pattern match is logged with a truncated dump but the text is
/// returned unchanged: only decode/structural failures feed the caller's
/// retry policy. The sibling backend retries on pattern matches; this one
/// does not.
pub async fn request_once<T: OpenAiTransport>(
    transport: &T,
    request: &ChatRequest,
) -> Result<CallResult> {
    info!(model = %request.model, "API request");

    let response = transport.send(request).await?;
    let metadata = ResponseMetadata::from_response(&response);
    let text = response.extract_content()?;

    if contains_error_patterns(&text) {
        warn!(
            model = %request.model,
            content = %truncate_chars(text.trim(), 100),
            "Error pattern in response"
        );
        warn!(model = %request.model, response = %dump_response(&response), "Full response");
    } else {
        info!(
            model = %request.model,
            total_tokens = metadata.total_tokens,
            "Success"
        );
    }

    Ok(CallResult { text, metadata })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct FixedTransport(fn() -> Result<RawResponse>);

    impl OpenAiTransport for FixedTransport {
        async fn send(&self, _request: &ChatRequest) -> Result<RawResponse> {
            (self.0)()
        }
    }

    fn request() -> ChatRequest {
        ChatRequest {
            model: "gpt-4o".to_string(),
            messages: vec![Message::user("hi")],
            temperature: 0.2,
            max_tokens: None,
        }
    }

    #[test]
    fn max_tokens_is_omitted_when_unset() {
        let wire = serde_json::to_value(request()).unwrap();
        assert!(wire.get("max_tokens").is_none());

        let mut with_cap = request();
        with_cap.max_tokens = Some(256);
        let wire = serde_json::to_value(with_cap).unwrap();
        assert_eq!(wire["max_tokens"], json!(256));
    }

    #[tokio::test]
    async fn clean_completion_returns_text_and_usage() {
        let transport = FixedTransport(|| {
            RawResponse::from_json_body(
                &json!({
                    "choices": [{"message": {"content": "hello"}}],
                    "usage": {"prompt_tokens": 2, "completion_tokens": 1, "total_tokens": 3}
                })
                .to_string(),
            )
        });

        let result = request_once(&transport, &request()).await.unwrap();
        assert_eq!(result.text, "hello");
        assert_eq!(result.metadata.total_tokens, 3);
    }

    #[tokio::test]
    async fn pattern_match_is_returned_as_is() {
        // Content-pattern detection is observational on this backend: the
        // text comes back unchanged, no error, no retry trigger.
        let transport = FixedTransport(|| {
            RawResponse::from_json_body(
                &json!({
                    "choices": [{"message": {"content": "Error: API request failed, please try again"}}]
                })
                .to_string(),
            )
        });

        let result = request_once(&transport, &request()).await.unwrap();
        assert_eq!(result.text, "Error: API request failed, please try again");
    }

    #[tokio::test]
    async fn structural_failure_propagates() {
        let transport =
            FixedTransport(|| RawResponse::from_json_body(r#"{"choices": []}"#));
        let err = request_once(&transport, &request()).await.unwrap_err();
        assert!(matches!(err, DoxaError::Structural(_)));
    }

    #[tokio::test]
    async fn transport_failure_propagates_unmodified() {
        let transport = FixedTransport(|| {
            Err(DoxaError::Api {
                status: 500,
                message: "upstream exploded".to_string(),
            })
        });
        let err = request_once(&transport, &request()).await.unwrap_err();
        assert!(matches!(err, DoxaError::Api { status: 500, .. }));
    }
}
