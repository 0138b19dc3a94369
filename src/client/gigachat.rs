//! GigaChat-style backend adapter.
//!
//! Epistemic foundation:
//! - K_i: the response shape is fixed (`choices[0].message.content`)
//! - B_i: each attempt may fail in transport or in content; one loop
//!   covers both
//! - I^B: on exhaustion this path degrades to a diagnostic string instead
//!   of failing; callers that need to distinguish must inspect the text

use crate::client::response::{
    contains_error_patterns, dump_response, truncate_chars, RawResponse,
};
use crate::models::{
    CallResult, DoxaError, GigaChatConfig, Message, ResponseMetadata, Result, RetryConfig, Role,
};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Serialize;
use std::time::Duration;
use tracing::{error, info, warn};

/// Fallback text when no attempt produced anything better.
pub const API_ERROR_OUTPUT: &str = "Error during API call. Please try again.";

/// Chat request in the backend's wire format.
#[derive(Debug, Clone, Serialize)]
pub struct GigaChatRequest {
    pub model: String,
    pub messages: Vec<GigaChatMessage>,
    pub temperature: f64,
    pub top_p: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    pub profanity_check: bool,
}

/// Message in the backend's wire format.
#[derive(Debug, Clone, Serialize)]
pub struct GigaChatMessage {
    pub role: Role,
    pub content: String,
}

impl From<&Message> for GigaChatMessage {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role,
            content: message.content.clone(),
        }
    }
}

/// Build the wire request from the uniform call parameters.
///
/// The backend has no direct zero-temperature knob: a requested
/// temperature of exactly 0 goes out as `temperature = 1, top_p = 0`.
pub fn build_request(
    model: &str,
    messages: &[Message],
    temperature: f64,
    max_tokens: Option<u32>,
    profanity_check: bool,
) -> GigaChatRequest {
    let (temperature, top_p) = if temperature == 0.0 {
        (1.0, 0.0)
    } else {
        (temperature, 1.0)
    };

    GigaChatRequest {
        model: model.to_string(),
        messages: messages.iter().map(GigaChatMessage::from).collect(),
        temperature,
        top_p,
        max_tokens,
        profanity_check,
    }
}

/// The `chat` primitive a GigaChat-style endpoint must provide.
#[allow(async_fn_in_trait)]
pub trait GigaChatTransport {
    async fn chat(&self, request: &GigaChatRequest) -> Result<RawResponse>;
}

/// HTTP transport for a GigaChat-style endpoint.
///
/// Built once per orchestrated call with connection parameters frozen
/// from config; reused only across that call's attempts.
pub struct HttpTransport {
    client: reqwest::Client,
    credentials: String,
    base_url: String,
    scope: String,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(settings: &GigaChatConfig, credentials: String) -> Result<Self> {
        let timeout = Duration::from_secs(settings.timeout_secs);
        // The service presents certificates from a private CA.
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(DoxaError::Network)?;

        Ok(Self {
            client,
            credentials,
            base_url: settings.base_url.clone(),
            scope: settings.scope.clone(),
            timeout,
        })
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", self.credentials)) {
            headers.insert(AUTHORIZATION, value);
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let (Ok(name), Ok(value)) = (
            HeaderName::try_from("X-Scope"),
            HeaderValue::from_str(&self.scope),
        ) {
            headers.insert(name, value);
        }
        headers
    }
}

impl GigaChatTransport for HttpTransport {
    async fn chat(&self, request: &GigaChatRequest) -> Result<RawResponse> {
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
            return Err(DoxaError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        RawResponse::from_json_body(&body)
    }
}

/// The response shape is fixed; anything else counts as a failed attempt.
fn extract_fixed(response: &RawResponse) -> Result<String> {
    match response {
        RawResponse::Completion(completion) => completion
            .choices
            .as_ref()
            .and_then(|choices| choices.first())
            .and_then(|choice| choice.message.as_ref())
            .and_then(|message| message.content.clone())
            .ok_or_else(|| DoxaError::Structural("no choices in response".to_string())),
        _ => Err(DoxaError::Structural(
            "response is not a chat completion".to_string(),
        )),
    }
}

/// Run one orchestrated call: a single retry loop covering transport
/// failures and content-pattern failures alike.
///
/// Attempt `i` (i > 0) first sleeps `retry_sleep * (1 + i*0.5)`; the
/// delay grows linearly, not exponentially. On exhaustion the text
/// degrades to a diagnostic string: `"Error during API call: …"` after a
/// transport failure,
/// `"API returned error pattern: …"` (content truncated to 100 chars)
/// after a content failure. This function never fails.
pub async fn complete_with_retries<T: GigaChatTransport>(
    transport: &T,
    request: &GigaChatRequest,
    retry: &RetryConfig,
) -> CallResult {
    let mut output = API_ERROR_OUTPUT.to_string();
    let mut metadata = ResponseMetadata::default();

    info!(model = %request.model, "API request (GigaChat)");

    for attempt in 0..retry.max_attempts {
        if attempt > 0 {
            let delay_secs = retry.retry_sleep_secs * (1.0 + attempt as f64 * 0.5);
            info!(
                model = %request.model,
                attempt = attempt + 1,
                max_attempts = retry.max_attempts,
                delay_secs,
                "Retrying"
            );
            tokio::time::sleep(Duration::from_secs_f64(delay_secs.max(0.0))).await;
        }
        let last_attempt = attempt + 1 == retry.max_attempts;

        let attempt_result = transport.chat(request).await.and_then(|response| {
            metadata = ResponseMetadata::from_response(&response);
            let text = extract_fixed(&response)?;
            Ok((text, response))
        });

        match attempt_result {
            Ok((text, response)) => {
                if contains_error_patterns(&text) {
                    warn!(
                        model = %request.model,
                        attempt = attempt + 1,
                        "Error pattern in response"
                    );
                    warn!(
                        model = %request.model,
                        response = %dump_response(&response),
                        "Full response"
                    );
                    if last_attempt {
                        output = format!(
                            "API returned error pattern: {}",
                            truncate_chars(text.trim(), 100)
                        );
                    }
                    continue;
                }

                info!(
                    model = %request.model,
                    total_tokens = metadata.total_tokens,
                    "Success"
                );
                output = text;
                break;
            }
            Err(e) => {
                error!(
                    model = %request.model,
                    attempt = attempt + 1,
                    error_type = e.kind(),
                    error = %e,
                    "Attempt failed"
                );
                if last_attempt {
                    error!(
                        model = %request.model,
                        attempts = retry.max_attempts,
                        "All retry attempts exhausted"
                    );
                    output = format!("Error during API call: {e}");
                }
            }
        }
    }

    CallResult {
        text: output,
        metadata,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct ScriptedTransport {
        responses: Mutex<VecDeque<Result<RawResponse>>>,
        calls: AtomicU32,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<Result<RawResponse>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl GigaChatTransport for ScriptedTransport {
        async fn chat(&self, _request: &GigaChatRequest) -> Result<RawResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(DoxaError::Internal("script exhausted".to_string())))
        }
    }

    fn completion(content: &str, total_tokens: u32) -> Result<RawResponse> {
        RawResponse::from_json_body(
            &json!({
                "choices": [{"message": {"role": "assistant", "content": content}}],
                "usage": {
                    "prompt_tokens": 1,
                    "completion_tokens": total_tokens.saturating_sub(1),
                    "total_tokens": total_tokens
                }
            })
            .to_string(),
        )
    }

    fn transport_error() -> Result<RawResponse> {
        Err(DoxaError::Api {
            status: 502,
            message: "bad gateway".to_string(),
        })
    }

    fn fast_retry(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            retry_sleep_secs: 0.0,
            ..Default::default()
        }
    }

    fn request() -> GigaChatRequest {
        build_request("GigaChat-Pro", &[Message::user("hi")], 0.7, Some(128), true)
    }

    #[test]
    fn zero_temperature_remaps_to_top_p() {
        let request = build_request("GigaChat-Pro", &[Message::user("hi")], 0.0, None, true);
        assert_eq!(request.temperature, 1.0);
        assert_eq!(request.top_p, 0.0);

        let wire = serde_json::to_value(&request).unwrap();
        assert_eq!(wire["temperature"], json!(1.0));
        assert_eq!(wire["top_p"], json!(0.0));
        assert!(wire.get("max_tokens").is_none());
    }

    #[test]
    fn nonzero_temperature_passes_through() {
        let request = build_request("GigaChat-Pro", &[Message::user("hi")], 0.7, Some(64), false);
        assert_eq!(request.temperature, 0.7);
        assert_eq!(request.top_p, 1.0);
        let wire = serde_json::to_value(&request).unwrap();
        assert_eq!(wire["max_tokens"], json!(64));
        assert_eq!(wire["profanity_check"], json!(false));
    }

    #[tokio::test]
    async fn recovers_after_transport_failures() {
        let transport = ScriptedTransport::new(vec![
            transport_error(),
            transport_error(),
            completion("clean answer", 3),
        ]);

        let result = complete_with_retries(&transport, &request(), &fast_retry(5)).await;
        assert_eq!(result.text, "clean answer");
        assert_eq!(result.metadata.total_tokens, 3);
        // Success ends the loop: no further attempts were made.
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn content_error_exhaustion_degrades_to_diagnostic() {
        let transport = ScriptedTransport::new(vec![
            completion("Error: API request failed", 5),
            completion("Error: API request failed", 7),
            completion("Error: API request failed", 9),
        ]);

        let result = complete_with_retries(&transport, &request(), &fast_retry(3)).await;
        assert_eq!(
            result.text,
            "API returned error pattern: Error: API request failed"
        );
        // Usage comes from the final attempt only.
        assert_eq!(result.metadata.total_tokens, 9);
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn long_offending_content_is_truncated() {
        let long = format!("Error: API request failed {}", "x".repeat(120));
        let transport = ScriptedTransport::new(vec![completion(&long, 2), completion(&long, 2)]);

        let result = complete_with_retries(&transport, &request(), &fast_retry(2)).await;
        let prefix = "API returned error pattern: ";
        assert!(result.text.starts_with(prefix));
        assert!(result.text.ends_with("..."));
        // 100 chars of content plus the ellipsis.
        assert_eq!(result.text.chars().count(), prefix.chars().count() + 103);
    }

    #[tokio::test]
    async fn transport_exhaustion_embeds_the_failure() {
        let transport = ScriptedTransport::new(vec![transport_error(), transport_error()]);

        let result = complete_with_retries(&transport, &request(), &fast_retry(2)).await;
        assert!(result.text.starts_with("Error during API call:"));
        assert!(result.text.contains("bad gateway"));
        assert_eq!(result.metadata, ResponseMetadata::default());
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn structural_failure_retries_like_transport_failure() {
        let transport = ScriptedTransport::new(vec![
            RawResponse::from_json_body(r#"{"choices": []}"#),
            completion("recovered", 4),
        ]);

        let result = complete_with_retries(&transport, &request(), &fast_retry(3)).await;
        assert_eq!(result.text, "recovered");
        assert_eq!(transport.calls(), 2);
    }
}
