//! Public sampling facade.
//!
//! One uniform call surface regardless of which backend family is
//! configured. The facade owns the resolved configuration, applies the
//! shared rate limit, packs the system prompt, and dispatches to the
//! backend-specific retry policy.
//!
//! Epistemic foundation:
//! - K_i: credentials are validated at construction, never at call time
//! - B_i: each call may exhaust its retry budget → Result (OpenAI path)
//!   or degraded text (GigaChat path)
//! - I^B: the two policies are intentionally asymmetric; see DESIGN.md

use crate::client::gigachat;
use crate::client::openai::{self, ChatRequest, OpenAiTransport};
use crate::client::{RateLimiter, RateLimiterRegistry};
use crate::models::{
    Backend, CallResult, Config, DoxaError, GigaChatConfig, Message, ResponseMetadata, Result,
    RetryConfig,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

/// Backend-specific connection state, fixed for the sampler's lifetime.
#[derive(Debug)]
enum Connection {
    OpenAi {
        transport: openai::HttpTransport,
        /// First characters of the key, for diagnostic log records only.
        credential_hint: String,
    },
    GigaChat {
        settings: GigaChatConfig,
        credentials: String,
    },
}

/// A configured client for one backend × model.
///
/// Instances targeting the same (backend, model) share a rate limiter
/// through the registry, so the configured minimum spacing holds across
/// all of them.
#[derive(Debug)]
pub struct Sampler {
    model: String,
    temperature: f64,
    max_tokens: Option<u32>,
    system_prompt: Option<String>,
    retry: RetryConfig,
    rate_limiter: Arc<RateLimiter>,
    connection: Connection,
}

impl Sampler {
    /// Build a sampler using the default process-wide limiter registry.
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::with_registry(config, RateLimiterRegistry::global())
    }

    /// Build a sampler against an explicit limiter registry.
    ///
    /// A missing credential for the selected backend fails here, before
    /// the first request.
    pub fn with_registry(config: &Config, registry: &RateLimiterRegistry) -> Result<Self> {
        let sampler = &config.sampler;

        let connection = match sampler.backend {
            Backend::OpenAi => {
                let api_key = config.openai.resolve_api_key()?;
                let credential_hint =
                    format!("{}...", api_key.chars().take(4).collect::<String>());
                let transport = openai::HttpTransport::new(
                    api_key,
                    config.openai.base_url.clone(),
                    config.openai.timeout_secs,
                )?;
                Connection::OpenAi {
                    transport,
                    credential_hint,
                }
            }
            Backend::GigaChat => {
                let credentials = config.gigachat.resolve_credentials()?;
                Connection::GigaChat {
                    settings: config.gigachat.clone(),
                    credentials,
                }
            }
        };

        let min_delay = Duration::from_secs_f64(sampler.request_delay_secs.max(0.0));
        let rate_limiter = registry.acquire(sampler.backend, &sampler.model, min_delay);

        Ok(Self {
            model: sampler.model.clone(),
            temperature: sampler.temperature,
            max_tokens: sampler.max_tokens,
            system_prompt: sampler.system_prompt.clone(),
            retry: config.retry.clone(),
            rate_limiter,
            connection,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn backend(&self) -> Backend {
        match &self.connection {
            Connection::OpenAi { .. } => Backend::OpenAi,
            Connection::GigaChat { .. } => Backend::GigaChat,
        }
    }

    /// Send a conversation and return the reply text.
    pub async fn call(&self, messages: &[Message]) -> Result<String> {
        let (text, _) = self.call_with_metadata(messages).await?;
        Ok(text)
    }

    /// Send a conversation and return the reply text plus token usage.
    ///
    /// An empty conversation is passed through to the backend untouched;
    /// the backend rejects or answers per its own rules.
    pub async fn call_with_metadata(
        &self,
        messages: &[Message],
    ) -> Result<(String, ResponseMetadata)> {
        self.rate_limiter.wait_if_needed().await;
        let messages = self.pack_messages(messages);

        match &self.connection {
            Connection::OpenAi {
                transport,
                credential_hint,
            } => {
                let request = ChatRequest {
                    model: self.model.clone(),
                    messages,
                    temperature: self.temperature,
                    max_tokens: self.max_tokens,
                };
                let result =
                    openai_complete(transport, &request, &self.retry, credential_hint).await?;
                Ok((result.text, result.metadata))
            }

            Connection::GigaChat {
                settings,
                credentials,
            } => {
                // A dedicated transport per orchestrated call, with
                // connection parameters frozen at construction.
                let transport = gigachat::HttpTransport::new(settings, credentials.clone())?;
                let request = gigachat::build_request(
                    &self.model,
                    &messages,
                    self.temperature,
                    self.max_tokens,
                    settings.profanity_check,
                );
                let result =
                    gigachat::complete_with_retries(&transport, &request, &self.retry).await;
                Ok((result.text, result.metadata))
            }
        }
    }

    /// Prepend the configured system prompt. Existing entries are never
    /// reordered or mutated.
    fn pack_messages(&self, messages: &[Message]) -> Vec<Message> {
        match &self.system_prompt {
            Some(prompt) => {
                let mut packed = Vec::with_capacity(messages.len() + 1);
                packed.push(Message::system(prompt.clone()));
                packed.extend_from_slice(messages);
                packed
            }
            None => messages.to_vec(),
        }
    }
}

/// OpenAI-compatible retry policy: the outer loop around whole adapter
/// attempts.
///
/// Only decode and structural failures are retryable, with a linearly
/// growing delay; everything else is fatal on first sight. On a fatal
/// failure or an exhausted budget, full detail (credential hint included)
/// goes to the diagnostic log and the error that escapes is redacted.
async fn openai_complete<T: OpenAiTransport>(
    transport: &T,
    request: &ChatRequest,
    retry: &RetryConfig,
    credential_hint: &str,
) -> Result<CallResult> {
    for attempt in 0..retry.decode_max_attempts {
        match openai::request_once(transport, request).await {
            Ok(result) => return Ok(result),
            Err(e) => {
                let last_attempt = attempt + 1 == retry.decode_max_attempts;
                if e.is_decode_retryable() && !last_attempt {
                    let delay_secs =
                        retry.decode_retry_delay_secs * (1.0 + attempt as f64 * 0.5);
                    warn!(
                        model = %request.model,
                        attempt = attempt + 1,
                        max_attempts = retry.decode_max_attempts,
                        error_type = e.kind(),
                        error = %e,
                        delay_secs,
                        "Retrying after decode failure"
                    );
                    tokio::time::sleep(Duration::from_secs_f64(delay_secs.max(0.0))).await;
                    continue;
                }

                error!(
                    model = %request.model,
                    credential = credential_hint,
                    error_type = e.kind(),
                    error = %e,
                    "API call failed"
                );
                return Err(DoxaError::CallFailed {
                    model: request.model.clone(),
                    source: Box::new(e),
                });
            }
        }
    }

    Err(DoxaError::Internal("retry budget was zero".to_string()))
}
