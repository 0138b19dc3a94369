//! Response classification shared by both backends.
//!
//! Epistemic foundation:
//! - K_i: backends return one of a small closed set of payload shapes
//! - B_i: a syntactically valid response carries real content (might not:
//!   some backends return HTTP 200 with an error message as the body text)
//! - I^B: which shape arrives is unknowable per request → tagged union with
//!   a deterministic trial order

use crate::models::{DoxaError, ResponseMetadata, Result};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::sync::LazyLock;

/// Typed chat-completion body. Fields the backends sometimes omit are
/// optional; the extraction cascade decides what is usable.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletion {
    #[serde(default)]
    pub choices: Option<Vec<ChatChoice>>,
    #[serde(default)]
    pub usage: Option<ChatUsage>,
    /// Bare-content shape served by some proxies.
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatChoice {
    #[serde(default)]
    pub message: Option<ChatMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ChatUsage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

/// A backend response, classified into one of the legal shapes.
///
/// Nothing downstream of this boundary handles an untyped blob: the
/// transport classifies once, the cascade consumes the tag.
#[derive(Debug, Clone)]
pub enum RawResponse {
    /// Typed chat completion (the common case)
    Completion(ChatCompletion),
    /// A JSON document that is not a typed completion
    Mapping(Value),
    /// The response body is itself the reply text
    Text(String),
}

impl RawResponse {
    /// Classify a successful response body.
    ///
    /// A body that is not JSON at all is a decode failure; the caller's
    /// retry policy treats it as retryable. A JSON object without a
    /// `choices` collection stays a mapping so the cascade can try its
    /// remaining shapes.
    pub fn from_json_body(body: &str) -> Result<Self> {
        if body.trim().is_empty() {
            return Err(DoxaError::Decode("empty response body".to_string()));
        }

        let value: Value =
            serde_json::from_str(body).map_err(|e| DoxaError::Decode(e.to_string()))?;

        match value {
            Value::String(text) => Ok(RawResponse::Text(text)),
            value => match serde_json::from_value::<ChatCompletion>(value.clone()) {
                Ok(completion) if completion.choices.is_some() => {
                    Ok(RawResponse::Completion(completion))
                }
                _ => Ok(RawResponse::Mapping(value)),
            },
        }
    }

    /// Extract the reply text, trying the accepted shapes in a fixed
    /// order: typed `choices[0].message.content`, mapping
    /// `choices[0]["message"]["content"]`, the raw text itself, then a
    /// top-level `content` field.
    ///
    /// A `choices` collection that is present but yields no content is a
    /// structural failure, as is a response matching no shape at all.
    pub fn extract_content(&self) -> Result<String> {
        match self {
            RawResponse::Completion(completion) => match &completion.choices {
                Some(choices) => {
                    let content = choices
                        .first()
                        .and_then(|c| c.message.as_ref())
                        .and_then(|m| m.content.clone());
                    content.ok_or_else(|| {
                        DoxaError::Structural("no extractable content in choices".to_string())
                    })
                }
                None => completion.content.clone().ok_or_else(|| {
                    DoxaError::Structural("response carries neither choices nor content".to_string())
                }),
            },

            RawResponse::Mapping(value) => {
                if let Some(choices) = value.get("choices") {
                    let content = choices
                        .get(0)
                        .and_then(|c| c.get("message"))
                        .and_then(|m| m.get("content"))
                        .and_then(Value::as_str);
                    return content.map(str::to_string).ok_or_else(|| {
                        DoxaError::Structural("no extractable content in choices".to_string())
                    });
                }

                value
                    .get("content")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| {
                        DoxaError::Structural(
                            "response carries neither choices nor content".to_string(),
                        )
                    })
            }

            RawResponse::Text(text) => Ok(text.clone()),
        }
    }
}

impl ResponseMetadata {
    /// Normalize token usage out of whatever shape arrived.
    ///
    /// Tries the typed `usage` object first, then a `"usage"` mapping.
    /// Absent usage data is a normal case: the zero record, never an error.
    pub fn from_response(response: &RawResponse) -> Self {
        match response {
            RawResponse::Completion(completion) => completion
                .usage
                .map(|usage| Self {
                    prompt_tokens: usage.prompt_tokens,
                    completion_tokens: usage.completion_tokens,
                    total_tokens: usage.total_tokens,
                })
                .unwrap_or_default(),

            RawResponse::Mapping(value) => value
                .get("usage")
                .map(|usage| {
                    let count = |key: &str| {
                        usage.get(key).and_then(Value::as_u64).unwrap_or(0) as u32
                    };
                    Self {
                        prompt_tokens: count("prompt_tokens"),
                        completion_tokens: count("completion_tokens"),
                        total_tokens: count("total_tokens"),
                    }
                })
                .unwrap_or_default(),

            RawResponse::Text(_) => Self::default(),
        }
    }
}

// Heuristics for responses that are syntactically a success but
// semantically a failure. False positives cost one extra retry; false
// negatives can only be fixed by extending the set.
static ERROR_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // Standardized error banner
        r"###\s*Model\s*Response\s*Error\s*during\s*API\s*call",
        // Common failure phrasings
        r"Error\s*during\s*API\s*call.*try\s*again",
        r"API\s*(call|request)\s*(failed|error|timeout)",
        r"Exception\s*occurred.*API",
        r"(failed|error|unable)\s*to\s*(generate|get|fetch)\s*response",
        // Missing-reply phrasing
        r"The\s*model\s*did\s*not\s*provide\s*a\s*(response|answer)",
        // Bare technical prefixes
        r"^(Error:|Warning:|Exception:|API Error:)",
    ]
    .iter()
    .map(|p| Regex::new(&format!("(?i){p}")).expect("static pattern"))
    .collect()
});

/// True when the text reads like a failure rather than a reply.
/// Empty text is always a failure.
pub fn contains_error_patterns(text: &str) -> bool {
    if text.is_empty() {
        return true;
    }
    ERROR_PATTERNS.iter().any(|re| re.is_match(text))
}

const DUMP_MAX_CHARS: usize = 2000;

/// Serialize any response shape for a diagnostic log record.
/// Never fails; output is truncated.
pub fn dump_response(response: &RawResponse) -> String {
    let full = match response {
        RawResponse::Completion(completion) => format!("{completion:?}"),
        RawResponse::Mapping(value) => serde_json::to_string(value)
            .unwrap_or_else(|e| format!("[unserializable mapping: {e}]")),
        RawResponse::Text(text) => text.clone(),
    };
    truncate_chars(&full, DUMP_MAX_CHARS)
}

/// First `max_chars` characters, with an ellipsis when truncated.
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let head: String = text.chars().take(max_chars).collect();
        format!("{head}...")
    }
}
