//! Error types for doxa.
//!
//! Epistemic taxonomy:
//! - B_i falsified: Expected failures (bad config, unusable payload)
//! - I^B materialized: Infrastructure failures (network, timeout)
//! - K_i violated: Internal invariant violations (bugs)

use thiserror::Error;

/// Top-level error type for doxa.
#[derive(Debug, Error)]
pub enum DoxaError {
    // ═══════════════════════════════════════════════════════════════════
    // B_i FALSIFIED — Belief proven wrong (expected failures)
    // ═══════════════════════════════════════════════════════════════════

    #[error("Configuration error: {0}")]
    Config(#[from] super::ConfigError),

    /// Response body was not decodable JSON. Retryable under the
    /// OpenAI-compatible policy.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Response decoded but matched none of the known content shapes.
    /// Retryable under the OpenAI-compatible policy.
    #[error("Unexpected response structure: {0}")]
    Structural(String),

    // ═══════════════════════════════════════════════════════════════════
    // I^B MATERIALIZED — Bounded ignorance became known-bad
    // ═══════════════════════════════════════════════════════════════════

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Request timeout after {0:?}")]
    Timeout(std::time::Duration),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// Retries exhausted or a fatal failure was hit. The outward message
    /// is deliberately terse: full detail, including the credential
    /// fragment, goes to the diagnostic log only.
    #[error("API call failed for model {model}: check diagnostic logs for details")]
    CallFailed {
        model: String,
        #[source]
        source: Box<DoxaError>,
    },

    // ═══════════════════════════════════════════════════════════════════
    // K_i VIOLATED — Invariant broken (bug, should not happen)
    // ═══════════════════════════════════════════════════════════════════

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DoxaError {
    /// Whether the OpenAI-compatible policy may retry this failure.
    ///
    /// Only payload-decoding and structural-shape failures qualify; every
    /// other failure is fatal on first sight under that policy.
    pub fn is_decode_retryable(&self) -> bool {
        matches!(self, Self::Decode(_) | Self::Structural(_))
    }

    /// Short name of the variant, for structured log records.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "Config",
            Self::Decode(_) => "Decode",
            Self::Structural(_) => "Structural",
            Self::Network(_) => "Network",
            Self::Timeout(_) => "Timeout",
            Self::Api { .. } => "Api",
            Self::CallFailed { .. } => "CallFailed",
            Self::Internal(_) => "Internal",
        }
    }
}

/// Result type alias for doxa.
pub type Result<T> = std::result::Result<T, DoxaError>;
