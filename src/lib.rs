//! doxa - Resilient client for chat-completion language-model APIs.
//!
//! One uniform call surface over two backend protocol families
//! (OpenAI-compatible and GigaChat-style), built to tolerate unreliable
//! backends: transient transport failures, malformed payloads, and
//! responses that arrive as HTTP 200 yet carry an error message as the
//! reply text.
//!
//! ## Architecture
//!
//! - **Sampler**: the public facade; owns resolved config, applies the
//!   rate limit, packs the system prompt, dispatches per backend
//! - **RateLimiterRegistry**: process-wide minimum spacing, shared by all
//!   samplers targeting the same backend × model
//! - **Backend adapters**: per-family wire codecs and independently tuned
//!   retry policies
//!
//! ## Epistemic Design
//!
//! - K_i (Knowledge): response shapes closed into a tagged union
//! - B_i (Beliefs): every network and parse step returns Result
//! - I^R (Resolvable): retry budgets and delays are config parameters
//! - I^B (Bounded): backend reliability unknowable → layered retries

pub mod client;
pub mod models;
pub mod sampler;

// Re-exports for convenience
pub use client::{RateLimiter, RateLimiterRegistry, RawResponse};
pub use models::{
    Backend, CallResult, Config, ConfigError, DoxaError, Message, ResponseMetadata, Result, Role,
};
pub use sampler::Sampler;
