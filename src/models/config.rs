//! Configuration models for doxa.
//!
//! All I^R (resolvable ignorance) is parameterized here.
//! The user resolves these unknowns at runtime via config file.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Backend protocol family a sampler talks to.
///
/// K_i: exactly one backend is active per sampler instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    OpenAi,
    GigaChat,
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::OpenAi => write!(f, "openai"),
            Backend::GigaChat => write!(f, "gigachat"),
        }
    }
}

/// Top-level configuration for doxa.
///
/// I^R resolved: All configurable parameters are explicit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Backend selection and sampling parameters
    pub sampler: SamplerConfig,

    /// OpenAI-compatible endpoint configuration
    #[serde(default)]
    pub openai: OpenAiConfig,

    /// GigaChat-style endpoint configuration
    #[serde(default)]
    pub gigachat: GigaChatConfig,

    /// Retry tuning for both policies
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Backend selection and sampling parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplerConfig {
    /// Which backend family to talk to
    pub backend: Backend,

    /// Model identifier (e.g. "gpt-4o", "GigaChat-Pro")
    pub model: String,

    /// Sampling temperature
    #[serde(default)]
    pub temperature: f64,

    /// Maximum tokens per response; omitted from requests when absent
    #[serde(default)]
    pub max_tokens: Option<u32>,

    /// System prompt prepended to every conversation
    #[serde(default)]
    pub system_prompt: Option<String>,

    /// Minimum spacing between requests for this (backend, model) key,
    /// in seconds; zero disables rate limiting
    #[serde(default)]
    pub request_delay_secs: f64,
}

/// OpenAI-compatible endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    /// API key (can also be set via the `api_key_env` variable)
    #[serde(default)]
    pub api_key: Option<String>,

    /// Environment variable name for the API key
    #[serde(default = "default_openai_api_key_env")]
    pub api_key_env: String,

    /// Base URL for the API
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_openai_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_timeout() -> u64 {
    60
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_key_env: default_openai_api_key_env(),
            base_url: default_openai_base_url(),
            timeout_secs: default_timeout(),
        }
    }
}

impl OpenAiConfig {
    /// Resolve the API key from config or environment.
    ///
    /// B_i(api key available) → Result
    pub fn resolve_api_key(&self) -> Result<String, ConfigError> {
        if let Some(key) = &self.api_key {
            return Ok(expand_env_vars(key));
        }

        std::env::var(&self.api_key_env).map_err(|_| ConfigError::MissingCredential {
            backend: "openai".to_string(),
            env_var: self.api_key_env.clone(),
        })
    }
}

/// GigaChat-style endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GigaChatConfig {
    /// Authorization credentials (can also be set via `credentials_env`)
    #[serde(default)]
    pub credentials: Option<String>,

    /// Environment variable name for the credentials
    #[serde(default = "default_gigachat_credentials_env")]
    pub credentials_env: String,

    /// Base URL for the API
    #[serde(default = "default_gigachat_base_url")]
    pub base_url: String,

    /// Access scope sent with each request
    #[serde(default = "default_gigachat_scope")]
    pub scope: String,

    /// Whether the backend should run its profanity filter
    #[serde(default = "default_true")]
    pub profanity_check: bool,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_gigachat_credentials_env() -> String {
    "GIGACHAT_CREDENTIALS".to_string()
}

fn default_gigachat_base_url() -> String {
    "https://gigachat.devices.sberbank.ru/api/v1".to_string()
}

fn default_gigachat_scope() -> String {
    "GIGACHAT_API_CORP".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for GigaChatConfig {
    fn default() -> Self {
        Self {
            credentials: None,
            credentials_env: default_gigachat_credentials_env(),
            base_url: default_gigachat_base_url(),
            scope: default_gigachat_scope(),
            profanity_check: default_true(),
            timeout_secs: default_timeout(),
        }
    }
}

impl GigaChatConfig {
    /// Resolve the credentials from config or environment.
    ///
    /// B_i(credentials available) → Result
    pub fn resolve_credentials(&self) -> Result<String, ConfigError> {
        if let Some(credentials) = &self.credentials {
            return Ok(expand_env_vars(credentials));
        }

        std::env::var(&self.credentials_env).map_err(|_| ConfigError::MissingCredential {
            backend: "gigachat".to_string(),
            env_var: self.credentials_env.clone(),
        })
    }
}

/// Retry tuning for both backend policies.
///
/// The two policies are independently budgeted: the GigaChat loop covers
/// transport and content failures alike, the OpenAI-compatible loop only
/// decode/structural failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// GigaChat unified retry budget
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// GigaChat base delay between attempts, in seconds (grows linearly)
    #[serde(default = "default_retry_sleep")]
    pub retry_sleep_secs: f64,

    /// OpenAI-compatible decode/structural retry budget
    #[serde(default = "default_decode_max_attempts")]
    pub decode_max_attempts: u32,

    /// OpenAI-compatible base delay between attempts, in seconds
    #[serde(default = "default_decode_retry_delay")]
    pub decode_retry_delay_secs: f64,
}

fn default_max_attempts() -> u32 {
    17
}

fn default_retry_sleep() -> f64 {
    7.0
}

fn default_decode_max_attempts() -> u32 {
    12
}

fn default_decode_retry_delay() -> f64 {
    5.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_sleep_secs: default_retry_sleep(),
            decode_max_attempts: default_decode_max_attempts(),
            decode_retry_delay_secs: default_decode_retry_delay(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// B_i(file exists) → Result
    /// B_i(file is valid TOML) → Result
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_owned(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_owned(),
            source: e,
        })
    }

    /// Check that the credential required by the selected backend resolves.
    ///
    /// Called at sampler construction so a missing credential fails before
    /// the first request, never during one.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.sampler.backend {
            Backend::OpenAi => self.openai.resolve_api_key().map(|_| ()),
            Backend::GigaChat => self.gigachat.resolve_credentials().map(|_| ()),
        }
    }
}

/// Expand environment variables in a string.
///
/// Supports ${VAR_NAME} syntax.
/// If the variable is not set, the placeholder is left unchanged.
pub fn expand_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    let re = regex::Regex::new(r"\$\{([^}]+)\}").expect("static pattern");

    for cap in re.captures_iter(s) {
        let var_name = &cap[1];
        if let Ok(value) = std::env::var(var_name) {
            result = result.replace(&cap[0], &value);
        }
    }

    result
}

/// Configuration errors.
///
/// Epistemic origin:
/// - B_i falsified: File not found, parse error
/// - I^B materialized: Missing required credential
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error(
        "Missing credential for backend '{backend}': set {env_var} env var or the key in config"
    )]
    MissingCredential { backend: String, env_var: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"
[sampler]
backend = "openai"
model = "gpt-4o"
"#;

    #[test]
    fn minimal_config_gets_defaults() {
        let config: Config = toml::from_str(MINIMAL).unwrap();
        assert_eq!(config.sampler.backend, Backend::OpenAi);
        assert_eq!(config.sampler.temperature, 0.0);
        assert!(config.sampler.max_tokens.is_none());
        assert!(config.sampler.system_prompt.is_none());
        assert_eq!(config.sampler.request_delay_secs, 0.0);
        assert_eq!(config.openai.base_url, "https://api.openai.com/v1");
        assert_eq!(config.retry.max_attempts, 17);
        assert_eq!(config.retry.retry_sleep_secs, 7.0);
        assert_eq!(config.retry.decode_max_attempts, 12);
        assert_eq!(config.retry.decode_retry_delay_secs, 5.0);
        assert_eq!(config.gigachat.scope, "GIGACHAT_API_CORP");
        assert!(config.gigachat.profanity_check);
    }

    #[test]
    fn gigachat_backend_parses() {
        let config: Config = toml::from_str(
            r#"
[sampler]
backend = "gigachat"
model = "GigaChat-Pro"
temperature = 0.0
max_tokens = 2048
request_delay_secs = 0.5

[gigachat]
credentials = "token"
profanity_check = false
"#,
        )
        .unwrap();
        assert_eq!(config.sampler.backend, Backend::GigaChat);
        assert_eq!(config.sampler.max_tokens, Some(2048));
        assert!(!config.gigachat.profanity_check);
        config.validate().unwrap();
    }

    #[test]
    fn from_file_round_trip() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();
        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.sampler.model, "gpt-4o");
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = Config::from_file(std::path::Path::new("/nonexistent/doxa.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::FileRead { .. }));
    }

    #[test]
    fn missing_credential_names_the_env_var() {
        let mut config: Config = toml::from_str(MINIMAL).unwrap();
        config.openai.api_key_env = "DOXA_TEST_UNSET_KEY".to_string();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::MissingCredential { .. }));
        assert!(err.to_string().contains("DOXA_TEST_UNSET_KEY"));
    }

    #[test]
    fn explicit_key_wins_over_env() {
        let mut config: Config = toml::from_str(MINIMAL).unwrap();
        config.openai.api_key = Some("sk-explicit".to_string());
        assert_eq!(config.openai.resolve_api_key().unwrap(), "sk-explicit");
    }

    #[test]
    fn env_var_expansion_in_credentials() {
        std::env::set_var("DOXA_TEST_EXPANSION", "from-env");
        let mut config: Config = toml::from_str(MINIMAL).unwrap();
        config.openai.api_key = Some("${DOXA_TEST_EXPANSION}".to_string());
        assert_eq!(config.openai.resolve_api_key().unwrap(), "from-env");
    }

    #[test]
    fn unset_placeholder_left_unchanged() {
        assert_eq!(
            expand_env_vars("${DOXA_TEST_NEVER_SET_VAR}"),
            "${DOXA_TEST_NEVER_SET_VAR}"
        );
    }
}
