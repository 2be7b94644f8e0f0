//! Configuration management
//!
//! Loads the TOML configuration document, substitutes `${NAME}` environment
//! placeholders and validates mandatory values.

use crate::error::{DelverError, DelverResult, ErrorContext};
use crate::types::ResearchSettings;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub local_ai: LocalAiConfig,
    pub api: ApiConfig,
    pub settings: SettingsConfig,
    pub concurrency: ConcurrencyConfig,
    pub parsing: ParsingConfig,
    pub rate_limits: RateLimitsConfig,
    pub persistence: PersistenceConfig,
    pub server: ServerConfig,
}

/// Model provider endpoints and model ids
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalAiConfig {
    /// One of "openai_compatible", "ollama", "lmstudio"
    pub provider: String,
    pub ollama_base_url: String,
    pub lmstudio_base_url: String,
    pub default_model: String,
    pub reason_model: String,
    /// Context window hint; non-positive means "use provider default"
    pub default_model_ctx: i64,
    pub reason_model_ctx: i64,
}

impl Default for LocalAiConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            ollama_base_url: "http://localhost:11434".to_string(),
            lmstudio_base_url: "http://localhost:1234/v1".to_string(),
            default_model: "llama3.2:latest".to_string(),
            reason_model: "llama3.2:latest".to_string(),
            default_model_ctx: -1,
            reason_model_ctx: -1,
        }
    }
}

/// Convert a configured context size to an optional hint; negative or zero
/// values mean "unset" and the knob is omitted from provider requests.
pub fn ctx_hint(ctx: i64) -> Option<u32> {
    if ctx > 0 {
        Some(ctx as u32)
    } else {
        None
    }
}

/// External service endpoints and secrets
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub openai_url: String,
    pub openai_compat_api_key: String,
    pub searxng_url: String,
    /// Hosted extraction service for page parsing
    pub parser_base_url: String,
    pub parser_api_key: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            openai_url: "https://api.openai.com/v1".to_string(),
            openai_compat_api_key: String::new(),
            searxng_url: "http://localhost:8080".to_string(),
            parser_base_url: "https://r.jina.ai/".to_string(),
            parser_api_key: None,
        }
    }
}

/// Feature flags snapshotted into each session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsConfig {
    pub use_hosted_parser: bool,
    pub use_local_llm: bool,
    pub with_planning: bool,
    pub max_iterations: u32,
    pub max_search_items: usize,
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            use_hosted_parser: false,
            use_local_llm: true,
            with_planning: true,
            max_iterations: 10,
            max_search_items: 4,
        }
    }
}

/// Fetch concurrency limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    /// Global bound on concurrent fetches
    pub concurrent_limit: usize,
    /// Bound on concurrent fetches against a single host
    pub per_domain_limit: usize,
    /// Seconds between the completion of one fetch to a host and the start
    /// of the next
    pub cool_down: f64,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            concurrent_limit: 3,
            per_domain_limit: 1,
            cool_down: 1.0,
        }
    }
}

/// Page size and parse limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParsingConfig {
    pub pdf_max_pages: usize,
    pub pdf_max_filesize: u64,
    /// Seconds allowed for PDF rendering
    pub timeout_pdf: u64,
    /// Seconds allowed for a page fetch
    pub fetch_timeout: u64,
    pub max_html_length: usize,
    pub temp_pdf_dir: Option<PathBuf>,
}

impl Default for ParsingConfig {
    fn default() -> Self {
        Self {
            pdf_max_pages: 10,
            pdf_max_filesize: 10 * 1024 * 1024,
            timeout_pdf: 60,
            fetch_timeout: 30,
            max_html_length: 1_000_000,
            temp_pdf_dir: None,
        }
    }
}

/// LLM pacing and fallback knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitsConfig {
    /// Non-positive disables pacing
    pub request_per_minute: i64,
    /// Seconds to pause between iterations
    pub operation_wait_time: u64,
    /// Global bound on concurrent LLM requests
    pub llm_concurrent_limit: usize,
    /// Seconds allowed for one LLM call
    pub llm_timeout: u64,
    /// Consecutive failures of one model before switching to the fallback
    pub failure_threshold: u32,
    pub fallback_model: Option<String>,
}

impl Default for RateLimitsConfig {
    fn default() -> Self {
        Self {
            request_per_minute: -1,
            operation_wait_time: 0,
            llm_concurrent_limit: 4,
            llm_timeout: 180,
            failure_threshold: 2,
            fallback_model: None,
        }
    }
}

/// Session store location
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub sessions_dir: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            sessions_dir: PathBuf::from("./data/sessions"),
        }
    }
}

/// HTTP surface binding
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file, substituting `${NAME}`
    /// environment placeholders before parsing.
    pub fn from_file<P: AsRef<Path>>(path: P) -> DelverResult<Self> {
        let content = std::fs::read_to_string(&path).map_err(|e| DelverError::Config {
            message: format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config")
                .with_operation("read_file")
                .with_suggestion("Check if the config file exists and is readable"),
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> DelverResult<Self> {
        let expanded = expand_env_placeholders(content)?;

        let config: AppConfig = toml::from_str(&expanded).map_err(|e| DelverError::Config {
            message: format!("Failed to parse config: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config")
                .with_operation("parse_toml")
                .with_suggestion("Check TOML syntax in config file"),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> DelverResult<()> {
        let invalid = |message: String| Err(crate::config_error!(message, "config"));

        if self.concurrency.concurrent_limit == 0 {
            return invalid("concurrency.concurrent_limit must be greater than 0".to_string());
        }
        if self.concurrency.per_domain_limit == 0 {
            return invalid("concurrency.per_domain_limit must be greater than 0".to_string());
        }
        if self.rate_limits.llm_concurrent_limit == 0 {
            return invalid("rate_limits.llm_concurrent_limit must be greater than 0".to_string());
        }
        if self.settings.max_iterations == 0 {
            return invalid("settings.max_iterations must be greater than 0".to_string());
        }
        if self.local_ai.default_model.is_empty() {
            return invalid("local_ai.default_model must not be empty".to_string());
        }
        if self.api.searxng_url.is_empty() {
            return invalid("api.searxng_url must not be empty".to_string());
        }
        Ok(())
    }

    /// Default per-session settings snapshot derived from this configuration
    pub fn research_settings(&self) -> ResearchSettings {
        ResearchSettings {
            max_iterations: self.settings.max_iterations,
            max_search_items: self.settings.max_search_items,
            default_model: self.local_ai.default_model.clone(),
            reason_model: self.local_ai.reason_model.clone(),
            use_hosted_parser: self.settings.use_hosted_parser,
            use_local_llm: self.settings.use_local_llm,
            with_planning: self.settings.with_planning,
        }
    }
}

/// Substitute `${NAME}` placeholders with environment variable values.
/// An unresolvable reference is a fatal configuration error.
pub fn expand_env_placeholders(content: &str) -> DelverResult<String> {
    let pattern = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("static regex compiles");

    let mut result = String::with_capacity(content.len());
    let mut last_end = 0;
    for caps in pattern.captures_iter(content) {
        let whole = caps.get(0).expect("group 0 always present");
        let name = &caps[1];
        let value = std::env::var(name).map_err(|_| {
            crate::config_error!(
                format!("Unresolvable environment reference: ${{{}}}", name),
                "config"
            )
        })?;
        result.push_str(&content[last_end..whole.start()]);
        result.push_str(&value);
        last_end = whole.end();
    }
    result.push_str(&content[last_end..]);
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.concurrency.concurrent_limit, 3);
        assert_eq!(config.rate_limits.request_per_minute, -1);
    }

    #[test]
    fn parses_partial_toml() {
        let config = AppConfig::from_toml(
            r#"
            [settings]
            max_iterations = 3

            [concurrency]
            cool_down = 2.5
            "#,
        )
        .unwrap();
        assert_eq!(config.settings.max_iterations, 3);
        assert_eq!(config.concurrency.cool_down, 2.5);
        assert_eq!(config.parsing.pdf_max_pages, 10);
    }

    #[test]
    fn env_placeholder_substitution() {
        std::env::set_var("DELVER_TEST_KEY_A1", "secret-token");
        let expanded =
            expand_env_placeholders("key = \"${DELVER_TEST_KEY_A1}\"\nother = \"plain\"").unwrap();
        assert_eq!(expanded, "key = \"secret-token\"\nother = \"plain\"");
    }

    #[test]
    fn unresolvable_env_placeholder_is_fatal() {
        let err = expand_env_placeholders("key = \"${DELVER_DOES_NOT_EXIST_XYZ}\"").unwrap_err();
        assert!(matches!(err, DelverError::Config { .. }));
    }

    #[test]
    fn zero_limits_rejected() {
        let err = AppConfig::from_toml("[concurrency]\nconcurrent_limit = 0").unwrap_err();
        assert!(matches!(err, DelverError::Config { .. }));
    }

    #[test]
    fn ctx_hint_treats_negative_as_unset() {
        assert_eq!(ctx_hint(-1), None);
        assert_eq!(ctx_hint(0), None);
        assert_eq!(ctx_hint(8192), Some(8192));
    }
}
