//! Unified error handling system
//!
//! Provides structured error types with context, recovery suggestions, and proper error chaining

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};

pub type DelverResult<T> = Result<T, DelverError>;

/// Error context providing additional information for debugging and recovery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Unique error ID for tracking
    pub error_id: String,
    /// Timestamp when error occurred
    pub timestamp: DateTime<Utc>,
    /// Component where error originated
    pub component: String,
    /// Operation being performed when error occurred
    pub operation: Option<String>,
    /// Recovery suggestions
    pub recovery_suggestions: Vec<String>,
}

impl ErrorContext {
    pub fn new(component: &str) -> Self {
        Self {
            error_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            component: component.to_string(),
            operation: None,
            recovery_suggestions: Vec::new(),
        }
    }

    pub fn with_operation(mut self, operation: &str) -> Self {
        self.operation = Some(operation.to_string());
        self
    }

    pub fn with_suggestion(mut self, suggestion: &str) -> Self {
        self.recovery_suggestions.push(suggestion.to_string());
        self
    }
}

/// How a page acquisition failed; every kind is treated as a skip by the
/// research loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FetchErrorKind {
    Timeout,
    TooLarge,
    UnsupportedType,
    FetchFailed,
}

impl std::fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FetchErrorKind::Timeout => "timeout",
            FetchErrorKind::TooLarge => "too-large",
            FetchErrorKind::UnsupportedType => "unsupported-type",
            FetchErrorKind::FetchFailed => "fetch-failed",
        };
        f.write_str(s)
    }
}

/// Main error type for the delver system
#[derive(Error, Debug)]
pub enum DelverError {
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },

    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },

    #[error("Upstream refused request ({status}): {message}")]
    UpstreamRefused {
        status: u16,
        message: String,
        context: ErrorContext,
    },

    #[error("Rate limit exceeded: {message}")]
    RateLimit {
        message: String,
        retry_after_ms: Option<u64>,
        context: ErrorContext,
    },

    #[error("LLM error: {message}")]
    Llm {
        message: String,
        provider: Option<String>,
        model: Option<String>,
        context: ErrorContext,
    },

    #[error("Search error: {message}")]
    Search {
        message: String,
        context: ErrorContext,
    },

    #[error("Fetch failed ({kind}) for {url}")]
    Fetch {
        kind: FetchErrorKind,
        url: String,
        context: ErrorContext,
    },

    #[error("Parse error: {message}")]
    Parse {
        message: String,
        context: ErrorContext,
    },

    #[error("Storage error: {message}")]
    Storage {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },

    #[error("Session error: {message}")]
    Session {
        message: String,
        context: ErrorContext,
    },

    #[error("Validation error: {message}")]
    Validation {
        message: String,
        context: ErrorContext,
    },

    #[error("Invariant violated: {message}")]
    Invariant {
        message: String,
        context: ErrorContext,
    },

    #[error("Resource not found: {resource}")]
    NotFound {
        resource: String,
        context: ErrorContext,
    },

    #[error("Operation timeout: {operation}")]
    Timeout {
        operation: String,
        duration_ms: u64,
        context: ErrorContext,
    },

    #[error("Operation cancelled: {operation}")]
    Cancelled {
        operation: String,
        context: ErrorContext,
    },

    #[error("Internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DelverError {
    /// Get the error context
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            DelverError::Config { context, .. } => Some(context),
            DelverError::Network { context, .. } => Some(context),
            DelverError::UpstreamRefused { context, .. } => Some(context),
            DelverError::RateLimit { context, .. } => Some(context),
            DelverError::Llm { context, .. } => Some(context),
            DelverError::Search { context, .. } => Some(context),
            DelverError::Fetch { context, .. } => Some(context),
            DelverError::Parse { context, .. } => Some(context),
            DelverError::Storage { context, .. } => Some(context),
            DelverError::Session { context, .. } => Some(context),
            DelverError::Validation { context, .. } => Some(context),
            DelverError::Invariant { context, .. } => Some(context),
            DelverError::NotFound { context, .. } => Some(context),
            DelverError::Timeout { context, .. } => Some(context),
            DelverError::Cancelled { context, .. } => Some(context),
            DelverError::Internal { context, .. } => Some(context),
            _ => None,
        }
    }

    /// Check if error is recoverable through a retry
    pub fn is_recoverable(&self) -> bool {
        match self {
            DelverError::Network { .. } => true,
            DelverError::Timeout { .. } => true,
            DelverError::RateLimit { .. } => true,
            DelverError::Fetch { kind, .. } => matches!(kind, FetchErrorKind::Timeout),
            _ => false,
        }
    }

    /// Get retry delay in milliseconds for recoverable errors
    pub fn retry_delay_ms(&self) -> Option<u64> {
        match self {
            DelverError::Network { .. } => Some(1000),
            DelverError::Timeout { .. } => Some(2000),
            DelverError::RateLimit { retry_after_ms, .. } => Some(retry_after_ms.unwrap_or(10_000)),
            _ => None,
        }
    }

    /// Log the error with appropriate level
    pub fn log(&self) {
        match self {
            DelverError::Network { .. } | DelverError::Timeout { .. } | DelverError::RateLimit { .. } => {
                warn!(
                    error_id = ?self.context().map(|c| &c.error_id),
                    error = %self,
                    "Recoverable error occurred"
                );
            }
            _ => {
                error!(
                    error_id = ?self.context().map(|c| &c.error_id),
                    error = %self,
                    "Error occurred"
                );
            }
        }
    }
}

/// Convenience macros for creating errors with context
#[macro_export]
macro_rules! config_error {
    ($msg:expr, $component:expr) => {
        $crate::DelverError::Config {
            message: $msg.to_string(),
            source: None,
            context: $crate::ErrorContext::new($component)
                .with_suggestion("Check your configuration file"),
        }
    };
    ($msg:expr, $component:expr, $source:expr) => {
        $crate::DelverError::Config {
            message: $msg.to_string(),
            source: Some(Box::new($source)),
            context: $crate::ErrorContext::new($component)
                .with_suggestion("Check your configuration file"),
        }
    };
}

#[macro_export]
macro_rules! session_error {
    ($msg:expr, $component:expr) => {
        $crate::DelverError::Session {
            message: $msg.to_string(),
            context: $crate::ErrorContext::new($component),
        }
    };
}

#[macro_export]
macro_rules! not_found_error {
    ($resource:expr, $component:expr) => {
        $crate::DelverError::NotFound {
            resource: $resource.to_string(),
            context: $crate::ErrorContext::new($component)
                .with_suggestion("Verify the resource id")
                .with_suggestion("Check if the resource exists"),
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_classification() {
        let err = DelverError::Network {
            message: "connection reset".to_string(),
            source: None,
            context: ErrorContext::new("test"),
        };
        assert!(err.is_recoverable());
        assert_eq!(err.retry_delay_ms(), Some(1000));

        let err = DelverError::UpstreamRefused {
            status: 403,
            message: "forbidden".to_string(),
            context: ErrorContext::new("test"),
        };
        assert!(!err.is_recoverable());
    }

    #[test]
    fn rate_limit_has_longer_backoff() {
        let err = DelverError::RateLimit {
            message: "429".to_string(),
            retry_after_ms: None,
            context: ErrorContext::new("test"),
        };
        assert!(err.retry_delay_ms().unwrap() > 2000);
    }

    #[test]
    fn fetch_kind_display() {
        assert_eq!(FetchErrorKind::TooLarge.to_string(), "too-large");
        assert_eq!(FetchErrorKind::UnsupportedType.to_string(), "unsupported-type");
    }

    #[test]
    fn error_macros_attach_context() {
        let err = crate::config_error!("missing key", "config");
        assert!(matches!(err, DelverError::Config { .. }));
        let context = err.context().unwrap();
        assert_eq!(context.component, "config");
        assert!(!context.recovery_suggestions.is_empty());

        let err = crate::session_error!("not resumable", "store");
        assert!(matches!(err, DelverError::Session { .. }));

        let err = crate::not_found_error!("session abc", "store");
        assert!(matches!(err, DelverError::NotFound { .. }));
    }
}
