//! Unified logging system
//!
//! Provides structured logging with configurable output via tracing

use serde::{Deserialize, Serialize};
use std::io;
use std::sync::Arc;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty, compact)
    pub format: LogFormat,
    /// Whether to include file and line information
    pub include_location: bool,
    /// Log file path; logs go to stdout when unset
    pub log_file_path: Option<String>,
    /// Custom filter directives
    pub filter_directives: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
            include_location: false,
            log_file_path: None,
            filter_directives: vec![
                "delver_core=debug".to_string(),
                "delver_llm=debug".to_string(),
                "delver_fetch=debug".to_string(),
                "delver_persist=debug".to_string(),
                "delver_research=debug".to_string(),
                "delver_web=debug".to_string(),
            ],
        }
    }
}

/// Initialize the logging system
pub fn init_logging(
    config: &LoggingConfig,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    for directive in &config.filter_directives {
        filter = filter.add_directive(directive.parse()?);
    }

    let registry = tracing_subscriber::registry().with(filter);

    macro_rules! init_with_layer {
        ($layer:expr) => {{
            let fmt_layer = $layer
                .with_file(config.include_location)
                .with_line_number(config.include_location);
            if let Some(log_path) = &config.log_file_path {
                let file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(log_path)?;
                registry.with(fmt_layer.with_writer(Arc::new(file))).init();
            } else {
                registry.with(fmt_layer.with_writer(io::stdout)).init();
            }
        }};
    }

    match config.format {
        LogFormat::Json => init_with_layer!(fmt::layer().json()),
        LogFormat::Pretty => init_with_layer!(fmt::layer().pretty()),
        LogFormat::Compact => init_with_layer!(fmt::layer().compact()),
    }

    Ok(())
}
