//! Hosted extraction service client
//!
//! POSTs nothing and parses nothing locally: the URL is handed to a hosted
//! reader endpoint that returns cleaned text. Calls are routed through the
//! rate-limit governor under the service's own key so the service-level
//! limits are honored alongside the model limits.

use delver_core::{DelverError, DelverResult, ErrorContext, FetchErrorKind};
use delver_llm::RateLimitGovernor;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const HOSTED_PARSER_KEY: &str = "hosted-parser";

pub struct HostedParserClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    governor: Arc<RateLimitGovernor>,
}

impl HostedParserClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        governor: Arc<RateLimitGovernor>,
        timeout: Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client builds with static configuration");
        Self {
            client,
            base_url: base_url.into(),
            api_key,
            governor,
        }
    }

    /// Retrieve cleaned text for a URL: the target URL is posted to the
    /// extraction service, which answers with the page's cleaned text.
    pub async fn fetch_text(&self, url: &str) -> DelverResult<String> {
        let _permit = self.governor.acquire(HOSTED_PARSER_KEY).await;

        debug!(url = url, "Fetching via hosted parser");

        let mut request = self
            .client
            .post(&self.base_url)
            .json(&serde_json::json!({ "url": url }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            let kind = if e.is_timeout() {
                FetchErrorKind::Timeout
            } else {
                FetchErrorKind::FetchFailed
            };
            DelverError::Fetch {
                kind,
                url: url.to_string(),
                context: ErrorContext::new("hosted_parser").with_operation("fetch_text"),
            }
        })?;

        if !response.status().is_success() {
            return Err(DelverError::Fetch {
                kind: FetchErrorKind::FetchFailed,
                url: url.to_string(),
                context: ErrorContext::new("hosted_parser")
                    .with_operation("fetch_text")
                    .with_suggestion("Check the parser service status and API key"),
            });
        }

        response.text().await.map_err(|_| DelverError::Fetch {
            kind: FetchErrorKind::FetchFailed,
            url: url.to_string(),
            context: ErrorContext::new("hosted_parser").with_operation("read_body"),
        })
    }
}
