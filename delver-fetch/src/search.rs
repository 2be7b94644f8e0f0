//! Metasearch backend client
//!
//! Speaks the SearXNG JSON API: query in, link list out. Search failures
//! are absorbed into an empty result list; the research loop treats empty
//! results as a normal (if unproductive) iteration.

use delver_core::DelverResult;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

/// URL-in / link-list-out capability
#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn search(&self, query: &str) -> DelverResult<Vec<String>>;
}

#[derive(Deserialize)]
struct SearxResponse {
    #[serde(default)]
    results: Vec<SearxResult>,
}

#[derive(Deserialize)]
struct SearxResult {
    #[serde(default)]
    url: Option<String>,
}

pub struct SearxngClient {
    client: reqwest::Client,
    base_url: String,
}

impl SearxngClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    fn parse_links(body: &str) -> Vec<String> {
        match serde_json::from_str::<SearxResponse>(body) {
            Ok(parsed) => parsed.results.into_iter().filter_map(|r| r.url).collect(),
            Err(e) => {
                warn!(error = %e, "Malformed metasearch response");
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl SearchBackend for SearxngClient {
    async fn search(&self, query: &str) -> DelverResult<Vec<String>> {
        debug!(query = query, base_url = self.base_url.as_str(), "Initiating search request");

        let response = match self
            .client
            .get(&self.base_url)
            .query(&[("q", query), ("format", "json")])
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(query = query, error = %e, "Search request failed");
                return Ok(Vec::new());
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            warn!(
                query = query,
                status = status.as_u16(),
                response = text.as_str(),
                "Search request rejected"
            );
            return Ok(Vec::new());
        }

        let body = response.text().await.unwrap_or_default();
        let links = Self::parse_links(&body);
        debug!(query = query, result_count = links.len(), "Search completed");
        Ok(links)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_result_urls() {
        let body = r#"{
            "query": "rust",
            "results": [
                {"url": "https://a.example/1", "title": "A"},
                {"title": "no url"},
                {"url": "https://b.example/2"}
            ]
        }"#;
        let links = SearxngClient::parse_links(body);
        assert_eq!(links, vec!["https://a.example/1", "https://b.example/2"]);
    }

    #[test]
    fn malformed_body_yields_empty_list() {
        assert!(SearxngClient::parse_links("not json").is_empty());
        assert!(SearxngClient::parse_links("{}").is_empty());
    }
}
