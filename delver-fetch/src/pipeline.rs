//! Page acquisition pipeline
//!
//! Classifies URLs, dispatches to the configured acquisition strategy and
//! normalizes the result to bounded plain text.

use crate::extract::truncate_chars;
use crate::hosted::HostedParserClient;
use crate::local::LocalFetcher;
use delver_core::DelverResult;
use async_trait::async_trait;

/// Document kind a URL resolves to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    Html,
    Pdf,
}

/// Classify by extension first, then content-type; unknown defaults to HTML.
pub fn classify(url: &str, content_type: Option<&str>) -> PageKind {
    let path = url::Url::parse(url)
        .map(|u| u.path().to_ascii_lowercase())
        .unwrap_or_else(|_| url.to_ascii_lowercase());
    if path.ends_with(".pdf") {
        return PageKind::Pdf;
    }
    if let Some(ct) = content_type {
        if ct.to_ascii_lowercase().contains("application/pdf") {
            return PageKind::Pdf;
        }
    }
    PageKind::Html
}

/// URL-in / cleaned-text-out capability
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_text(&self, url: &str) -> DelverResult<String>;
}

enum AcquireStrategy {
    Hosted(HostedParserClient),
    Local(LocalFetcher),
}

/// Acquires page text through the strategy selected by the session flag
/// and truncates it to the configured maximum length.
pub struct PageAcquirer {
    strategy: AcquireStrategy,
    max_html_length: usize,
}

impl PageAcquirer {
    pub fn hosted(client: HostedParserClient, max_html_length: usize) -> Self {
        Self {
            strategy: AcquireStrategy::Hosted(client),
            max_html_length,
        }
    }

    pub fn local(fetcher: LocalFetcher, max_html_length: usize) -> Self {
        Self {
            strategy: AcquireStrategy::Local(fetcher),
            max_html_length,
        }
    }
}

#[async_trait]
impl PageSource for PageAcquirer {
    async fn fetch_text(&self, url: &str) -> DelverResult<String> {
        let text = match &self.strategy {
            AcquireStrategy::Hosted(client) => client.fetch_text(url).await?,
            AcquireStrategy::Local(fetcher) => fetcher.fetch_text(url).await?,
        };
        Ok(truncate_chars(text, self.max_html_length))
    }
}
