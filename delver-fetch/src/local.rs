//! Local fetch-and-parse path
//!
//! Fetches a page directly, extracts body text from HTML, and spools PDFs
//! to a size-capped temporary file rendered under a page bound. The
//! temporary file is destroyed on every exit path.

use crate::extract::{extract_html_text, extract_pdf_text};
use crate::pipeline::{classify, PageKind};
use delver_core::{with_timeout, DelverError, DelverResult, ErrorContext, FetchErrorKind, ParsingConfig};
use futures::StreamExt;
use std::io::Write;
use std::path::PathBuf;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

pub struct LocalFetcher {
    client: reqwest::Client,
    parsing: ParsingConfig,
    /// PDF rendering is single-flight: one document at a time.
    pdf_lock: tokio::sync::Mutex<()>,
}

impl LocalFetcher {
    pub fn new(parsing: ParsingConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(parsing.fetch_timeout))
            .user_agent("delver-research/0.1")
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .expect("reqwest client builds with static configuration");
        Self {
            client,
            parsing,
            pdf_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn fetch_error(url: &str, kind: FetchErrorKind) -> DelverError {
        DelverError::Fetch {
            kind,
            url: url.to_string(),
            context: ErrorContext::new("local_fetcher").with_operation("fetch_text"),
        }
    }

    pub async fn fetch_text(&self, url: &str) -> DelverResult<String> {
        let response = self.client.get(url).send().await.map_err(|e| {
            let kind = if e.is_timeout() {
                FetchErrorKind::Timeout
            } else {
                FetchErrorKind::FetchFailed
            };
            Self::fetch_error(url, kind)
        })?;

        if !response.status().is_success() {
            return Err(Self::fetch_error(url, FetchErrorKind::FetchFailed));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        match classify(url, content_type.as_deref()) {
            PageKind::Pdf => self.fetch_pdf(url, response).await,
            PageKind::Html => self.fetch_html(url, content_type.as_deref(), response).await,
        }
    }

    async fn fetch_html(
        &self,
        url: &str,
        content_type: Option<&str>,
        response: reqwest::Response,
    ) -> DelverResult<String> {
        if let Some(ct) = content_type {
            let ct = ct.to_ascii_lowercase();
            let textual = ct.starts_with("text/")
                || ct.contains("html")
                || ct.contains("xml")
                || ct.contains("json");
            if !textual {
                return Err(Self::fetch_error(url, FetchErrorKind::UnsupportedType));
            }
        }

        let body = response
            .text()
            .await
            .map_err(|_| Self::fetch_error(url, FetchErrorKind::FetchFailed))?;

        let (title, text) = extract_html_text(&body);
        debug!(url = url, text_len = text.len(), "Extracted page text");
        Ok(format!(
            "# {}\n{}",
            title.unwrap_or_else(|| "Untitled Page".to_string()),
            text
        ))
    }

    async fn fetch_pdf(&self, url: &str, response: reqwest::Response) -> DelverResult<String> {
        // Known-oversized files are rejected before a byte is spooled.
        if let Some(length) = response.content_length() {
            if length > self.parsing.pdf_max_filesize {
                return Err(Self::fetch_error(url, FetchErrorKind::TooLarge));
            }
        }

        let spool_dir = self
            .parsing
            .temp_pdf_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        let mut spool = NamedTempFile::new_in(&spool_dir)
            .map_err(|_| Self::fetch_error(url, FetchErrorKind::FetchFailed))?;

        let mut written: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let bytes = chunk.map_err(|e| {
                let kind = if e.is_timeout() {
                    FetchErrorKind::Timeout
                } else {
                    FetchErrorKind::FetchFailed
                };
                Self::fetch_error(url, kind)
            })?;
            written += bytes.len() as u64;
            if written > self.parsing.pdf_max_filesize {
                return Err(Self::fetch_error(url, FetchErrorKind::TooLarge));
            }
            spool
                .write_all(&bytes)
                .map_err(|_| Self::fetch_error(url, FetchErrorKind::FetchFailed))?;
        }
        spool
            .flush()
            .map_err(|_| Self::fetch_error(url, FetchErrorKind::FetchFailed))?;

        let path: PathBuf = spool.path().to_path_buf();
        let max_pages = self.parsing.pdf_max_pages;
        let _pdf_guard = self.pdf_lock.lock().await;
        let extraction = tokio::task::spawn_blocking(move || {
            let text = extract_pdf_text(&path, max_pages);
            // The spool file lives until extraction finishes, then the
            // NamedTempFile guard deletes it.
            drop(spool);
            text
        });

        let text = with_timeout(extraction, self.parsing.timeout_pdf * 1000, "pdf_extract")
            .await
            .map_err(|_| Self::fetch_error(url, FetchErrorKind::Timeout))?
            .map_err(|e| {
                warn!(url = url, error = %e, "PDF extraction task failed");
                Self::fetch_error(url, FetchErrorKind::FetchFailed)
            })??;

        debug!(url = url, text_len = text.len(), "Extracted PDF text");
        Ok(format!("# PDF Content\n{}", text))
    }
}
