//! Concurrent link-processing pipeline
//!
//! Each candidate URL becomes one task: acquire a domain slot, fetch and
//! parse the page, ask the model whether it is useful, and extract a
//! context summary when it is. Every failure along the way absorbs into a
//! skip; only successful extractions surface as summaries.

use crate::planner::parse_yes_no;
use crate::prompts;
use crate::types::ResearchChunk;
use delver_core::{retry_async, ContextSummary, DelverResult, ResearchSettings, RetryConfig};
use delver_fetch::{AdmissionController, PageSource};
use delver_llm::{LlmClient, LlmOptions};
use futures::FutureExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct LinkProcessor {
    pub llm: Arc<LlmClient>,
    pub pages: Arc<dyn PageSource>,
    pub admission: Arc<AdmissionController>,
    pub fetch_retry: RetryConfig,
    pub default_model_ctx: Option<u32>,
    pub reason_model_ctx: Option<u32>,
}

impl LinkProcessor {
    async fn emit(&self, tx: &mpsc::Sender<ResearchChunk>, chunk: ResearchChunk) {
        let _ = tx.send(chunk).await;
    }

    /// Fetch a page under admission control, with a small retry budget for
    /// transient transport failures.
    async fn fetch_page(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> DelverResult<Option<String>> {
        let permit = tokio::select! {
            _ = cancel.cancelled() => return Ok(None),
            permit = self.admission.admit(url) => permit,
        };

        let pages = self.pages.clone();
        let owned_url = url.to_string();
        let fetched = tokio::select! {
            _ = cancel.cancelled() => return Ok(None),
            fetched = retry_async(
                move || {
                    let pages = pages.clone();
                    let url = owned_url.clone();
                    async move { pages.fetch_text(&url).await }.boxed()
                },
                &self.fetch_retry,
                "fetch_page",
            ) => fetched,
        };

        // The permit's drop stamps the domain's completion time whatever
        // the outcome was.
        drop(permit);
        fetched.map(Some)
    }

    /// Process one candidate URL. Returns a summary for useful pages and
    /// `None` for every flavour of skip.
    pub async fn process_link(
        &self,
        url: String,
        user_query: &str,
        search_query: String,
        settings: &ResearchSettings,
        tx: &mpsc::Sender<ResearchChunk>,
        cancel: &CancellationToken,
    ) -> Option<ContextSummary> {
        debug!(url = url.as_str(), query = search_query.as_str(), "Processing link");
        self.emit(tx, ResearchChunk::Status(format!("Fetching content from: {}", url)))
            .await;

        let page_text = match self.fetch_page(&url, cancel).await {
            Ok(Some(text)) if !text.trim().is_empty() => text,
            Ok(Some(_)) | Ok(None) => {
                debug!(url = url.as_str(), "No content fetched, skipping link");
                return None;
            }
            Err(err) => {
                warn!(url = url.as_str(), error = %err, "Fetch failed, skipping link");
                self.emit(
                    tx,
                    ResearchChunk::Status(format!("Skipping {} ({})", url, err)),
                )
                .await;
                return None;
            }
        };

        if cancel.is_cancelled() {
            return None;
        }

        // Usefulness and extraction failures absorb into "not useful".
        let useful = match self
            .llm
            .complete(
                prompts::page_useful(user_query, &page_text).to_chat_messages(),
                &settings.reason_model,
                self.reason_model_ctx,
                LlmOptions::default(),
            )
            .await
        {
            Ok(answer) => parse_yes_no(&answer),
            Err(err) => {
                warn!(url = url.as_str(), error = %err, "Usefulness check failed, treating as not useful");
                false
            }
        };

        self.emit(
            tx,
            ResearchChunk::Status(format!(
                "Page usefulness for {}: {}",
                url,
                if useful { "Yes" } else { "No" }
            )),
        )
        .await;

        if !useful || cancel.is_cancelled() {
            return None;
        }

        let context = match self
            .llm
            .complete(
                prompts::extract_context(user_query, &search_query, &page_text).to_chat_messages(),
                &settings.default_model,
                self.default_model_ctx,
                LlmOptions::default(),
            )
            .await
        {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => return None,
            Err(err) => {
                warn!(url = url.as_str(), error = %err, "Context extraction failed, skipping link");
                return None;
            }
        };

        info!(
            url = url.as_str(),
            context_len = context.len(),
            "Context extracted"
        );
        let summary = ContextSummary::new(url, search_query, context);
        self.emit(tx, ResearchChunk::Context(summary.clone())).await;
        Some(summary)
    }
}
