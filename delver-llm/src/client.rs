//! LLM client
//!
//! Routes every completion call through the rate-limit governor, retries
//! transient failures with exponential backoff, and switches to the
//! declared fallback model after a threshold of consecutive failures of the
//! same model. Callers never see which backend served the call.

use crate::governor::{GovernorPermit, RateLimitGovernor};
use crate::provider::{ChatProvider, ChatRequest, LlmOptions};
use delver_core::{
    retry_async, with_timeout, ChatMessage, DelverError, DelverResult, ErrorContext, RetryConfig,
};
use futures::FutureExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Client-level knobs
#[derive(Debug, Clone)]
pub struct LlmClientConfig {
    pub retry: RetryConfig,
    /// Milliseconds allowed for one completion call
    pub call_timeout_ms: u64,
    /// Consecutive failures of a model before the fallback takes over
    pub failure_threshold: u32,
    pub fallback_model: Option<String>,
}

impl Default for LlmClientConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            call_timeout_ms: 180_000,
            failure_threshold: 2,
            fallback_model: None,
        }
    }
}

/// The LLM capability: non-streaming and streaming completion
pub struct LlmClient {
    provider: Arc<dyn ChatProvider>,
    governor: Arc<RateLimitGovernor>,
    config: LlmClientConfig,
    /// Consecutive failure counts per model id
    failures: Mutex<HashMap<String, u32>>,
}

impl LlmClient {
    pub fn new(
        provider: Arc<dyn ChatProvider>,
        governor: Arc<RateLimitGovernor>,
        config: LlmClientConfig,
    ) -> Self {
        Self {
            provider,
            governor,
            config,
            failures: Mutex::new(HashMap::new()),
        }
    }

    pub fn governor(&self) -> Arc<RateLimitGovernor> {
        self.governor.clone()
    }

    /// The model a call should actually use: the requested one, or the
    /// fallback once the requested one has failed too many times in a row.
    fn active_model(&self, requested: &str) -> String {
        let failures = self.failures.lock().expect("failure map lock poisoned");
        let count = failures.get(requested).copied().unwrap_or(0);
        match &self.config.fallback_model {
            Some(fallback)
                if count >= self.config.failure_threshold && fallback != requested =>
            {
                warn!(
                    model = requested,
                    fallback = fallback.as_str(),
                    consecutive_failures = count,
                    "Model under pressure, routing to fallback"
                );
                fallback.clone()
            }
            _ => requested.to_string(),
        }
    }

    fn note_success(&self, model: &str) {
        self.failures
            .lock()
            .expect("failure map lock poisoned")
            .remove(model);
    }

    fn note_failure(&self, model: &str) {
        let mut failures = self.failures.lock().expect("failure map lock poisoned");
        *failures.entry(model.to_string()).or_insert(0) += 1;
    }

    async fn try_complete(&self, request: ChatRequest) -> DelverResult<String> {
        let provider = self.provider.clone();
        let governor = self.governor.clone();
        let timeout_ms = self.config.call_timeout_ms;
        let model = request.model.clone();

        retry_async(
            move || {
                let provider = provider.clone();
                let governor = governor.clone();
                let request = request.clone();
                let model = model.clone();
                async move {
                    let _permit = governor.acquire(&model).await;
                    with_timeout(provider.chat(&request), timeout_ms, "llm_complete").await?
                }
                .boxed()
            },
            &self.config.retry,
            "llm_complete",
        )
        .await
    }

    /// Non-streaming completion. Retryable errors are re-queued with
    /// backoff; once retries are exhausted the fallback model (when
    /// declared) gets one full attempt before the error escalates.
    pub async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        model: &str,
        ctx: Option<u32>,
        options: LlmOptions,
    ) -> DelverResult<String> {
        let active = self.active_model(model);
        debug!(model = active.as_str(), "LLM completion requested");

        let request = ChatRequest {
            model: active.clone(),
            messages: messages.clone(),
            ctx,
            options: options.clone(),
        };

        match self.try_complete(request).await {
            Ok(text) => {
                self.note_success(&active);
                Ok(text)
            }
            Err(err) => {
                self.note_failure(&active);
                let fallback = match &self.config.fallback_model {
                    Some(fallback) if fallback != &active => fallback.clone(),
                    _ => return Err(err),
                };

                warn!(
                    model = active.as_str(),
                    fallback = fallback.as_str(),
                    error = %err,
                    "Completion failed, retrying once on fallback model"
                );

                let request = ChatRequest {
                    model: fallback.clone(),
                    messages,
                    ctx,
                    options,
                };
                match self.try_complete(request).await {
                    Ok(text) => {
                        self.note_success(&fallback);
                        Ok(text)
                    }
                    Err(fallback_err) => {
                        self.note_failure(&fallback);
                        Err(DelverError::Llm {
                            message: format!(
                                "Completion failed on {} ({}) and fallback {} ({})",
                                active, err, fallback, fallback_err
                            ),
                            provider: Some(self.provider.name().to_string()),
                            model: Some(active),
                            context: ErrorContext::new("llm_client")
                                .with_operation("complete")
                                .with_suggestion("Check model availability and rate limits"),
                        })
                    }
                }
            }
        }
    }

    /// Streaming completion. The governor slot is held for the lifetime of
    /// the stream so outstanding requests never exceed the ceiling.
    pub async fn stream(
        &self,
        messages: Vec<ChatMessage>,
        model: &str,
        ctx: Option<u32>,
        options: LlmOptions,
    ) -> DelverResult<CompletionStream> {
        let active = self.active_model(model);
        let permit = self.governor.acquire(&active).await;

        let request = ChatRequest {
            model: active.clone(),
            messages,
            ctx,
            options,
        };

        match self.provider.chat_stream(&request).await {
            Ok(rx) => {
                self.note_success(&active);
                info!(model = active.as_str(), "Streaming completion started");
                Ok(CompletionStream {
                    rx,
                    _permit: permit,
                })
            }
            Err(err) => {
                self.note_failure(&active);
                Err(err)
            }
        }
    }
}

/// A finite stream of text fragments; holds its governor slot until dropped
pub struct CompletionStream {
    rx: mpsc::Receiver<DelverResult<String>>,
    _permit: GovernorPermit,
}

impl CompletionStream {
    pub async fn next_fragment(&mut self) -> Option<DelverResult<String>> {
        self.rx.recv().await
    }

    /// Drain the stream into one string, failing on the first I/O error
    pub async fn collect_text(mut self) -> DelverResult<String> {
        let mut text = String::new();
        while let Some(fragment) = self.next_fragment().await {
            text.push_str(&fragment?);
        }
        Ok(text)
    }
}

impl futures::Stream for CompletionStream {
    type Item = DelverResult<String>;

    fn poll_next(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Provider that fails a fixed number of times per model before
    /// answering, recording the models it was asked for.
    struct FlakyProvider {
        failures_remaining: Mutex<HashMap<String, usize>>,
        calls: Mutex<Vec<String>>,
        total_calls: AtomicUsize,
    }

    impl FlakyProvider {
        fn new(failures: &[(&str, usize)]) -> Self {
            Self {
                failures_remaining: Mutex::new(
                    failures
                        .iter()
                        .map(|(m, n)| (m.to_string(), *n))
                        .collect(),
                ),
                calls: Mutex::new(Vec::new()),
                total_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ChatProvider for FlakyProvider {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn chat(&self, request: &ChatRequest) -> DelverResult<String> {
            self.total_calls.fetch_add(1, Ordering::SeqCst);
            self.calls.lock().unwrap().push(request.model.clone());

            let mut failures = self.failures_remaining.lock().unwrap();
            let remaining = failures.entry(request.model.clone()).or_insert(0);
            if *remaining > 0 {
                *remaining -= 1;
                return Err(DelverError::Network {
                    message: "transient".to_string(),
                    source: None,
                    context: ErrorContext::new("flaky"),
                });
            }
            Ok(format!("answer from {}", request.model))
        }

        async fn chat_stream(
            &self,
            request: &ChatRequest,
        ) -> DelverResult<mpsc::Receiver<DelverResult<String>>> {
            let (tx, rx) = mpsc::channel(4);
            let model = request.model.clone();
            tokio::spawn(async move {
                let _ = tx.send(Ok(format!("answer from {}", model))).await;
            });
            Ok(rx)
        }
    }

    fn quick_config(fallback: Option<&str>) -> LlmClientConfig {
        LlmClientConfig {
            retry: RetryConfig {
                max_attempts: 2,
                initial_delay_ms: 1,
                max_delay_ms: 2,
                backoff_multiplier: 1.0,
                jitter: false,
            },
            call_timeout_ms: 5_000,
            failure_threshold: 2,
            fallback_model: fallback.map(|m| m.to_string()),
        }
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let provider = Arc::new(FlakyProvider::new(&[("main", 1)]));
        let client = LlmClient::new(
            provider.clone(),
            Arc::new(RateLimitGovernor::new(2, -1)),
            quick_config(None),
        );

        let text = client
            .complete(vec![ChatMessage::user("q")], "main", None, LlmOptions::default())
            .await
            .unwrap();
        assert_eq!(text, "answer from main");
        assert_eq!(provider.total_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn falls_back_after_retries_exhausted() {
        let provider = Arc::new(FlakyProvider::new(&[("main", 10)]));
        let client = LlmClient::new(
            provider.clone(),
            Arc::new(RateLimitGovernor::new(2, -1)),
            quick_config(Some("backup")),
        );

        let text = client
            .complete(vec![ChatMessage::user("q")], "main", None, LlmOptions::default())
            .await
            .unwrap();
        assert_eq!(text, "answer from backup");

        let calls = provider.calls.lock().unwrap().clone();
        assert!(calls.contains(&"main".to_string()));
        assert!(calls.contains(&"backup".to_string()));
    }

    #[tokio::test]
    async fn sustained_failures_route_straight_to_fallback() {
        let provider = Arc::new(FlakyProvider::new(&[("main", 100)]));
        let client = LlmClient::new(
            provider.clone(),
            Arc::new(RateLimitGovernor::new(2, -1)),
            quick_config(Some("backup")),
        );

        // Two failing rounds push "main" past the failure threshold.
        for _ in 0..2 {
            let _ = client
                .complete(vec![ChatMessage::user("q")], "main", None, LlmOptions::default())
                .await;
        }

        provider.calls.lock().unwrap().clear();
        let text = client
            .complete(vec![ChatMessage::user("q")], "main", None, LlmOptions::default())
            .await
            .unwrap();
        assert_eq!(text, "answer from backup");

        let calls = provider.calls.lock().unwrap().clone();
        assert!(calls.iter().all(|m| m == "backup"));
    }

    #[tokio::test]
    async fn no_fallback_propagates_error() {
        let provider = Arc::new(FlakyProvider::new(&[("main", 100)]));
        let client = LlmClient::new(
            provider,
            Arc::new(RateLimitGovernor::new(2, -1)),
            quick_config(None),
        );

        let result = client
            .complete(vec![ChatMessage::user("q")], "main", None, LlmOptions::default())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn stream_collects_fragments() {
        let provider = Arc::new(FlakyProvider::new(&[]));
        let client = LlmClient::new(
            provider,
            Arc::new(RateLimitGovernor::new(2, -1)),
            quick_config(None),
        );

        let stream = client
            .stream(vec![ChatMessage::user("q")], "main", None, LlmOptions::default())
            .await
            .unwrap();
        assert_eq!(stream.collect_text().await.unwrap(), "answer from main");
    }
}
