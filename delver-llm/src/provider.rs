//! Chat providers
//!
//! Backends implementing the text-in / text-out contract: a hosted
//! OpenAI-compatible endpoint and an Ollama server. LM Studio exposes the
//! OpenAI-compatible contract and is served by the same provider pointed at
//! its base URL. The wire layer is deliberately thin so the client above it
//! can classify HTTP statuses (429 vs other 4xx vs 5xx) for retry and
//! fallback decisions.

use delver_core::{ChatMessage, DelverError, DelverResult, ErrorContext};
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Sampling options for a completion call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LlmOptions {
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub seed: Option<i64>,
    pub max_tokens: Option<u32>,
    /// Ask the backend to include reasoning traces when supported
    pub reasoning: bool,
}

/// One completion request
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    /// Context window hint; `None` leaves the provider default in place
    pub ctx: Option<u32>,
    pub options: LlmOptions,
}

/// Text-in / text-out capability with a streaming variant. A response is
/// either the complete text or an error; a partial stream only terminates
/// early on an I/O error, delivered as the final item.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn chat(&self, request: &ChatRequest) -> DelverResult<String>;

    async fn chat_stream(
        &self,
        request: &ChatRequest,
    ) -> DelverResult<mpsc::Receiver<DelverResult<String>>>;
}

/// Map a non-success HTTP status to the matching error kind
fn classify_status(provider: &str, status: u16, body: String) -> DelverError {
    if status == 429 {
        DelverError::RateLimit {
            message: format!("{}: {}", provider, body),
            retry_after_ms: None,
            context: ErrorContext::new(provider).with_operation("chat"),
        }
    } else if (400..500).contains(&status) {
        DelverError::UpstreamRefused {
            status,
            message: format!("{}: {}", provider, body),
            context: ErrorContext::new(provider).with_operation("chat"),
        }
    } else {
        DelverError::Network {
            message: format!("{} returned {}: {}", provider, status, body),
            source: None,
            context: ErrorContext::new(provider).with_operation("chat"),
        }
    }
}

fn transport_error(provider: &str, err: reqwest::Error) -> DelverError {
    if err.is_timeout() {
        DelverError::Timeout {
            operation: format!("{} request", provider),
            duration_ms: 0,
            context: ErrorContext::new(provider).with_operation("chat"),
        }
    } else {
        DelverError::Network {
            message: format!("{} request failed: {}", provider, err),
            source: Some(Box::new(err)),
            context: ErrorContext::new(provider).with_operation("chat"),
        }
    }
}

// ----------------------
// OpenAI-compatible wire
// ----------------------

#[derive(Serialize)]
struct OpenAiChatBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Deserialize)]
struct OpenAiMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiStreamChunk {
    choices: Vec<OpenAiStreamChoice>,
}

#[derive(Deserialize)]
struct OpenAiStreamChoice {
    #[serde(default)]
    delta: OpenAiDelta,
}

#[derive(Deserialize, Default)]
struct OpenAiDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Provider for any endpoint speaking the OpenAI chat-completions contract
pub struct OpenAiCompatProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    name: String,
}

impl OpenAiCompatProvider {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self::named("openai_compatible", base_url, api_key)
    }

    pub fn named(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            name: name.into(),
        }
    }

    fn body<'a>(&self, request: &'a ChatRequest, stream: bool) -> OpenAiChatBody<'a> {
        OpenAiChatBody {
            model: &request.model,
            messages: &request.messages,
            stream,
            temperature: request.options.temperature,
            top_p: request.options.top_p,
            seed: request.options.seed,
            max_tokens: request.options.max_tokens,
        }
    }

    async fn send(&self, request: &ChatRequest, stream: bool) -> DelverResult<reqwest::Response> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&self.body(request, stream))
            .send()
            .await
            .map_err(|e| transport_error(&self.name, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(&self.name, status.as_u16(), body));
        }
        Ok(response)
    }
}

#[async_trait]
impl ChatProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chat(&self, request: &ChatRequest) -> DelverResult<String> {
        debug!(
            provider = self.name.as_str(),
            model = request.model.as_str(),
            message_count = request.messages.len(),
            "Sending completion request"
        );

        let response = self.send(request, false).await?;
        let parsed: OpenAiChatResponse =
            response.json().await.map_err(|e| transport_error(&self.name, e))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| DelverError::Llm {
                message: "No text content in completion response".to_string(),
                provider: Some(self.name.clone()),
                model: Some(request.model.clone()),
                context: ErrorContext::new(&self.name).with_operation("chat"),
            })
    }

    async fn chat_stream(
        &self,
        request: &ChatRequest,
    ) -> DelverResult<mpsc::Receiver<DelverResult<String>>> {
        let response = self.send(request, true).await?;
        let provider = self.name.clone();
        let (tx, rx) = mpsc::channel(32);

        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut buffer = String::new();

            while let Some(chunk) = stream.next().await {
                let bytes = match chunk {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = tx.send(Err(transport_error(&provider, e))).await;
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&bytes));

                while let Some(pos) = buffer.find('\n') {
                    let line = buffer[..pos].trim().to_string();
                    buffer.drain(..=pos);
                    let Some(data) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let data = data.trim();
                    if data == "[DONE]" {
                        return;
                    }
                    match serde_json::from_str::<OpenAiStreamChunk>(data) {
                        Ok(chunk) => {
                            let fragment = chunk
                                .choices
                                .into_iter()
                                .next()
                                .and_then(|c| c.delta.content);
                            if let Some(fragment) = fragment {
                                if !fragment.is_empty() && tx.send(Ok(fragment)).await.is_err() {
                                    return;
                                }
                            }
                        }
                        Err(e) => {
                            warn!(provider = provider.as_str(), error = %e, "Skipping malformed stream frame");
                        }
                    }
                }
            }
        });

        Ok(rx)
    }
}

// ----------------------
// Ollama wire
// ----------------------

#[derive(Serialize)]
struct OllamaChatBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize, Default)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_ctx: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<i64>,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    #[serde(default)]
    message: Option<OllamaMessage>,
    #[serde(default)]
    done: bool,
}

#[derive(Deserialize)]
struct OllamaMessage {
    #[serde(default)]
    content: String,
}

/// Provider for a local Ollama server
pub struct OllamaProvider {
    client: reqwest::Client,
    base_url: String,
}

impl OllamaProvider {
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into().trim_end_matches('/').to_string();
        // Ollama expects host:port without the OpenAI /v1 suffix
        if base_url.ends_with("/v1") {
            base_url.truncate(base_url.len() - 3);
            base_url = base_url.trim_end_matches('/').to_string();
        }
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            base_url = format!("http://{}", base_url);
        }
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }

    fn body<'a>(&self, request: &'a ChatRequest, stream: bool) -> OllamaChatBody<'a> {
        // The context knob is only forwarded for hints large enough to
        // matter; small values fall back to the model default.
        let num_ctx = request.ctx.filter(|ctx| *ctx > 2000);
        OllamaChatBody {
            model: &request.model,
            messages: &request.messages,
            stream,
            options: OllamaOptions {
                num_predict: request.options.max_tokens,
                num_ctx,
                temperature: request.options.temperature,
                top_p: request.options.top_p,
                seed: request.options.seed,
            },
        }
    }

    async fn send(&self, request: &ChatRequest, stream: bool) -> DelverResult<reqwest::Response> {
        let url = format!("{}/api/chat", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&self.body(request, stream))
            .send()
            .await
            .map_err(|e| transport_error("ollama", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status("ollama", status.as_u16(), body));
        }
        Ok(response)
    }
}

#[async_trait]
impl ChatProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn chat(&self, request: &ChatRequest) -> DelverResult<String> {
        debug!(
            model = request.model.as_str(),
            message_count = request.messages.len(),
            "Sending Ollama completion request"
        );

        let response = self.send(request, false).await?;
        let parsed: OllamaChatResponse =
            response.json().await.map_err(|e| transport_error("ollama", e))?;

        parsed
            .message
            .map(|m| m.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| DelverError::Llm {
                message: "No text content in Ollama response".to_string(),
                provider: Some("ollama".to_string()),
                model: Some(request.model.clone()),
                context: ErrorContext::new("ollama").with_operation("chat"),
            })
    }

    async fn chat_stream(
        &self,
        request: &ChatRequest,
    ) -> DelverResult<mpsc::Receiver<DelverResult<String>>> {
        let response = self.send(request, true).await?;
        let (tx, rx) = mpsc::channel(32);

        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut buffer = String::new();

            while let Some(chunk) = stream.next().await {
                let bytes = match chunk {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = tx.send(Err(transport_error("ollama", e))).await;
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&bytes));

                while let Some(pos) = buffer.find('\n') {
                    let line = buffer[..pos].trim().to_string();
                    buffer.drain(..=pos);
                    if line.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<OllamaChatResponse>(&line) {
                        Ok(parsed) => {
                            if let Some(message) = parsed.message {
                                if !message.content.is_empty()
                                    && tx.send(Ok(message.content)).await.is_err()
                                {
                                    return;
                                }
                            }
                            if parsed.done {
                                return;
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "Skipping malformed Ollama stream line");
                        }
                    }
                }
            }
        });

        Ok(rx)
    }
}

/// Build the provider selected by configuration. The `lmstudio` provider is
/// the OpenAI-compatible contract served from the LM Studio base URL.
pub fn build_provider(config: &delver_core::AppConfig) -> DelverResult<std::sync::Arc<dyn ChatProvider>> {
    let provider = if config.settings.use_local_llm {
        "ollama"
    } else {
        config.local_ai.provider.as_str()
    };

    match provider {
        "ollama" => Ok(std::sync::Arc::new(OllamaProvider::new(
            config.local_ai.ollama_base_url.clone(),
        ))),
        "lmstudio" => Ok(std::sync::Arc::new(OpenAiCompatProvider::named(
            "lmstudio",
            config.local_ai.lmstudio_base_url.clone(),
            String::new(),
        ))),
        "openai_compatible" => Ok(std::sync::Arc::new(OpenAiCompatProvider::new(
            config.api.openai_url.clone(),
            config.api.openai_compat_api_key.clone(),
        ))),
        other => Err(DelverError::Config {
            message: format!("Unsupported LLM provider: {}", other),
            source: None,
            context: ErrorContext::new("llm").with_operation("build_provider"),
        }),
    }
}
