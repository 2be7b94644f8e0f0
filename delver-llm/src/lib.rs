//! Delver LLM - typed language-model capability
//!
//! Exposes non-streaming and streaming completion over interchangeable
//! backends (hosted OpenAI-compatible endpoint, Ollama, LM Studio). Every
//! call is routed through the rate-limit governor, retried on transient
//! failures, and switched to a declared fallback model under sustained
//! pressure.

pub mod client;
pub mod governor;
pub mod provider;

pub use client::{CompletionStream, LlmClient, LlmClientConfig};
pub use governor::{GovernorPermit, RateLimitGovernor};
pub use provider::{build_provider, ChatProvider, ChatRequest, LlmOptions, OllamaProvider, OpenAiCompatProvider};
