//! Application state: every shared service is constructed once at startup
//! and injected; there are no process-wide singletons.

use crate::{WebError, WebResult};
use delver_core::{ctx_hint, AppConfig, ResearchSettings, RetryConfig};
use delver_fetch::{
    AdmissionController, HostedParserClient, LocalFetcher, PageAcquirer, SearxngClient,
};
use delver_llm::{build_provider, LlmClient, LlmClientConfig, RateLimitGovernor};
use delver_persist::SessionStore;
use delver_research::{EngineConfig, ResearchEngine};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub engine: Arc<ResearchEngine>,
    pub store: Arc<SessionStore>,
}

impl AppState {
    /// Wire up the engine and its collaborators from configuration.
    pub async fn new(config: AppConfig) -> WebResult<Self> {
        let store = Arc::new(
            SessionStore::open(&config.persistence.sessions_dir)
                .await
                .map_err(|e| WebError::Datastore(e.to_string()))?,
        );

        let governor = Arc::new(RateLimitGovernor::new(
            config.rate_limits.llm_concurrent_limit,
            config.rate_limits.request_per_minute,
        ));

        let provider = build_provider(&config).map_err(|e| WebError::Config(e.to_string()))?;
        let llm = Arc::new(LlmClient::new(
            provider,
            governor.clone(),
            LlmClientConfig {
                retry: RetryConfig::default(),
                call_timeout_ms: config.rate_limits.llm_timeout * 1000,
                failure_threshold: config.rate_limits.failure_threshold,
                fallback_model: config.rate_limits.fallback_model.clone(),
            },
        ));

        let search = Arc::new(SearxngClient::new(config.api.searxng_url.clone()));

        let pages: Arc<dyn delver_fetch::PageSource> = if config.settings.use_hosted_parser {
            Arc::new(PageAcquirer::hosted(
                HostedParserClient::new(
                    config.api.parser_base_url.clone(),
                    config.api.parser_api_key.clone(),
                    governor.clone(),
                    Duration::from_secs(config.parsing.fetch_timeout),
                ),
                config.parsing.max_html_length,
            ))
        } else {
            Arc::new(PageAcquirer::local(
                LocalFetcher::new(config.parsing.clone()),
                config.parsing.max_html_length,
            ))
        };

        let admission = Arc::new(AdmissionController::new(
            config.concurrency.concurrent_limit,
            config.concurrency.per_domain_limit,
            Duration::from_secs_f64(config.concurrency.cool_down),
        ));

        let engine = Arc::new(ResearchEngine::new(
            llm,
            search,
            pages,
            admission,
            store.clone(),
            EngineConfig {
                operation_wait_time: Duration::from_secs(config.rate_limits.operation_wait_time),
                default_model_ctx: ctx_hint(config.local_ai.default_model_ctx),
                reason_model_ctx: ctx_hint(config.local_ai.reason_model_ctx),
                ..EngineConfig::default()
            },
        ));

        info!("Application state initialized");
        Ok(Self {
            config: Arc::new(config),
            engine,
            store,
        })
    }

    /// Assemble a state around a prebuilt engine (used by tests)
    pub fn with_engine(config: AppConfig, engine: Arc<ResearchEngine>) -> Self {
        let store = engine.store();
        Self {
            config: Arc::new(config),
            engine,
            store,
        }
    }

    /// Default per-session settings from configuration
    pub fn default_settings(&self) -> ResearchSettings {
        self.config.research_settings()
    }
}
