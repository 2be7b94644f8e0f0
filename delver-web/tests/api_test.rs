//! Web API integration tests against scripted backends

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use delver_core::{AppConfig, DelverResult, RetryConfig};
use delver_fetch::{AdmissionController, PageSource, SearchBackend};
use delver_llm::{ChatProvider, ChatRequest, LlmClient, LlmClientConfig, RateLimitGovernor};
use delver_persist::SessionStore;
use delver_research::{EngineConfig, ResearchEngine};
use delver_web::{create_app, AppState};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::ServiceExt;

const REPORT: &str = "The investigation covered the available sources in detail and found a \
consistent picture across them. The first section lays out the background; the second weighs \
the evidence from each fetched page; the third concludes with the direct answer to the query \
and its caveats, citing the sources used throughout the analysis. [1]\n\nBibliography:\n\
[1] https://host-0.example/page";

struct OneShotLlm;

#[async_trait]
impl ChatProvider for OneShotLlm {
    fn name(&self) -> &str {
        "oneshot"
    }

    async fn chat(&self, request: &ChatRequest) -> DelverResult<String> {
        let system = request
            .messages
            .first()
            .map(|m| m.content.as_str())
            .unwrap_or("");
        let user = request
            .messages
            .last()
            .map(|m| m.content.as_str())
            .unwrap_or("");

        if system.contains("systematic research planner") {
            return Ok("['the only query']".to_string());
        }
        if user.contains("structuring and refining research plans") {
            return Ok("Look at the obvious sources first.".to_string());
        }
        if user.contains("evaluating research results") {
            return Ok("<done>".to_string());
        }
        if system.contains("strict and concise evaluator") {
            return Ok("Yes".to_string());
        }
        if system.contains("extracting and summarizing") {
            return Ok("One relevant extracted fact.".to_string());
        }
        if user.contains("generating writing plans") {
            return Ok("Intro, evidence, conclusion.".to_string());
        }
        Ok(REPORT.to_string())
    }

    async fn chat_stream(
        &self,
        request: &ChatRequest,
    ) -> DelverResult<mpsc::Receiver<DelverResult<String>>> {
        let text = self.chat(request).await?;
        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(async move {
            let _ = tx.send(Ok(text)).await;
        });
        Ok(rx)
    }
}

struct OneLinkSearch;

#[async_trait]
impl SearchBackend for OneLinkSearch {
    async fn search(&self, _query: &str) -> DelverResult<Vec<String>> {
        Ok(vec!["https://host-0.example/page".to_string()])
    }
}

struct StaticPages;

#[async_trait]
impl PageSource for StaticPages {
    async fn fetch_text(&self, url: &str) -> DelverResult<String> {
        Ok(format!("# Page\nContent from {}", url))
    }
}

async fn test_state(dir: &TempDir) -> AppState {
    let client = LlmClient::new(
        Arc::new(OneShotLlm),
        Arc::new(RateLimitGovernor::new(8, -1)),
        LlmClientConfig {
            retry: RetryConfig {
                max_attempts: 2,
                initial_delay_ms: 1,
                max_delay_ms: 5,
                backoff_multiplier: 2.0,
                jitter: false,
            },
            call_timeout_ms: 10_000,
            failure_threshold: 2,
            fallback_model: None,
        },
    );
    let store = SessionStore::open(dir.path()).await.unwrap();
    let engine = Arc::new(ResearchEngine::new(
        Arc::new(client),
        Arc::new(OneLinkSearch),
        Arc::new(StaticPages),
        Arc::new(AdmissionController::new(4, 2, Duration::ZERO)),
        Arc::new(store),
        EngineConfig::default(),
    ));
    AppState::with_engine(AppConfig::default(), engine)
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), 10 * 1024 * 1024)
        .await
        .unwrap();
    String::from_utf8_lossy(&bytes).to_string()
}

#[tokio::test]
async fn health_check_responds_ok() {
    let dir = TempDir::new().unwrap();
    let app = create_app(test_state(&dir).await);

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_string(response).await.contains("ok"));
}

#[tokio::test]
async fn listing_an_empty_store_yields_zero_sessions() {
    let dir = TempDir::new().unwrap();
    let app = create_app(test_state(&dir).await);

    let response = app
        .oneshot(Request::builder().uri("/sessions").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    assert!(body.contains("\"count\":0"));
}

#[tokio::test]
async fn unknown_session_paths_return_not_found() {
    let dir = TempDir::new().unwrap();
    let app = create_app(test_state(&dir).await);

    for (method, uri) in [
        ("GET", "/sessions/nope"),
        ("DELETE", "/sessions/nope"),
        ("GET", "/sessions/nope/history"),
        ("POST", "/sessions/nope/rollback/1"),
        ("POST", "/sessions/nope/resume"),
    ] {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{} {}", method, uri);
    }
}

#[tokio::test]
async fn missing_user_query_is_unprocessable() {
    let dir = TempDir::new().unwrap();
    let app = create_app(test_state(&dir).await);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/chat/completions")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"messages": [], "stream": false}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn unknown_message_role_is_rejected_at_the_boundary() {
    let dir = TempDir::new().unwrap();
    let app = create_app(test_state(&dir).await);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/chat/completions")
                .header("content-type", "application/json")
                .body(Body::from(
                    r#"{"messages": [{"role": "robot", "content": "hi"}], "stream": false}"#,
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body_string(response).await.contains("unknown message role"));
}

#[tokio::test]
async fn streaming_run_announces_session_id_first_and_terminates() {
    let dir = TempDir::new().unwrap();
    let app = create_app(test_state(&dir).await);

    let request_body = r#"{
        "messages": [{"role": "user", "content": "what is the answer?"}],
        "stream": true,
        "max_iterations": 1
    }"#;

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/chat/completions")
                .header("content-type", "application/json")
                .body(Body::from(request_body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    assert!(content_type.starts_with("text/event-stream"));

    let body = body_string(response).await;
    let first_data_line = body
        .lines()
        .find(|line| line.starts_with("data:"))
        .expect("stream contains data lines");
    assert!(first_data_line.contains("SESSION_ID:"));
    assert!(body.contains("data: [DONE]"));
}

#[tokio::test]
async fn non_streaming_run_returns_the_final_report() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir).await;
    let app = create_app(state.clone());

    let request_body = r#"{
        "messages": [{"role": "user", "content": "what is the answer?"}],
        "stream": false,
        "max_iterations": 1
    }"#;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/chat/completions")
                .header("content-type", "application/json")
                .body(Body::from(request_body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
    let content = parsed["choices"][0]["message"]["content"].as_str().unwrap();
    assert!(content.contains("Bibliography"));
    let session_id = parsed["session_id"].as_str().unwrap().to_string();

    // The session is resolvable and complete.
    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/sessions/{}", session_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    assert!(body.contains("\"completed\""));
}
