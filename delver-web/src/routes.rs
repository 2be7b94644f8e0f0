//! Route definitions for the delver web server

use crate::{handlers, openapi, AppState};
use axum::{
    response::Json,
    routing::{delete, get, post},
    Router,
};
use utoipa::OpenApi;

/// Create API routes
pub fn api_routes() -> Router<AppState> {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Research API (OpenAI chat-completions shape)
        .route("/v1/chat/completions", post(handlers::chat_completions))
        .route("/v1/models", get(handlers::list_models))
        .route("/models", get(handlers::list_models))
        // Session API
        .route("/sessions", get(handlers::list_sessions))
        .route("/sessions/{session_id}", get(handlers::get_session))
        .route("/sessions/{session_id}", delete(handlers::delete_session))
        .route(
            "/sessions/{session_id}/resume",
            post(handlers::resume_session),
        )
        .route(
            "/sessions/{session_id}/history",
            get(handlers::get_session_history),
        )
        .route(
            "/sessions/{session_id}/rollback/{iteration}",
            post(handlers::rollback_session),
        )
}

/// Create OpenAPI documentation routes
pub fn openapi_routes() -> Router<AppState> {
    Router::new().route("/api-docs/openapi.json", get(get_openapi_json))
}

async fn get_openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(openapi::ApiDoc::openapi())
}
