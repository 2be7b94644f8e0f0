//! Delver Web Server
//!
//! Binds the research engine to an OpenAI-style chat-completions endpoint
//! with SSE streaming, plus the session management API.

pub mod handlers;
pub mod openapi;
pub mod routes;
pub mod server;
pub mod state;

pub use server::DelverServer;
pub use state::AppState;

use axum::{
    extract::DefaultBodyLimit,
    http::{
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
        Method,
    },
    Router,
};
use tower_http::{cors::{Any, CorsLayer}, trace::TraceLayer};

/// Create the main application router
pub fn create_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([AUTHORIZATION, ACCEPT, CONTENT_TYPE]);

    Router::new()
        .merge(routes::api_routes())
        .merge(routes::openapi_routes())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(DefaultBodyLimit::max(2 * 1024 * 1024))
        .with_state(state)
}

/// Error types for the web server
#[derive(thiserror::Error, Debug)]
pub enum WebError {
    #[error("Server error: {0}")]
    Server(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Datastore error: {0}")]
    Datastore(String),
}

/// Result type for web operations
pub type WebResult<T> = Result<T, WebError>;
