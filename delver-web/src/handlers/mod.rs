//! HTTP handlers

pub mod health;
pub mod research;
pub mod sessions;
pub mod types;

pub use health::health_check;
pub use research::{chat_completions, list_models};
pub use sessions::{
    delete_session, get_session, get_session_history, list_sessions, resume_session,
    rollback_session,
};

use axum::http::StatusCode;
use delver_core::DelverError;

/// Map a store or engine error onto an HTTP status
pub(crate) fn error_status(err: &DelverError) -> StatusCode {
    match err {
        DelverError::NotFound { .. } => StatusCode::NOT_FOUND,
        DelverError::Session { .. } => StatusCode::BAD_REQUEST,
        DelverError::Config { .. } => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
