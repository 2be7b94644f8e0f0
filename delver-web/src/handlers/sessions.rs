//! Session management handlers

use super::error_status;
use super::types::ListSessionsParams;
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use tracing::{error, info};

fn error_response(err: delver_core::DelverError) -> Response {
    (
        error_status(&err),
        Json(serde_json::json!({ "error": err.to_string() })),
    )
        .into_response()
}

/// List session summaries, optionally filtered by user id
#[utoipa::path(
    get,
    path = "/sessions",
    tag = "Sessions",
    params(("user_id" = Option<String>, Query, description = "Filter by user id")),
    responses((status = 200, description = "Session summaries, newest first"))
)]
pub async fn list_sessions(
    State(state): State<AppState>,
    Query(params): Query<ListSessionsParams>,
) -> Response {
    match state.store.list(params.user_id.as_deref()).await {
        Ok(summaries) => {
            let count = summaries.len();
            Json(serde_json::json!({
                "sessions": summaries,
                "count": count,
            }))
            .into_response()
        }
        Err(err) => {
            error!(error = %err, "Failed to list sessions");
            error_response(err)
        }
    }
}

/// Full session record
#[utoipa::path(
    get,
    path = "/sessions/{session_id}",
    tag = "Sessions",
    params(("session_id" = String, Path, description = "Session id")),
    responses(
        (status = 200, description = "Full session record"),
        (status = 404, description = "Session not found")
    )
)]
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    match state.store.load(&session_id).await {
        Ok(session) => Json(session).into_response(),
        Err(err) => error_response(err),
    }
}

/// Delete a session and its validation record
#[utoipa::path(
    delete,
    path = "/sessions/{session_id}",
    tag = "Sessions",
    params(("session_id" = String, Path, description = "Session id")),
    responses(
        (status = 204, description = "Session deleted"),
        (status = 404, description = "Session not found")
    )
)]
pub async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    match state.store.delete(&session_id).await {
        Ok(true) => {
            info!(session_id = session_id.as_str(), "Session deleted");
            StatusCode::NO_CONTENT.into_response()
        }
        Ok(false) => StatusCode::NOT_FOUND.into_response(),
        Err(err) => {
            error!(session_id = session_id.as_str(), error = %err, "Failed to delete session");
            error_response(err)
        }
    }
}

/// Resume a session: begins a streaming run continuing from the last
/// completed iteration.
#[utoipa::path(
    post,
    path = "/sessions/{session_id}/resume",
    tag = "Sessions",
    params(("session_id" = String, Path, description = "Session id")),
    responses(
        (status = 200, description = "Streamed research events"),
        (status = 400, description = "Session is not resumable"),
        (status = 404, description = "Session not found")
    )
)]
pub async fn resume_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    info!(session_id = session_id.as_str(), "Resume requested");
    match state.engine.resume(&session_id).await {
        Ok(run) => super::research::sse_response(run).into_response(),
        Err(err) => {
            error!(session_id = session_id.as_str(), error = %err, "Failed to resume session");
            error_response(err)
        }
    }
}

/// Iteration history projection
#[utoipa::path(
    get,
    path = "/sessions/{session_id}/history",
    tag = "Sessions",
    params(("session_id" = String, Path, description = "Session id")),
    responses(
        (status = 200, description = "Iteration records"),
        (status = 404, description = "Session not found")
    )
)]
pub async fn get_session_history(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    match state.store.history(&session_id).await {
        Ok(history) => Json(serde_json::json!({ "history": history })).into_response(),
        Err(err) => error_response(err),
    }
}

/// Roll the session back to an earlier iteration
#[utoipa::path(
    post,
    path = "/sessions/{session_id}/rollback/{iteration}",
    tag = "Sessions",
    params(
        ("session_id" = String, Path, description = "Session id"),
        ("iteration" = u32, Path, description = "Iteration to roll back to")
    ),
    responses(
        (status = 200, description = "The rolled-back session"),
        (status = 400, description = "Iteration out of range"),
        (status = 404, description = "Session not found")
    )
)]
pub async fn rollback_session(
    State(state): State<AppState>,
    Path((session_id, iteration)): Path<(String, u32)>,
) -> Response {
    info!(
        session_id = session_id.as_str(),
        iteration = iteration,
        "Rollback requested"
    );
    match state.store.rollback(&session_id, iteration).await {
        Ok(session) => Json(session).into_response(),
        Err(err) => {
            error!(session_id = session_id.as_str(), error = %err, "Rollback failed");
            error_response(err)
        }
    }
}
