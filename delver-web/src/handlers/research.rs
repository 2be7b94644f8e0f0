//! Research API handlers: the chat-completions endpoint and model listing

use super::types::{
    ApiMessage, ChatChoice, ChatCompletionRequest, ChatCompletionResponse, ModelList, ModelObject,
};
use super::error_status;
use crate::AppState;
use axum::{
    extract::State,
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Json, Response},
    Json as JsonExtractor,
};
use delver_research::{ResearchChunk, ResearchRequest, ResearchRun};
use futures::Stream;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub const MODEL_ID: &str = "deep_researcher";

/// Cancels the run when the client goes away mid-stream.
struct CancelOnDrop(CancellationToken);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

fn event_for(chunk: &ResearchChunk) -> Event {
    match chunk {
        ResearchChunk::SessionId(id) => Event::default().data(format!("SESSION_ID:{}", id)),
        ResearchChunk::Done => Event::default().data("[DONE]"),
        other => Event::default().data(
            serde_json::json!({
                "choices": [{"delta": {"content": other.render()}}]
            })
            .to_string(),
        ),
    }
}

/// Convert a run into a text/event-stream response. The first event of a
/// new session carries the session id; the stream terminates with the
/// `[DONE]` sentinel.
pub(crate) fn sse_response(run: ResearchRun) -> Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>> {
    let guard = CancelOnDrop(run.cancel.clone());
    let stream = ReceiverStream::new(run.chunks).map(move |chunk| {
        let _guard = &guard;
        Ok::<Event, std::convert::Infallible>(event_for(&chunk))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Run to completion and shape the final report as a single completion
/// object.
async fn completion_response(run: ResearchRun) -> Response {
    let session_id = run.session_id.clone();
    let mut rx = run.chunks;
    let mut report = String::new();
    let mut failure: Option<String> = None;

    while let Some(chunk) = rx.recv().await {
        match chunk {
            ResearchChunk::ReportFragment(fragment) => report.push_str(&fragment),
            ResearchChunk::Error(message) => failure = Some(message),
            _ => {}
        }
    }
    let _ = run.handle.await;

    if let Some(message) = failure {
        error!(session_id = session_id.as_str(), error = message.as_str(), "Research run failed");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": message, "session_id": session_id })),
        )
            .into_response();
    }

    let response = ChatCompletionResponse {
        id: format!("chatcmpl-{}", session_id),
        object: "chat.completion".to_string(),
        created: chrono::Utc::now().timestamp(),
        model: MODEL_ID.to_string(),
        session_id,
        choices: vec![ChatChoice {
            index: 0,
            message: ApiMessage {
                role: "assistant".to_string(),
                content: report,
            },
            finish_reason: "stop".to_string(),
        }],
    };
    Json(response).into_response()
}

/// Research endpoint shaped like an OpenAI chat-completions endpoint
#[utoipa::path(
    post,
    path = "/v1/chat/completions",
    tag = "Research",
    request_body = ChatCompletionRequest,
    responses(
        (status = 200, description = "Streamed research events or the final report"),
        (status = 404, description = "Unknown session id"),
        (status = 422, description = "Missing user query")
    )
)]
pub async fn chat_completions(
    State(state): State<AppState>,
    JsonExtractor(request): JsonExtractor<ChatCompletionRequest>,
) -> Response {
    let run = if let Some(session_id) = &request.session_id {
        info!(session_id = session_id.as_str(), "Resuming research session");
        match state.engine.resume(session_id).await {
            Ok(run) => run,
            Err(err) => {
                error!(session_id = session_id.as_str(), error = %err, "Failed to resume session");
                return (
                    error_status(&err),
                    Json(serde_json::json!({ "error": err.to_string() })),
                )
                    .into_response();
            }
        }
    } else {
        let log = match request.message_log() {
            Ok(log) => log,
            Err(message) => {
                return (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    Json(serde_json::json!({ "error": message })),
                )
                    .into_response();
            }
        };
        let Some(user_query) = log
            .first_user_content()
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(str::to_string)
        else {
            return (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(serde_json::json!({ "error": "User query is missing or empty." })),
            )
                .into_response();
        };

        let mut settings = state.default_settings();
        if let Some(max_iterations) = request.max_iterations {
            settings.max_iterations = max_iterations;
        }
        if let Some(max_search_items) = request.max_search_items {
            settings.max_search_items = max_search_items;
        }
        if let Some(default_model) = &request.default_model {
            settings.default_model = default_model.clone();
        }
        if let Some(reason_model) = &request.reason_model {
            settings.reason_model = reason_model.clone();
        }

        info!(query = user_query.as_str(), stream = request.stream, "Starting research session");
        let system_instruction = request
            .system_instruction
            .clone()
            .or_else(|| log.system_instruction().map(str::to_string));

        match state
            .engine
            .start(ResearchRequest {
                user_query,
                system_instruction,
                settings,
                user_id: request.user_id.clone(),
            })
            .await
        {
            Ok(run) => run,
            Err(err) => {
                error!(error = %err, "Failed to start research session");
                return (
                    error_status(&err),
                    Json(serde_json::json!({ "error": err.to_string() })),
                )
                    .into_response();
            }
        }
    };

    if request.stream {
        sse_response(run).into_response()
    } else {
        completion_response(run).await
    }
}

/// List the available models
#[utoipa::path(
    get,
    path = "/v1/models",
    tag = "Research",
    responses((status = 200, description = "Model list", body = ModelList))
)]
pub async fn list_models() -> Json<ModelList> {
    Json(ModelList {
        object: "list".to_string(),
        data: vec![ModelObject {
            id: MODEL_ID.to_string(),
            object: "model".to_string(),
            created: chrono::Utc::now().timestamp(),
            owned_by: MODEL_ID.to_string(),
        }],
    })
}
