//! OpenAPI documentation

use crate::handlers;
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health::health_check,
        handlers::research::chat_completions,
        handlers::research::list_models,
        handlers::sessions::list_sessions,
        handlers::sessions::get_session,
        handlers::sessions::delete_session,
        handlers::sessions::resume_session,
        handlers::sessions::get_session_history,
        handlers::sessions::rollback_session,
    ),
    components(schemas(
        handlers::types::ApiMessage,
        handlers::types::ChatCompletionRequest,
        handlers::types::ChatCompletionResponse,
        handlers::types::ChatChoice,
        handlers::types::ModelObject,
        handlers::types::ModelList,
    )),
    tags(
        (name = "Research", description = "Iterative research runs"),
        (name = "Sessions", description = "Session persistence, resume and rollback"),
        (name = "Health", description = "Service health")
    ),
    info(
        title = "Delver API",
        description = "Iterative web-research agent with persistent, resumable sessions",
        version = "0.1.0"
    )
)]
pub struct ApiDoc;
