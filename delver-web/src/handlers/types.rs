//! Request and response types for the web API

use delver_core::{Message, MessageLog, Role};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// One message in a chat-completions request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiMessage {
    pub role: String,
    pub content: String,
}

/// OpenAI-style chat-completions request extended with research knobs
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ChatCompletionRequest {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub messages: Vec<ApiMessage>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub max_iterations: Option<u32>,
    #[serde(default)]
    pub max_search_items: Option<usize>,
    #[serde(default)]
    pub default_model: Option<String>,
    #[serde(default)]
    pub reason_model: Option<String>,
    /// Resume this session instead of creating one
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub system_instruction: Option<String>,
}

impl ChatCompletionRequest {
    /// Convert the wire messages into the domain message log. Unknown
    /// roles are rejected at the boundary.
    pub fn message_log(&self) -> Result<MessageLog, String> {
        let messages = self
            .messages
            .iter()
            .map(|m| {
                m.role
                    .parse::<Role>()
                    .map(|role| Message::new(role, m.content.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(MessageLog::from_messages(messages))
    }
}

/// Non-streaming chat-completions response
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub session_id: String,
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ChatChoice {
    pub index: u32,
    pub message: ApiMessage,
    pub finish_reason: String,
}

/// Model listing entry
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ModelObject {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub owned_by: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ModelList {
    pub object: String,
    pub data: Vec<ModelObject>,
}

/// Query parameters for session listing
#[derive(Debug, Clone, Deserialize)]
pub struct ListSessionsParams {
    #[serde(default)]
    pub user_id: Option<String>,
}
