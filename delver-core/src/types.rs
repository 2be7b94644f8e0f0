//! Core data type definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Message role in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Developer,
    Tool,
    Function,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Developer => "developer",
            Role::Tool => "tool",
            Role::Function => "function",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "developer" => Ok(Role::Developer),
            "tool" => Ok(Role::Tool),
            "function" => Ok(Role::Function),
            other => Err(format!("unknown message role: {}", other)),
        }
    }
}

/// Kind of content carried by a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    #[default]
    Text,
    Image,
    Audio,
    Video,
    File,
}

/// A single conversation message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub content_type: ContentType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            content_type: ContentType::Text,
            timestamp: Some(Utc::now()),
            sender: None,
            message_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// The canonical {role, content} pair consumed by the LLM capability
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }
}

/// Ordered sequence of messages
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageLog {
    messages: Vec<Message>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn add(&mut self, role: Role, content: impl Into<String>) {
        self.push(Message::new(role, content));
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    /// Content of the first user message, which carries the primary query
    pub fn first_user_content(&self) -> Option<&str> {
        self.messages
            .iter()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }

    /// Content of the first system message, if any
    pub fn system_instruction(&self) -> Option<&str> {
        self.messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
    }

    /// Convert to the canonical {role, content} pairs expected by the LLM capability
    pub fn to_chat_messages(&self) -> Vec<ChatMessage> {
        self.messages
            .iter()
            .map(|m| ChatMessage::new(m.role.as_str(), m.content.clone()))
            .collect()
    }
}

impl FromIterator<Message> for MessageLog {
    fn from_iter<T: IntoIterator<Item = Message>>(iter: T) -> Self {
        Self {
            messages: iter.into_iter().collect(),
        }
    }
}

/// Per-session configuration snapshot taken at session creation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchSettings {
    /// Maximum number of research iterations (inclusive: iteration
    /// `max_iterations` runs)
    pub max_iterations: u32,
    /// Maximum search results kept per query
    pub max_search_items: usize,
    /// Model used for query generation, extraction and report writing
    pub default_model: String,
    /// Model used for planning and judging
    pub reason_model: String,
    /// Route page acquisition through the hosted extraction service
    pub use_hosted_parser: bool,
    /// Prefer the local model server over the hosted endpoint
    pub use_local_llm: bool,
    /// Generate and refine research plans between iterations
    pub with_planning: bool,
}

impl Default for ResearchSettings {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            max_search_items: 4,
            default_model: "llama3.2:latest".to_string(),
            reason_model: "llama3.2:latest".to_string(),
            use_hosted_parser: false,
            use_local_llm: true,
            with_planning: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_log_chat_conversion() {
        let mut log = MessageLog::new();
        log.push(Message::user("what is rust?"));
        log.push(Message::system("be brief"));

        let chat = log.to_chat_messages();
        assert_eq!(chat.len(), 2);
        assert_eq!(chat[0].role, "user");
        assert_eq!(chat[0].content, "what is rust?");
        assert_eq!(log.first_user_content(), Some("what is rust?"));
        assert_eq!(log.system_instruction(), Some("be brief"));
    }

    #[test]
    fn message_serde_round_trip() {
        let msg = Message::assistant("hello");
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
        assert!(json.contains("\"assistant\""));
    }

    #[test]
    fn message_log_serializes_as_list() {
        let log = MessageLog::from_messages(vec![Message::user("q")]);
        let json = serde_json::to_value(&log).unwrap();
        assert!(json.is_array());
    }

    #[test]
    fn content_type_defaults_to_text() {
        let raw = r#"{"role": "user", "content": "x"}"#;
        let msg: Message = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.content_type, ContentType::Text);
    }

    #[test]
    fn role_parsing_rejects_unknown_roles() {
        assert_eq!("assistant".parse::<Role>().unwrap(), Role::Assistant);
        assert_eq!("developer".parse::<Role>().unwrap(), Role::Developer);
        assert!("robot".parse::<Role>().is_err());
    }
}
