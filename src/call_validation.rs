use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::chat_sessions::ChatSessionRecord;


#[derive(Debug, Deserialize, Clone)]
pub struct SessionsQuery {
    pub notebook_id: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CreateSessionPost {
    pub notebook_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub model_override: Option<String>,
}

/// Partial update: absent fields are left untouched.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct UpdateSessionPost {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub model_override: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExecuteChatPost {
    pub session_id: String,
    pub message: String,
    #[serde(default)]
    pub context: Value,
    #[serde(default)]
    pub model_override: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BuildContextPost {
    pub notebook_id: String,
    #[serde(default)]
    pub context_config: Value,
}


#[derive(Debug, Serialize, Clone)]
pub struct ChatMessageOut {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub content: String,
    pub timestamp: Option<String>,
}

#[derive(Debug, Serialize, Clone)]
pub struct ChatSessionResponse {
    pub id: String,
    pub title: String,
    pub notebook_id: Option<String>,
    pub created: String,
    pub updated: String,
    pub message_count: usize,
    pub model_override: Option<String>,
}

impl ChatSessionResponse {
    pub fn from_record(record: &ChatSessionRecord, notebook_id: Option<String>, message_count: usize) -> Self {
        ChatSessionResponse {
            id: record.id.clone().unwrap_or_default(),
            title: record.title.clone(),
            notebook_id,
            created: record.created.to_rfc3339(),
            updated: record.updated.to_rfc3339(),
            message_count,
            model_override: record.model_override.clone(),
        }
    }
}

#[derive(Debug, Serialize, Clone)]
pub struct ChatSessionWithMessagesResponse {
    #[serde(flatten)]
    pub session: ChatSessionResponse,
    pub messages: Vec<ChatMessageOut>,
}

#[derive(Debug, Serialize, Clone)]
pub struct SuccessResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Serialize, Clone)]
pub struct BuildContextResponse {
    pub context: Value,
    pub token_count: usize,
    pub char_count: usize,
}
