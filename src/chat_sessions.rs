use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use crate::agent_runtime::{session_message_count, AgentRuntime};
use crate::call_validation::{
    ChatMessageOut, ChatSessionResponse, ChatSessionWithMessagesResponse, CreateSessionPost,
    SuccessResponse, UpdateSessionPost,
};
use crate::custom_error::ScratchError;
use crate::docstore::{DocStore, RecordId};

pub const SESSION_TABLE: &str = "chat_session";
pub const NOTEBOOK_TABLE: &str = "notebook";


#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSessionRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_override: Option<String>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

async fn require_notebook(store: &dyn DocStore, notebook_id: &str) -> Result<RecordId, ScratchError> {
    let notebook = RecordId::normalize(NOTEBOOK_TABLE, notebook_id);
    store.get(&notebook).await
        .map_err(ScratchError::internal)?
        .ok_or_else(|| ScratchError::not_found("Notebook not found"))?;
    Ok(notebook)
}

async fn require_session(store: &dyn DocStore, session_id: &str) -> Result<(RecordId, ChatSessionRecord), ScratchError> {
    let session = RecordId::normalize(SESSION_TABLE, session_id);
    let row = store.get(&session).await
        .map_err(ScratchError::internal)?
        .ok_or_else(|| ScratchError::not_found("Session not found"))?;
    let record: ChatSessionRecord = serde_json::from_value(row)
        .map_err(|e| ScratchError::internal(format!("malformed session record {}: {}", session, e)))?;
    Ok((session, record))
}

/// The session→notebook relationship is an edge; resolving it can come back
/// empty for sessions created before the relationship existed. Those are
/// tolerated, the caller just gets None.
async fn notebook_of_session(store: &dyn DocStore, session: &RecordId) -> Option<String> {
    match store.query(&format!("SELECT VALUE out FROM refers_to WHERE in = {}", session.literal())).await {
        Ok(rows) => {
            let notebook_id = rows.first().and_then(|r| r.as_str()).map(|s| s.to_string());
            if notebook_id.is_none() {
                warn!("no notebook relationship found for session {} - may be an orphaned session", session);
            }
            notebook_id
        },
        Err(e) => {
            warn!("notebook lookup failed for session {}: {}", session, e);
            None
        },
    }
}


pub async fn list_sessions(
    store: &dyn DocStore,
    runtime: &dyn AgentRuntime,
    notebook_id: &str,
) -> Result<Vec<ChatSessionResponse>, ScratchError> {
    let notebook = require_notebook(store, notebook_id).await?;
    let rows = store.query(&format!(
        "SELECT VALUE in.* FROM refers_to WHERE out = {}", notebook.literal())).await
        .map_err(ScratchError::internal)?;
    let mut results = Vec::new();
    for row in rows {
        let record: ChatSessionRecord = match serde_json::from_value(row) {
            Ok(x) => x,
            Err(e) => {
                warn!("skipping malformed session row: {}", e);
                continue;
            },
        };
        let thread_id = record.id.clone().unwrap_or_default();
        let message_count = session_message_count(runtime, &thread_id).await;
        results.push(ChatSessionResponse::from_record(&record, Some(notebook.to_string()), message_count));
    }
    Ok(results)
}

pub async fn create_session(
    store: &dyn DocStore,
    post: &CreateSessionPost,
) -> Result<ChatSessionResponse, ScratchError> {
    let notebook = require_notebook(store, &post.notebook_id).await?;
    let now = Utc::now();
    let session = RecordId::new(SESSION_TABLE, uuid::Uuid::new_v4().to_string());
    let record = ChatSessionRecord {
        id: None,
        title: post.title.clone()
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| format!("Chat Session {}", now.timestamp())),
        model_override: post.model_override.clone(),
        created: now,
        updated: now,
    };
    store.create(&session, serde_json::to_value(&record).unwrap()).await
        .map_err(ScratchError::internal)?;
    store.query(&format!("RELATE {}->refers_to->{}", session.literal(), notebook.literal())).await
        .map_err(ScratchError::internal)?;
    let mut record = record;
    record.id = Some(session.to_string());
    Ok(ChatSessionResponse::from_record(&record, Some(notebook.to_string()), 0))
}

pub async fn get_session_with_messages(
    store: &dyn DocStore,
    runtime: &dyn AgentRuntime,
    session_id: &str,
) -> Result<ChatSessionWithMessagesResponse, ScratchError> {
    let (session, record) = require_session(store, session_id).await?;
    let state = runtime.thread_state(&session.to_string()).await
        .map_err(ScratchError::internal)?
        .unwrap_or_default();
    let messages: Vec<ChatMessageOut> = state.messages.iter().enumerate()
        .map(|(n, msg)| ChatMessageOut {
            id: msg.id.clone().unwrap_or_else(|| format!("msg_{}", n)),
            kind: msg.kind.clone(),
            content: msg.content.clone(),
            timestamp: None,
        })
        .collect();
    let notebook_id = notebook_of_session(store, &session).await;
    Ok(ChatSessionWithMessagesResponse {
        session: ChatSessionResponse::from_record(&record, notebook_id, messages.len()),
        messages,
    })
}

pub async fn update_session(
    store: &dyn DocStore,
    runtime: &dyn AgentRuntime,
    session_id: &str,
    post: &UpdateSessionPost,
) -> Result<ChatSessionResponse, ScratchError> {
    let (session, _) = require_session(store, session_id).await?;
    let mut patch = serde_json::Map::new();
    if let Some(title) = &post.title {
        patch.insert("title".to_string(), json!(title));
    }
    if let Some(model_override) = &post.model_override {
        patch.insert("model_override".to_string(), json!(model_override));
    }
    patch.insert("updated".to_string(), json!(Utc::now()));
    let merged = store.update_merge(&session, serde_json::Value::Object(patch)).await
        .map_err(ScratchError::internal)?;
    let record: ChatSessionRecord = serde_json::from_value(merged)
        .map_err(|e| ScratchError::internal(format!("malformed session record {}: {}", session, e)))?;
    let notebook_id = notebook_of_session(store, &session).await;
    let message_count = session_message_count(runtime, &session.to_string()).await;
    Ok(ChatSessionResponse::from_record(&record, notebook_id, message_count))
}

/// Removes the session record only. The agent runtime keeps its thread state
/// for this session (known asymmetry).
pub async fn delete_session(
    store: &dyn DocStore,
    session_id: &str,
) -> Result<SuccessResponse, ScratchError> {
    let (session, _) = require_session(store, session_id).await?;
    store.delete(&session).await.map_err(ScratchError::internal)?;
    Ok(SuccessResponse {
        success: true,
        message: "Session deleted successfully".to_string(),
    })
}

/// Shared preamble of /chat/execute: resolve the session, pick the effective
/// model, reject empty messages before any mutation, then touch `updated`.
pub async fn prepare_execution(
    store: &dyn DocStore,
    session_id: &str,
    message: &str,
    request_model_override: &Option<String>,
) -> Result<(RecordId, Option<String>), ScratchError> {
    let (session, record) = require_session(store, session_id).await?;
    let model_override = request_model_override.clone().or(record.model_override);
    if message.is_empty() {
        return Err(ScratchError::bad_request("Message content is required"));
    }
    store.update_merge(&session, json!({"updated": Utc::now()})).await
        .map_err(ScratchError::internal)?;
    Ok((session, model_override))
}
