use std::pin::Pin;

use async_stream::stream;
use async_trait::async_trait;
use futures::Stream;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest_eventsource::{Error as REError, Event, EventSource};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use crate::custom_error::MapErrToString;


#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,    // "human" | "ai"
    #[serde(default)]
    pub content: String,
}

impl AgentMessage {
    pub fn human(content: impl Into<String>) -> Self {
        AgentMessage { id: None, kind: "human".to_string(), content: content.into() }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ThreadState {
    #[serde(default)]
    pub messages: Vec<AgentMessage>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TurnRequest {
    pub thread_id: String,
    pub messages: Vec<AgentMessage>,
    pub context: Value,
    pub model_id: Option<String>,
}

pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, String>> + Send>>;


/// The conversational agent graph is an external collaborator: it owns
/// thread state persistence, model selection and token generation. This
/// trait is everything the server asks of it.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    /// Persisted state of one conversation thread, None if the thread never ran.
    async fn thread_state(&self, thread_id: &str) -> Result<Option<ThreadState>, String>;

    /// One generation turn over merged state; yields output token chunks as
    /// they arrive.
    async fn stream_turn(&self, turn: TurnRequest) -> Result<TokenStream, String>;
}

/// Message count is defined as zero when the thread has no state yet, and a
/// state read failure also counts as zero rather than failing a listing.
pub async fn session_message_count(runtime: &dyn AgentRuntime, thread_id: &str) -> usize {
    match runtime.thread_state(thread_id).await {
        Ok(Some(state)) => state.messages.len(),
        Ok(None) => 0,
        Err(e) => {
            warn!("can't read thread state for {}: {}", thread_id, e);
            0
        },
    }
}


pub struct GraphGatewayClient {
    client: reqwest::Client,
    base_url: String,
}

impl GraphGatewayClient {
    pub fn new(client: reqwest::Client, base_url: String) -> Self {
        GraphGatewayClient {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl AgentRuntime for GraphGatewayClient {
    async fn thread_state(&self, thread_id: &str) -> Result<Option<ThreadState>, String> {
        let url = format!("{}/threads/{}/state", self.base_url, thread_id);
        let resp = self.client.get(&url).send().await
            .map_err_with_prefix("agent runtime request failed:")?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(format!("agent runtime returned {}: {}", status, text));
        }
        let body: Value = resp.json().await
            .map_err_with_prefix("agent runtime state is not json:")?;
        // state comes as {"values": {"messages": [...]}}, absent values means
        // the thread exists but never ran
        match body.get("values") {
            Some(values) if !values.is_null() => {
                let state: ThreadState = serde_json::from_value(values.clone())
                    .map_err_with_prefix("can't parse thread state:")?;
                Ok(Some(state))
            },
            _ => Ok(None),
        }
    }

    async fn stream_turn(&self, turn: TurnRequest) -> Result<TokenStream, String> {
        let url = format!("{}/threads/{}/stream", self.base_url, turn.thread_id);
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_str("application/json").unwrap());
        let data = json!({
            "messages": turn.messages,
            "context": turn.context,
            "model_id": turn.model_id,
            "stream": true,
        });
        let builder = self.client.post(&url)
            .headers(headers)
            .body(data.to_string());
        let mut event_source = EventSource::new(builder).map_err(|e|
            format!("can't stream from {}: {}", url, e)
        )?;
        let tokens = stream! {
            while let Some(event) = event_source.next().await {
                match event {
                    Ok(Event::Open) => {},
                    Ok(Event::Message(message)) => {
                        if message.data.starts_with("[DONE]") {
                            break;
                        }
                        let payload = match serde_json::from_str::<Value>(&message.data) {
                            Ok(x) => x,
                            Err(e) => {
                                yield Err(format!("bad event payload: {}", e));
                                break;
                            },
                        };
                        // only chat model stream events carry output tokens
                        if payload.get("event").and_then(|e| e.as_str()) == Some("on_chat_model_stream") {
                            if let Some(content) = payload.pointer("/data/chunk/content").and_then(|c| c.as_str()) {
                                if !content.is_empty() {
                                    yield Ok(content.to_string());
                                }
                            }
                        }
                    },
                    Err(REError::StreamEnded) => {
                        break;
                    },
                    Err(err) => {
                        yield Err(format!("{}", err));
                        event_source.close();
                        break;
                    },
                }
            }
        };
        Ok(Box::pin(tokens))
    }
}
