use std::sync::Arc;

use async_stream::stream;
use axum::Extension;
use futures::{Stream, StreamExt};
use hyper::{Body, Response, StatusCode};
use serde_json::{json, Value};
use tracing::error;

use crate::agent_runtime::{AgentMessage, AgentRuntime, TurnRequest};
use crate::call_validation::ExecuteChatPost;
use crate::chat_sessions;
use crate::custom_error::ScratchError;
use crate::global_context::SharedGlobalContext;
use crate::nicer_logs::first_n_chars;


fn event_line(payload: &Value) -> String {
    format!("data: {}\n\n", payload)
}

/// One conversation turn as an ordered event feed: the user message event
/// first, then one ai_message event per non-empty token chunk. Every failure
/// past this point becomes a terminal in-stream error event, because by then
/// response headers are committed.
pub fn chat_event_stream(
    runtime: Arc<dyn AgentRuntime>,
    thread_id: String,
    message: String,
    context: Value,
    model_id: Option<String>,
) -> impl Stream<Item = Result<String, String>> {
    stream! {
        let prior = match runtime.thread_state(&thread_id).await {
            Ok(state) => state.unwrap_or_default().messages,
            Err(e) => {
                error!("error in chat streaming: {}", e);
                yield Result::<_, String>::Ok(event_line(&json!({"type": "error", "message": e})));
                return;
            },
        };
        yield Result::<_, String>::Ok(event_line(&json!({
            "type": "user_message", "content": message, "timestamp": null,
        })));
        let mut messages = prior;
        messages.push(AgentMessage::human(&message));
        let turn = TurnRequest {
            thread_id: thread_id.clone(),
            messages,
            context,
            model_id,
        };
        let mut tokens = match runtime.stream_turn(turn).await {
            Ok(tokens) => tokens,
            Err(e) => {
                error!("error in chat streaming: {}", e);
                yield Result::<_, String>::Ok(event_line(&json!({"type": "error", "message": e})));
                return;
            },
        };
        while let Some(chunk) = tokens.next().await {
            match chunk {
                Ok(content) => {
                    if content.is_empty() {
                        continue;
                    }
                    yield Result::<_, String>::Ok(event_line(&json!({
                        "type": "ai_message", "content": content, "timestamp": null,
                    })));
                },
                Err(e) => {
                    error!("error in chat streaming: {}", first_n_chars(&e, 200));
                    yield Result::<_, String>::Ok(event_line(&json!({"type": "error", "message": e})));
                    return;
                },
            }
        }
    }
}

pub async fn handle_execute_chat(
    Extension(gcx): Extension<SharedGlobalContext>,
    body_bytes: hyper::body::Bytes,
) -> Result<Response<Body>, ScratchError> {
    let post = serde_json::from_slice::<ExecuteChatPost>(&body_bytes).map_err(|e|
        ScratchError::new(StatusCode::BAD_REQUEST, format!("JSON problem: {}", e))
    )?;
    let (store, runtime) = {
        let gcx_locked = gcx.read().await;
        (gcx_locked.doc_store.clone(), gcx_locked.agent_runtime.clone())
    };
    // 404/400 happen here, before the stream starts
    let (session, model_override) =
        chat_sessions::prepare_execution(store.as_ref(), &post.session_id, &post.message, &post.model_override).await?;
    let evstream = chat_event_stream(
        runtime,
        session.to_string(),
        post.message,
        post.context,
        model_override,
    );
    Ok(Response::builder()
        .header("Content-Type", "text/plain; charset=utf-8")
        .header("Cache-Control", "no-cache")
        .body(Body::wrap_stream(evstream))
        .unwrap())
}
