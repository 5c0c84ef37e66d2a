use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use hyper::{Body, Response};
use serde::Serialize;

use crate::custom_error::ScratchError;
use crate::http::routers::chat_context::handle_build_context;
use crate::http::routers::chat_execute::handle_execute_chat;
use crate::http::routers::chat_sessions::{
    handle_create_session, handle_delete_session, handle_get_session, handle_list_sessions,
    handle_update_session,
};
use crate::http::routers::video::{handle_get_job, handle_list_jobs, handle_video_generate};

pub mod chat_context;
pub mod chat_execute;
pub mod chat_sessions;
pub mod video;

const UPLOAD_BODY_LIMIT: usize = 64 * 1024 * 1024;

pub fn make_server_router() -> Router {
    Router::new()
        .route("/chat/sessions", get(handle_list_sessions).post(handle_create_session))
        .route("/chat/sessions/:session_id", get(handle_get_session).put(handle_update_session).delete(handle_delete_session))
        .route("/chat/execute", post(handle_execute_chat))
        .route("/chat/context", post(handle_build_context))
        .route("/video/generate", post(handle_video_generate).layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)))
        .route("/video/jobs", get(handle_list_jobs))
        .route("/video/jobs/:job_id", get(handle_get_job))
}

pub fn json_response<T: Serialize>(value: &T) -> Result<Response<Body>, ScratchError> {
    let body = serde_json::to_string_pretty(value)
        .map_err(|e| ScratchError::internal(format!("can't serialize response: {}", e)))?;
    Ok(Response::builder()
        .header("Content-Type", "application/json")
        .body(Body::from(body))
        .unwrap())
}
