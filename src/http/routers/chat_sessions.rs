use axum::extract::{Path, Query};
use axum::Extension;
use hyper::{Body, Response, StatusCode};

use crate::call_validation::{CreateSessionPost, SessionsQuery, UpdateSessionPost};
use crate::chat_sessions;
use crate::custom_error::ScratchError;
use crate::global_context::SharedGlobalContext;
use crate::http::routers::json_response;


pub async fn handle_list_sessions(
    Extension(gcx): Extension<SharedGlobalContext>,
    Query(params): Query<SessionsQuery>,
) -> Result<Response<Body>, ScratchError> {
    let (store, runtime) = {
        let gcx_locked = gcx.read().await;
        (gcx_locked.doc_store.clone(), gcx_locked.agent_runtime.clone())
    };
    let sessions = chat_sessions::list_sessions(store.as_ref(), runtime.as_ref(), &params.notebook_id).await?;
    json_response(&sessions)
}

pub async fn handle_create_session(
    Extension(gcx): Extension<SharedGlobalContext>,
    body_bytes: hyper::body::Bytes,
) -> Result<Response<Body>, ScratchError> {
    let post = serde_json::from_slice::<CreateSessionPost>(&body_bytes).map_err(|e|
        ScratchError::new(StatusCode::BAD_REQUEST, format!("JSON problem: {}", e))
    )?;
    let store = gcx.read().await.doc_store.clone();
    let created = chat_sessions::create_session(store.as_ref(), &post).await?;
    json_response(&created)
}

pub async fn handle_get_session(
    Extension(gcx): Extension<SharedGlobalContext>,
    Path(session_id): Path<String>,
) -> Result<Response<Body>, ScratchError> {
    let (store, runtime) = {
        let gcx_locked = gcx.read().await;
        (gcx_locked.doc_store.clone(), gcx_locked.agent_runtime.clone())
    };
    let session = chat_sessions::get_session_with_messages(store.as_ref(), runtime.as_ref(), &session_id).await?;
    json_response(&session)
}

pub async fn handle_update_session(
    Extension(gcx): Extension<SharedGlobalContext>,
    Path(session_id): Path<String>,
    body_bytes: hyper::body::Bytes,
) -> Result<Response<Body>, ScratchError> {
    let post = serde_json::from_slice::<UpdateSessionPost>(&body_bytes).map_err(|e|
        ScratchError::new(StatusCode::BAD_REQUEST, format!("JSON problem: {}", e))
    )?;
    let (store, runtime) = {
        let gcx_locked = gcx.read().await;
        (gcx_locked.doc_store.clone(), gcx_locked.agent_runtime.clone())
    };
    let updated = chat_sessions::update_session(store.as_ref(), runtime.as_ref(), &session_id, &post).await?;
    json_response(&updated)
}

pub async fn handle_delete_session(
    Extension(gcx): Extension<SharedGlobalContext>,
    Path(session_id): Path<String>,
) -> Result<Response<Body>, ScratchError> {
    let store = gcx.read().await.doc_store.clone();
    let deleted = chat_sessions::delete_session(store.as_ref(), &session_id).await?;
    json_response(&deleted)
}
