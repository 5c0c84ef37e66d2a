use axum::Extension;
use hyper::{Body, Response, StatusCode};

use crate::call_validation::{BuildContextPost, BuildContextResponse};
use crate::chat_sessions::NOTEBOOK_TABLE;
use crate::context_gather;
use crate::custom_error::ScratchError;
use crate::docstore::RecordId;
use crate::global_context::SharedGlobalContext;
use crate::http::routers::json_response;


pub async fn handle_build_context(
    Extension(gcx): Extension<SharedGlobalContext>,
    body_bytes: hyper::body::Bytes,
) -> Result<Response<Body>, ScratchError> {
    let post = serde_json::from_slice::<BuildContextPost>(&body_bytes).map_err(|e|
        ScratchError::new(StatusCode::BAD_REQUEST, format!("JSON problem: {}", e))
    )?;
    let store = gcx.read().await.doc_store.clone();
    let notebook = RecordId::normalize(NOTEBOOK_TABLE, &post.notebook_id);
    store.get(&notebook).await
        .map_err(ScratchError::internal)?
        .ok_or_else(|| ScratchError::not_found("Notebook not found"))?;
    let built = context_gather::build_notebook_context(store.as_ref(), &notebook, &post.context_config).await;
    json_response(&BuildContextResponse {
        context: built.data,
        token_count: built.token_count,
        char_count: built.char_count,
    })
}
