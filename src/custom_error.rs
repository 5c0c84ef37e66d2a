use std::error::Error;
use std::fmt;

use axum::Json;
use axum::response::IntoResponse;
use hyper::StatusCode;
use serde_json::json;


/// The one error type every handler returns. Serializes as {"detail": ...}
/// so all clients see the same shape regardless of which layer failed.
#[derive(Debug, Clone)]
pub struct ScratchError {
    pub status_code: StatusCode,
    pub message: String,
}

impl IntoResponse for ScratchError {
    fn into_response(self) -> axum::response::Response {
        let payload = json!({
            "detail": self.message,
        });
        (self.status_code, Json(payload)).into_response()
    }
}

impl Error for ScratchError {}

impl fmt::Display for ScratchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.status_code, self.message)
    }
}

impl ScratchError {
    pub fn new(status_code: StatusCode, message: String) -> Self {
        ScratchError { status_code, message }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ScratchError::new(StatusCode::NOT_FOUND, message.into())
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        ScratchError::new(StatusCode::BAD_REQUEST, message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ScratchError::new(StatusCode::INTERNAL_SERVER_ERROR, message.into())
    }
}

pub trait MapErrToString<T> {
    /// Same as .map_err(|e| e.to_string())
    fn map_err_to_string(self) -> Result<T, String>;
    /// Same as .map_err(|e| format!("{} {}", pref, e))
    fn map_err_with_prefix<P: std::fmt::Display>(self, pref: P) -> Result<T, String>;
}

impl<T, E: std::fmt::Display> MapErrToString<T> for Result<T, E> {
    fn map_err_to_string(self) -> Result<T, String> {
        self.map_err(|e| e.to_string())
    }

    fn map_err_with_prefix<P: std::fmt::Display>(self, pref: P) -> Result<T, String> {
        self.map_err(|e| format!("{} {}", pref, e))
    }
}
