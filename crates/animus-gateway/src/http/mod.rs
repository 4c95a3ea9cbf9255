pub mod chat;
pub mod health;
pub mod souls;
pub mod terminals;
pub mod users;

use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use animus_core::AnimusError;

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: String,
}

pub type ApiError = (StatusCode, Json<ErrorBody>);

/// Map a core error onto the single-field `{error}` JSON body.
/// Validation and soul-selection errors are the caller's fault (400);
/// everything else is a 500.
pub fn error_response(e: AnimusError) -> ApiError {
    let status = if e.is_client_error() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (
        status,
        Json(ErrorBody {
            error: e.to_string(),
        }),
    )
}

pub fn store_error(e: animus_store::StoreError) -> ApiError {
    error_response(e.into())
}
