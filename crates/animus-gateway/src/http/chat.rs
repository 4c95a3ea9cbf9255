//! POST /v1/chat — one full orchestrated turn.
//!
//! Request:  `{user_id?, session_id, terminal_id, soul_id?, soul_hint?,
//!            inputs: [{type, text}]}`
//! Response: the ChatTurnResponse JSON, or `{error}` with 400/500.

use axum::extract::State;
use axum::Json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use animus_agent::{ChatTurnRequest, ChatTurnResponse};

use crate::app::AppState;
use crate::http::{error_response, ApiError};

pub async fn chat(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatTurnRequest>,
) -> Result<Json<ChatTurnResponse>, ApiError> {
    let cancel = CancellationToken::new();
    match state.orchestrator.handle_chat(req, cancel).await {
        Ok(resp) => Ok(Json(resp)),
        Err(e) => {
            if !e.is_client_error() {
                warn!(code = e.code(), error = %e, "chat turn failed");
            }
            Err(error_response(e))
        }
    }
}
