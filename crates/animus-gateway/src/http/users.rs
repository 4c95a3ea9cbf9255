use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;

use animus_store::User;

use crate::app::AppState;
use crate::http::{store_error, ApiError};

#[derive(Deserialize)]
pub struct CreateUserRequest {
    pub user_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

pub async fn list_users(State(state): State<Arc<AppState>>) -> Result<Json<Vec<User>>, ApiError> {
    state.store.list_users().map(Json).map_err(store_error)
}

pub async fn create_user(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateUserRequest>,
) -> Result<Json<User>, ApiError> {
    let display_name = req.display_name.unwrap_or_else(|| req.user_id.clone());
    state
        .store
        .create_user(&req.user_id, &display_name, req.description.as_deref().unwrap_or(""))
        .map(Json)
        .map_err(store_error)
}
