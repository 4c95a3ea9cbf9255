use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;

use animus_store::{Soul, SoulRelation};

use crate::app::AppState;
use crate::http::{error_response, store_error, ApiError};

#[derive(Deserialize)]
pub struct ListSoulsQuery {
    pub user_id: String,
}

pub async fn list_souls(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListSoulsQuery>,
) -> Result<Json<Vec<Soul>>, ApiError> {
    state
        .store
        .list_souls(&query.user_id)
        .map(Json)
        .map_err(store_error)
}

#[derive(Deserialize)]
pub struct CreateSoulRequest {
    pub user_id: String,
    pub name: String,
    pub mbti_type: String,
    #[serde(default)]
    pub model_version: Option<String>,
}

pub async fn create_soul(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateSoulRequest>,
) -> Result<Json<Soul>, ApiError> {
    state
        .store
        .create_soul(
            &req.user_id,
            &req.name,
            &req.mbti_type,
            req.model_version.as_deref().unwrap_or(""),
        )
        .map(Json)
        .map_err(store_error)
}

#[derive(Deserialize)]
pub struct SelectSoulRequest {
    pub user_id: String,
    pub terminal_id: String,
    pub soul_id: String,
}

/// Explicitly bind a terminal to a soul. The registry picks the new
/// binding up immediately so the next chat turn uses it.
pub async fn select_soul(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SelectSoulRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if req.terminal_id.trim().is_empty() {
        return Err(error_response(animus_core::AnimusError::Validation(
            "terminal_id is required".into(),
        )));
    }
    state
        .store
        .bind_terminal(&req.user_id, &req.terminal_id, &req.soul_id)
        .map_err(store_error)?;
    state.registry.set_soul(&req.terminal_id, &req.soul_id);
    Ok(Json(serde_json::json!({
        "user_id": req.user_id,
        "terminal_id": req.terminal_id,
        "soul_id": req.soul_id,
    })))
}

pub async fn list_relations(
    State(state): State<Arc<AppState>>,
    Path(soul_id): Path<String>,
) -> Result<Json<Vec<SoulRelation>>, ApiError> {
    state
        .store
        .list_relations(&soul_id)
        .map(Json)
        .map_err(store_error)
}

#[derive(Deserialize)]
pub struct UpsertRelationRequest {
    pub target_name: String,
    #[serde(default)]
    pub target_mbti: Option<String>,
    pub guidance: String,
}

pub async fn upsert_relation(
    State(state): State<Arc<AppState>>,
    Path(soul_id): Path<String>,
    Json(req): Json<UpsertRelationRequest>,
) -> Result<Json<Vec<SoulRelation>>, ApiError> {
    state
        .store
        .upsert_relation(
            &soul_id,
            &req.target_name,
            req.target_mbti.as_deref(),
            &req.guidance,
        )
        .map_err(store_error)?;
    state
        .store
        .list_relations(&soul_id)
        .map(Json)
        .map_err(store_error)
}
