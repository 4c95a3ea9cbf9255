use axum::extract::State;
use axum::Json;
use serde::Serialize;
use std::sync::Arc;

use crate::app::AppState;

/// One row of the debug surface: a terminal, its binding, and the bound
/// soul's current affect snapshot.
#[derive(Serialize)]
pub struct TerminalView {
    pub terminal_id: String,
    pub online: bool,
    pub soul_id: Option<String>,
    pub skill_count: usize,
    pub skill_version: i64,
    pub has_intent_catalog: bool,
    pub pad: Option<[f64; 3]>,
    pub boredom: Option<f64>,
}

pub async fn list_terminals(State(state): State<Arc<AppState>>) -> Json<Vec<TerminalView>> {
    let views = state
        .registry
        .snapshot()
        .into_iter()
        .map(|(terminal_id, t)| {
            let affect = t
                .soul_id
                .as_deref()
                .and_then(|sid| state.store.get_soul(sid).ok().flatten())
                .map(|soul| soul.emotion_state);
            TerminalView {
                terminal_id,
                online: t.online,
                soul_id: t.soul_id,
                skill_count: t.skills.len(),
                skill_version: t.skill_version,
                has_intent_catalog: t.intent_catalog.is_some(),
                pad: affect.as_ref().map(|s| [s.p, s.a, s.d]),
                boredom: affect.as_ref().map(|s| s.boredom),
            }
        })
        .collect();
    Json(views)
}
