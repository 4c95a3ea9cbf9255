use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use animus_agent::ChatOrchestrator;
use animus_core::config::AnimusConfig;
use animus_registry::TerminalRegistry;
use animus_store::Store;

/// Central shared state — passed as Arc<AppState> to all handlers.
pub struct AppState {
    #[allow(dead_code)]
    pub config: AnimusConfig,
    pub store: Arc<Store>,
    pub registry: Arc<TerminalRegistry>,
    pub orchestrator: Arc<ChatOrchestrator>,
}

/// Assemble the full router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(crate::http::health::healthz))
        .route(
            "/v1/users",
            get(crate::http::users::list_users).post(crate::http::users::create_user),
        )
        .route(
            "/v1/souls",
            get(crate::http::souls::list_souls).post(crate::http::souls::create_soul),
        )
        .route("/v1/souls/select", post(crate::http::souls::select_soul))
        .route(
            "/v1/souls/{soul_id}/relations",
            get(crate::http::souls::list_relations).post(crate::http::souls::upsert_relation),
        )
        .route("/v1/terminals", get(crate::http::terminals::list_terminals))
        .route("/v1/chat", post(crate::http::chat::chat))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
