pub mod auth;
pub mod error;
pub mod generation;
pub mod health;
pub mod metrics;

use axum::routing::{get, post};
use axum::Router;

use crate::app_state::AppState;

/// Application routes, without the metrics endpoint or middleware layers.
pub fn router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/health", get(health::health_check))
        .route(
            "/api/v1/npcs/{entity_id}/generation",
            post(generation::trigger_generation),
        )
        .route(
            "/api/v1/npcs/{entity_id}/generation/{job_id}",
            get(generation::get_generation_status),
        );

    if state.webhook_secret.is_some() {
        router = router.route("/api/v1/hooks/npc-change", post(generation::npc_change_hook));
    }

    router.with_state(state)
}
