mod buffer;
mod chat;
mod criteria;
mod ws;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use gavel_core::Orchestrator;
use gavel_criteria::CriteriaRegistry;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub registry: Arc<CriteriaRegistry>,
}

pub fn create_router(orchestrator: Arc<Orchestrator>, registry: Arc<CriteriaRegistry>) -> Router {
    let state = AppState {
        orchestrator,
        registry,
    };

    Router::new()
        .route("/api/chat", post(chat::send_message))
        .route("/api/chat/retry", post(chat::retry_turn))
        .route("/api/conversations/{id}/history", get(chat::get_history))
        .route(
            "/api/criteria",
            get(criteria::get_criteria).put(criteria::update_criteria),
        )
        .route("/ws/chat", get(ws::websocket_chat))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
