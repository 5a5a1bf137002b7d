//! HTTP and WebSocket front door of the relay.

pub mod dispatch;
pub mod routes;
pub mod ws;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;
use voxrelay_core::config::EngineConfig;

use crate::router::Broker;

pub use dispatch::SessionInbound;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub broker: Arc<Broker>,
    pub engine: EngineConfig,
    pub max_frame_bytes: usize,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws::ws_upgrade))
        .route("/relay", post(routes::relay))
        .route("/sessions", get(routes::sessions))
        .route("/health", get(routes::health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
