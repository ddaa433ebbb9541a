//! HTTP router: the WebSocket upgrade for box connections and the health
//! endpoint, following the teacher's router module shape (`AppState` +
//! `build_router`) generalised to GoBox's one real route.

mod connect;

use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::db::Database;
use crate::driver::ContainerDriver;
use crate::session::SessionManager;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub driver: Arc<dyn ContainerDriver>,
    pub db: Arc<Database>,
    pub sessions: SessionManager,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/box/connect", get(connect::connect_handler))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}
