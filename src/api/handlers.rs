//! HTTP routes

use super::ws::ws_handler;
use super::AppState;
use axum::{routing::get, Router};
use tower_http::services::{ServeDir, ServeFile};

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Browser client
        .route_service("/", ServeFile::new(&state.index_file))
        .nest_service("/static", ServeDir::new(&state.static_dir))
        // One chat session per socket
        .route("/ws", get(ws_handler))
        .route("/version", get(|| async { env!("CARGO_PKG_VERSION") }))
        .with_state(state)
}
