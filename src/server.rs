use axum::{routing::get, Json, Router};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::shared::state::AppState;
use crate::whatsapp;

/// Full application router. The provider and the dashboard both call this
/// host cross-origin, so CORS is wide open.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(whatsapp::configure())
        .route("/health", get(health_check))
        .layer(cors)
        .with_state(state)
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "parishbot",
        "version": env!("CARGO_PKG_VERSION")
    }))
}
