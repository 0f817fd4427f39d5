pub mod webhook;

use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Largest accepted webhook body. Screening lists with a few thousand
/// entries stay well below it.
const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

/// Build the complete API router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(webhook::router())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Liveness only; the resource store and SMTP relay are not contacted.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "recruit-notify",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
