//! Health check endpoint.

use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};

use crate::AppState;

/// Health check routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

/// Reports liveness and hub occupancy. A stopped hub reports `degraded`.
async fn health_check(State(state): State<AppState>) -> Json<Value> {
    match state.hub.stats().await {
        Ok(stats) => Json(json!({
            "status": "healthy",
            "service": "skyliner-realtime",
            "version": env!("CARGO_PKG_VERSION"),
            "hub": stats,
        })),
        Err(e) => {
            tracing::warn!(error = %e, "hub unavailable");
            Json(json!({
                "status": "degraded",
                "service": "skyliner-realtime",
                "version": env!("CARGO_PKG_VERSION"),
                "hub": null,
            }))
        }
    }
}
