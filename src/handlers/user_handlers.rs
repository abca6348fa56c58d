use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};

use crate::handlers::request_params::MergedParams;
use crate::AppState;

/// Identity comes from the embedding page (`user_id`, `user_name`) and is
/// echoed back unverified.
pub async fn current_user(params: MergedParams) -> Json<Value> {
    Json(json!({ "user": params.caller() }))
}

pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<Value>) {
    match state.db_pool.get() {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "service": env!("CARGO_PKG_NAME"),
            })),
        ),
        Err(e) => {
            tracing::error!("Health check could not reach the database: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "service": env!("CARGO_PKG_NAME"),
                })),
            )
        }
    }
}
