use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::AppError;
use crate::handlers::request_params::MergedParams;
use crate::models::conference_models::{Conference, ConferenceChanges, ConferenceDraft, ConferenceType};
use crate::AppState;

pub async fn list_conferences(
    State(state): State<Arc<AppState>>,
    params: MergedParams,
) -> Result<Json<Vec<Conference>>, AppError> {
    let caller = params.caller();
    tracing::debug!("Listing conferences for {}", caller.id);

    let conferences = state.sync.list(&caller).await?;
    Ok(Json(conferences))
}

pub async fn create_conference(
    State(state): State<Arc<AppState>>,
    params: MergedParams,
) -> Result<Json<Conference>, AppError> {
    let caller = params.caller();
    let draft: ConferenceDraft = params.payload()?;
    if draft.name.trim().is_empty() {
        return Err(AppError::BadRequest("Conference name is required".to_string()));
    }
    tracing::info!("Creating {} '{}' for {}", draft.conference_type, draft.name, caller.id);

    let conference = state.sync.create(&caller, &draft).await?;
    Ok(Json(conference))
}

pub async fn update_conference(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    params: MergedParams,
) -> Result<Json<Conference>, AppError> {
    let caller = params.caller();
    let changes: ConferenceChanges = params.payload()?;

    let conference = state.sync.update(&caller, id, &changes).await?;
    Ok(Json(conference))
}

pub async fn delete_conference(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, AppError> {
    state.sync.delete(id)?;

    Ok(Json(json!({
        "success": true,
        "message": "Conference deleted successfully"
    })))
}

#[derive(Deserialize)]
pub struct AdminListQuery {
    #[serde(rename = "type")]
    conference_type: Option<String>,
}

/// Every conference regardless of owner, optionally filtered by type.
pub async fn list_all_conferences(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AdminListQuery>,
) -> Result<Json<Vec<Conference>>, AppError> {
    let conferences = match query.conference_type.as_deref().filter(|t| !t.is_empty()) {
        Some(kind) => {
            let kind: ConferenceType = kind.parse().map_err(AppError::BadRequest)?;
            state.repository.list_by_type(kind)?
        }
        None => state.repository.list_all()?,
    };

    Ok(Json(conferences))
}
