use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Deserialize;

use versioning::{CheckpointId, CheckpointSummary, GraphDiff};

use super::parse_id;
use crate::error::ApiError;
use crate::state::{AppState, blocking};

#[derive(Deserialize)]
pub struct CreateCheckpoint {
    label: String,
    #[serde(default)]
    description: String,
}

pub async fn create(
    State(state): State<AppState>,
    Json(req): Json<CreateCheckpoint>,
) -> Result<(StatusCode, Json<CheckpointSummary>), ApiError> {
    let label = req.label.trim().to_string();
    if label.is_empty() {
        return Err(ApiError::Validation("checkpoint label must not be empty".to_string()));
    }
    let versions = state.versions.clone();
    let summary = blocking(move || Ok(versions.create(&label, &req.description)?)).await?;
    Ok((StatusCode::CREATED, Json(summary)))
}

pub async fn list(State(state): State<AppState>) -> Json<Vec<CheckpointSummary>> {
    Json(state.versions.list())
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CheckpointSummary>, ApiError> {
    let id: CheckpointId = parse_id(&id, "checkpoint")?;
    Ok(Json(state.versions.get(id)?.summary()))
}

pub async fn diff_live(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<GraphDiff>, ApiError> {
    let id: CheckpointId = parse_id(&id, "checkpoint")?;
    Ok(Json(state.versions.diff_against_live(id)?))
}

pub async fn diff(
    State(state): State<AppState>,
    Path((id, other)): Path<(String, String)>,
) -> Result<Json<GraphDiff>, ApiError> {
    let from: CheckpointId = parse_id(&id, "checkpoint")?;
    let to: CheckpointId = parse_id(&other, "checkpoint")?;
    Ok(Json(state.versions.diff(from, to)?))
}

pub async fn restore(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CheckpointSummary>, ApiError> {
    let id: CheckpointId = parse_id(&id, "checkpoint")?;
    let versions = state.versions.clone();
    let summary = blocking(move || Ok(versions.rollback(id)?)).await?;
    state.persist().await;
    Ok(Json(summary))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CheckpointSummary>, ApiError> {
    let id: CheckpointId = parse_id(&id, "checkpoint")?;
    let versions = state.versions.clone();
    Ok(Json(blocking(move || Ok(versions.delete(id)?)).await?))
}
