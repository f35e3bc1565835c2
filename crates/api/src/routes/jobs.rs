use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};

use extract::{ExtractionJob, JobId, JobStatus, SceneInput};
use graph::SceneRef;

use super::parse_id;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct ExtractRequest {
    sequence: u32,
    text: String,
}

#[derive(Serialize)]
pub struct JobAccepted {
    job_id: JobId,
    status: JobStatus,
}

pub async fn submit_extraction(
    State(state): State<AppState>,
    Path(scene_id): Path<String>,
    Json(req): Json<ExtractRequest>,
) -> Result<(StatusCode, Json<JobAccepted>), ApiError> {
    if !state.config.extractor.enabled {
        return Err(ApiError::Validation("extraction is disabled for this project".to_string()));
    }
    let scene_id = scene_id.trim();
    if scene_id.is_empty() {
        return Err(ApiError::Validation("scene id must not be empty".to_string()));
    }
    if req.text.trim().is_empty() {
        return Err(ApiError::Validation("scene text must not be empty".to_string()));
    }

    let job_id = state
        .jobs
        .submit(SceneInput::new(SceneRef::new(scene_id, req.sequence), req.text));
    state.metrics.record_extraction_submitted();

    let watcher = state.clone();
    tokio::spawn(async move {
        if let Ok(job) = watcher.jobs.wait(job_id).await {
            if job.status == JobStatus::Completed {
                watcher.persist().await;
            }
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(JobAccepted {
            job_id,
            status: JobStatus::Pending,
        }),
    ))
}

#[derive(Deserialize)]
pub struct JobListParams {
    scene: Option<String>,
}

pub async fn list_jobs(
    State(state): State<AppState>,
    Query(params): Query<JobListParams>,
) -> Json<Vec<ExtractionJob>> {
    Json(state.jobs.jobs(params.scene.as_deref()))
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ExtractionJob>, ApiError> {
    let id: JobId = parse_id(&id, "job")?;
    Ok(Json(state.jobs.job(id)?))
}

pub async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ExtractionJob>, ApiError> {
    let id: JobId = parse_id(&id, "job")?;
    Ok(Json(state.jobs.cancel(id)?))
}
