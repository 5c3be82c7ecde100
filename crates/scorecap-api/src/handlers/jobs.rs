//! Job creation, status and review handlers.

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use scorecap_jobs::review;
use scorecap_models::{ExportFormat, JobId, JobOptions, JobSnapshot, Source};

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct JobCreateRequest {
    #[serde(flatten)]
    pub source: Source,
    #[serde(default)]
    pub options: JobOptions,
}

#[derive(Debug, Serialize)]
pub struct JobCreateResponse {
    pub job_id: JobId,
}

/// POST /jobs
pub async fn create_job(
    State(state): State<AppState>,
    Json(payload): Json<JobCreateRequest>,
) -> ApiResult<Json<JobCreateResponse>> {
    let job_id = state
        .orchestrator
        .create_job(payload.source, payload.options)?;
    Ok(Json(JobCreateResponse { job_id }))
}

/// GET /jobs/:job_id
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobSnapshot>> {
    let snapshot = state.store.snapshot(&JobId::from_string(job_id))?;
    Ok(Json(snapshot))
}

#[derive(Debug, Serialize)]
pub struct JobFilesResponse {
    pub images: Vec<String>,
    pub pdf: Option<String>,
}

/// GET /jobs/:job_id/files
pub async fn get_job_files(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobFilesResponse>> {
    let snapshot = state.store.snapshot(&JobId::from_string(job_id))?;
    let images = snapshot.result["images"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default();
    let pdf = snapshot.result["pdf"].as_str().map(String::from);
    Ok(Json(JobFilesResponse { images, pdf }))
}

#[derive(Debug, Deserialize)]
pub struct ReviewExportRequest {
    pub kept_paths: Vec<String>,
    pub formats: Vec<ExportFormat>,
}

/// POST /jobs/:job_id/review-export
pub async fn review_export(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Json(payload): Json<ReviewExportRequest>,
) -> ApiResult<Json<Value>> {
    let value = review::review_export(
        &state.store,
        &JobId::from_string(job_id),
        &payload.kept_paths,
        &payload.formats,
    )?;
    Ok(Json(value))
}

#[derive(Debug, Deserialize)]
pub struct CaptureCropRequest {
    pub capture_path: String,
    pub roi: Vec<[f32; 2]>,
}

/// POST /jobs/:job_id/capture-crop
pub async fn capture_crop(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Json(payload): Json<CaptureCropRequest>,
) -> ApiResult<Json<Value>> {
    let value = review::crop_capture(
        &state.store,
        &JobId::from_string(job_id),
        &payload.capture_path,
        &payload.roi,
    )?;
    Ok(Json(value))
}
