//! Preview handlers: single-frame grabs and source resolution.

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use scorecap_jobs::pipeline::DOWNLOADS_PREFIX;
use scorecap_media::extract::{extract_preview_frame, resolve_source_video};
use scorecap_models::Source;

use crate::error::{ApiError, ApiResult};
use crate::handlers::jobs_files_url;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct PreviewFrameRequest {
    #[serde(flatten)]
    pub source: Source,
    #[serde(default)]
    pub start_sec: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct PreviewFrameResponse {
    pub image_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

/// POST /preview/frame
pub async fn preview_frame(
    State(state): State<AppState>,
    Json(payload): Json<PreviewFrameRequest>,
) -> ApiResult<Json<PreviewFrameResponse>> {
    payload.source.validate().map_err(ApiError::bad_request)?;
    if let Some(start) = payload.start_sec {
        if start < 0.0 {
            return Err(ApiError::bad_request("start_sec must be non-negative"));
        }
    }

    let jobs_root = state.store.root().to_path_buf();
    let workspace = jobs_root.join("_preview").join(Uuid::new_v4().to_string());
    let downloads_root = jobs_root.join(DOWNLOADS_PREFIX);

    let acquired = resolve_source_video(&payload.source, &downloads_root)
        .await
        .map_err(|e| ApiError::internal(format!("preview frame extraction failed: {e}")))?;
    let image_path =
        extract_preview_frame(&acquired.path, payload.start_sec.unwrap_or(0.0), &workspace)
            .await
            .map_err(|e| ApiError::internal(format!("preview frame extraction failed: {e}")))?;

    let image_url = jobs_files_url(&jobs_root, &image_path);
    Ok(Json(PreviewFrameResponse {
        image_path: image_path.to_string_lossy().to_string(),
        image_url,
    }))
}

#[derive(Debug, Deserialize)]
pub struct PreviewSourceRequest {
    #[serde(flatten)]
    pub source: Source,
}

#[derive(Debug, Serialize)]
pub struct PreviewSourceResponse {
    pub video_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    pub cache_hit: bool,
}

/// POST /preview/source
///
/// Ensure a local video exists for the source without running a capture.
pub async fn preview_source(
    State(state): State<AppState>,
    Json(payload): Json<PreviewSourceRequest>,
) -> ApiResult<Json<PreviewSourceResponse>> {
    payload.source.validate().map_err(ApiError::bad_request)?;

    let jobs_root = state.store.root().to_path_buf();
    let downloads_root = jobs_root.join(DOWNLOADS_PREFIX);
    let acquired = resolve_source_video(&payload.source, &downloads_root)
        .await
        .map_err(|e| ApiError::internal(format!("source preparation failed: {e}")))?;

    let video_url = jobs_files_url(&jobs_root, &acquired.path);
    Ok(Json(PreviewSourceResponse {
        video_path: acquired.path.to_string_lossy().to_string(),
        video_url,
        cache_hit: acquired.cache_hit,
    }))
}
