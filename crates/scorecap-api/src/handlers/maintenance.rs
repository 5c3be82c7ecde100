//! Maintenance handlers for the artifact root.

use axum::extract::State;
use axum::Json;

use scorecap_jobs::maintenance::{cache_usage, clear_cache, CacheUsage, ClearOutcome};

use crate::error::ApiResult;
use crate::state::AppState;

/// GET /maintenance/cache-usage
pub async fn get_cache_usage(State(state): State<AppState>) -> ApiResult<Json<CacheUsage>> {
    let usage = cache_usage(&state.store)?;
    Ok(Json(usage))
}

/// POST /maintenance/clear-cache
///
/// Rejected with 409 while any job is queued or running.
pub async fn post_clear_cache(State(state): State<AppState>) -> ApiResult<Json<ClearOutcome>> {
    let outcome = clear_cache(&state.store)?;
    Ok(Json(outcome))
}
