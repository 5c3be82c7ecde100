//! Runtime acceleration status handler.

use axum::Json;
use serde_json::Value;

use scorecap_media::runtime_acceleration;

/// GET /runtime
///
/// Public view of the process acceleration snapshot, including the
/// neural-backend diagnostics.
pub async fn runtime_status() -> Json<Value> {
    let accel = runtime_acceleration().await;
    Json(accel.public_info(None))
}
