//! API routes.

use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::handlers::health::health;
use crate::handlers::jobs::{capture_crop, create_job, get_job, get_job_files, review_export};
use crate::handlers::maintenance::{get_cache_usage, post_clear_cache};
use crate::handlers::preview::{preview_frame, preview_source};
use crate::handlers::runtime::runtime_status;
use crate::state::AppState;

/// Create the API router, including the read-only artifact mount.
pub fn create_router(state: AppState) -> Router {
    let job_routes = Router::new()
        .route("/jobs", post(create_job))
        .route("/jobs/:job_id", get(get_job))
        .route("/jobs/:job_id/files", get(get_job_files))
        .route("/jobs/:job_id/review-export", post(review_export))
        .route("/jobs/:job_id/capture-crop", post(capture_crop));

    let preview_routes = Router::new()
        .route("/preview/frame", post(preview_frame))
        .route("/preview/source", post(preview_source));

    let maintenance_routes = Router::new()
        .route("/maintenance/cache-usage", get(get_cache_usage))
        .route("/maintenance/clear-cache", post(post_clear_cache));

    let static_files = ServeDir::new(state.store.root().to_path_buf());

    Router::new()
        .route("/health", get(health))
        .route("/runtime", get(runtime_status))
        .merge(job_routes)
        .merge(preview_routes)
        .merge(maintenance_routes)
        .nest_service("/jobs-files", static_files)
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&state.config.cors_origins))
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|origin| origin == "*") {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(parsed))
        .allow_methods(Any)
        .allow_headers(Any)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApiConfig;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tempfile::TempDir;
    use tower::ServiceExt;

    async fn test_state() -> (TempDir, AppState) {
        let dir = TempDir::new().unwrap();
        let config = ApiConfig {
            jobs_root: dir.path().join("jobs"),
            ..Default::default()
        };
        let state = AppState::new(config).unwrap();
        (dir, state)
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (_dir, state) = test_state().await;
        let app = create_router(state);
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_job_is_404() {
        let (_dir, state) = test_state().await;
        let app = create_router(state);
        let response = app
            .oneshot(Request::get("/jobs/missing-id").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_create_job_rejects_missing_locator() {
        let (_dir, state) = test_state().await;
        let app = create_router(state);
        let response = app
            .oneshot(
                Request::post("/jobs")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"source_type":"file"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_cache_usage_on_empty_root() {
        let (_dir, state) = test_state().await;
        let app = create_router(state);
        let response = app
            .oneshot(
                Request::get("/maintenance/cache-usage")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_clear_cache_conflicts_with_active_job() {
        use scorecap_models::{Job, JobOptions, Source};

        let (_dir, state) = test_state().await;
        let job = Job::new(
            Source::local_file("/tmp/in.mp4"),
            JobOptions::default(),
            state.store.root().join("busy-job"),
        );
        std::fs::create_dir_all(state.store.root().join("busy-job")).unwrap();
        state.store.insert(job);

        let app = create_router(state);
        let response = app
            .oneshot(
                Request::post("/maintenance/clear-cache")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }
}
