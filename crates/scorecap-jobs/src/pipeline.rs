//! The capture pipeline driver.
//!
//! Runs a single job left to right: resolve source, extract, detect,
//! rectify, dedup/stitch, upscale, finalize+export. Progress advances at
//! fixed stage boundaries; all stage errors propagate to the orchestrator
//! boundary.

use std::path::PathBuf;
use std::sync::Arc;

use scorecap_media::export::export_pages;
use scorecap_media::extract::{extract_frames, resolve_source_video};
use scorecap_media::{detect, rectify, stitch, upscale};
use scorecap_media::{runtime_acceleration, MediaError, StageLogger};
use scorecap_models::{Job, JobStatus, LayoutHint, StitchOptions};
use serde_json::json;

use crate::error::{JobError, JobResult};
use crate::store::{JobLogger, JobStore};

/// Stage progress checkpoints.
pub const PROGRESS_INIT: f64 = 0.01;
pub const PROGRESS_POST_EXTRACT: f64 = 0.20;
pub const PROGRESS_POST_DETECT: f64 = 0.45;
pub const PROGRESS_POST_RECTIFY: f64 = 0.68;
pub const PROGRESS_POST_STITCH: f64 = 0.82;
pub const PROGRESS_POST_UPSCALE: f64 = 0.92;
pub const PROGRESS_DONE: f64 = 1.00;

/// Directory under the artifact root shared by stream-download caches.
pub const DOWNLOADS_PREFIX: &str = "_downloads";

/// Run the full pipeline for one job.
pub async fn run_pipeline(store: Arc<JobStore>, job: Job) -> JobResult<()> {
    let job_id = job.id.clone();
    let logger = JobLogger::new(Arc::clone(&store), job_id.clone());
    let artifact_dir = job.artifact_dir.clone();
    let options = job.options.clone();

    let mut result = serde_json::Map::new();
    result.insert(
        "output_dir".to_string(),
        json!(artifact_dir.join("export").to_string_lossy()),
    );

    logger.log("job started");
    store.set_state(
        &job_id,
        JobStatus::Running,
        Some(PROGRESS_INIT),
        Some("initializing"),
        Some("initializing pipeline"),
        None,
        None,
    );

    let accel = runtime_acceleration().await;

    // Source resolution and frame extraction.
    let downloads_root = store.root().join(DOWNLOADS_PREFIX);
    let acquired = resolve_source_video(&job.source, &downloads_root).await?;
    if let Ok(info) = scorecap_media::probe::probe_video(&acquired.path).await {
        result.insert("source_info".to_string(), json!(info));
    }

    let frames_dir = artifact_dir.join("frames");
    let extracted = extract_frames(&acquired.path, &options.extract, &frames_dir, &logger).await?;
    result.insert(
        "source_video".to_string(),
        json!(extracted.source_video.to_string_lossy()),
    );
    result.insert("extracted_frames".to_string(), json!(extracted.frames.len()));
    result.insert(
        "runtime".to_string(),
        accel.public_info(Some(&extracted.ffmpeg_mode)),
    );
    store.set_state(
        &job_id,
        JobStatus::Running,
        Some(PROGRESS_POST_EXTRACT),
        Some("detecting"),
        Some("frame extraction completed"),
        Some(result.clone()),
        None,
    );

    // Region detection.
    let detections = {
        let frames = extracted.frames.clone();
        let detect_options = options.detect.clone();
        let source_kind = job.source.source_type;
        let workspace = artifact_dir.join("detect");
        let logger = JobLogger::new(Arc::clone(&store), job_id.clone());
        run_blocking(move || {
            detect::detect_regions(&frames, &detect_options, source_kind, &workspace, &logger)
        })
        .await?
    };
    result.insert("detections".to_string(), json!(detections.len()));
    store.set_state(
        &job_id,
        JobStatus::Running,
        Some(PROGRESS_POST_DETECT),
        Some("rectifying"),
        Some("sheet detection completed"),
        Some(result.clone()),
        None,
    );

    // Rectification.
    let rectified = {
        let detections = detections.clone();
        let rectify_options = options.rectify.clone();
        let workspace = artifact_dir.join("rectified");
        let logger = JobLogger::new(Arc::clone(&store), job_id.clone());
        run_blocking(move || {
            rectify::rectify_frames(&detections, &rectify_options, &workspace, &logger)
        })
        .await?
    };
    result.insert("rectified_frames".to_string(), json!(rectified.len()));
    store.set_state(
        &job_id,
        JobStatus::Running,
        Some(PROGRESS_POST_RECTIFY),
        Some("stitching"),
        Some("rectification completed"),
        Some(result.clone()),
        None,
    );

    // Temporal dedup and stitching.
    let stitched = {
        let rectified = rectified.clone();
        let stitch_options = effective_stitch_options(&options.stitch, options.detect.layout_hint);
        let source_kind = job.source.source_type;
        let workspace = artifact_dir.join("stitched");
        let logger = JobLogger::new(Arc::clone(&store), job_id.clone());
        run_blocking(move || {
            stitch::stitch_pages(&rectified, &stitch_options, source_kind, &workspace, &logger)
        })
        .await?
    };
    result.insert("stitched_frames".to_string(), json!(stitched.len()));
    store.set_state(
        &job_id,
        JobStatus::Running,
        Some(PROGRESS_POST_STITCH),
        Some("upscaling"),
        Some("stitching completed"),
        Some(result.clone()),
        None,
    );

    // Upscaling.
    let upscaled = upscale::upscale_frames(
        &stitched,
        &options.upscale,
        &artifact_dir.join("upscaled"),
        &logger,
    )
    .await?;
    let upscale_message = if options.upscale.enable {
        "upscaling completed"
    } else {
        "upscaling skipped"
    };
    store.set_state(
        &job_id,
        JobStatus::Running,
        Some(PROGRESS_POST_UPSCALE),
        Some("exporting"),
        Some(upscale_message),
        None,
        None,
    );

    // Finalize and export.
    let export = {
        let pages = upscaled.clone();
        let export_options = options.export.clone();
        let workspace = artifact_dir.join("export");
        let source_frames = options
            .export
            .include_raw_frames
            .then(|| extracted.frames.clone());
        let logger = JobLogger::new(Arc::clone(&store), job_id.clone());
        run_blocking(move || {
            export_pages(
                &pages,
                &export_options,
                &workspace,
                source_frames.as_deref(),
                &logger,
            )
        })
        .await?
    };

    let images: Vec<String> = export
        .images
        .iter()
        .map(|p| p.to_string_lossy().to_string())
        .collect();
    result.insert("images".to_string(), json!(images));
    result.insert("review_candidates".to_string(), json!(images));
    result.insert(
        "pdf".to_string(),
        json!(export.pdf.as_ref().map(|p| p.to_string_lossy().to_string())),
    );
    result.insert(
        "raw_frames".to_string(),
        json!(export
            .raw_frames
            .iter()
            .map(|p| p.to_string_lossy().to_string())
            .collect::<Vec<_>>()),
    );
    if let Some(sheet) = export.complete_sheet.as_ref() {
        result.insert(
            "complete_sheet".to_string(),
            json!(sheet.to_string_lossy()),
        );
    }

    store.set_state(
        &job_id,
        JobStatus::Done,
        Some(PROGRESS_DONE),
        Some("done"),
        Some("export finished"),
        Some(result),
        None,
    );
    logger.log("job finished");
    Ok(())
}

/// Stitch inherits an explicit detect layout hint when its own is auto.
fn effective_stitch_options(stitch: &StitchOptions, detect_hint: LayoutHint) -> StitchOptions {
    let mut options = stitch.clone();
    if options.layout_hint == LayoutHint::Auto && detect_hint != LayoutHint::Auto {
        options.layout_hint = detect_hint;
    }
    options
}

async fn run_blocking<T, F>(f: F) -> JobResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, MediaError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| JobError::Internal(format!("stage task failed: {e}")))?
        .map_err(JobError::from)
}

/// Allocate the artifact directory for a new job id.
pub fn allocate_artifact_dir(root: &std::path::Path, id: &str) -> std::io::Result<PathBuf> {
    let dir = root.join(id);
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_checkpoints_are_monotone() {
        let checkpoints = [
            PROGRESS_INIT,
            PROGRESS_POST_EXTRACT,
            PROGRESS_POST_DETECT,
            PROGRESS_POST_RECTIFY,
            PROGRESS_POST_STITCH,
            PROGRESS_POST_UPSCALE,
            PROGRESS_DONE,
        ];
        for window in checkpoints.windows(2) {
            assert!(window[0] < window[1]);
        }
    }

    #[test]
    fn test_stitch_inherits_detect_hint() {
        let stitch = StitchOptions::default();
        let effective = effective_stitch_options(&stitch, LayoutHint::PageTurn);
        assert_eq!(effective.layout_hint, LayoutHint::PageTurn);

        let explicit = StitchOptions {
            layout_hint: LayoutHint::FullScroll,
            ..Default::default()
        };
        let effective = effective_stitch_options(&explicit, LayoutHint::PageTurn);
        assert_eq!(effective.layout_hint, LayoutHint::FullScroll);
    }
}
