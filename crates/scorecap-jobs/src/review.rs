//! Post-job review operations: re-export and in-place recrop.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use scorecap_media::export;
use scorecap_media::fs_utils::atomic_overwrite;
use scorecap_models::{ExportFormat, JobId, Quad};
use serde_json::json;

use crate::error::{JobError, JobResult};
use crate::store::{JobLogger, JobStore};

/// Minimum side length of a cropped capture.
const MIN_CROP_SIDE: u32 = 16;

/// Re-export a kept subset of a finished job's pages in chosen formats.
pub fn review_export(
    store: &Arc<JobStore>,
    job_id: &JobId,
    kept_paths: &[String],
    formats: &[ExportFormat],
) -> JobResult<serde_json::Value> {
    let job = store
        .job(job_id)
        .ok_or_else(|| JobError::not_found("job not found"))?;
    if job.status.is_active() {
        return Err(JobError::conflict(
            "review export is unavailable while the job is queued or running",
        ));
    }
    if kept_paths.is_empty() {
        return Err(JobError::invalid_input("kept_paths must not be empty"));
    }
    if formats.is_empty() {
        return Err(JobError::invalid_input("formats must not be empty"));
    }

    let artifact_root = canonical_root(&job.artifact_dir)?;
    let mut resolved: Vec<PathBuf> = Vec::with_capacity(kept_paths.len());
    for raw in kept_paths {
        resolved.push(contained_image_path(raw, &artifact_root)?);
    }

    let logger = JobLogger::new(Arc::clone(store), job_id.clone());
    let outcome = export::review_export(
        &resolved,
        formats,
        &job.artifact_dir.join("export"),
        &logger,
    )?;

    let images: Vec<String> = outcome
        .images
        .iter()
        .map(|p| p.to_string_lossy().to_string())
        .collect();
    let pdf = outcome.pdf.as_ref().map(|p| p.to_string_lossy().to_string());

    let mut result = job.result.clone();
    result.insert("images".to_string(), json!(images));
    result.insert("review_candidates".to_string(), json!(images));
    result.insert("pdf".to_string(), json!(pdf));
    store.set_result(job_id, result);

    Ok(json!({ "images": images, "pdf": pdf }))
}

/// Crop an emitted capture in place to the bounding box of a 4-point roi.
pub fn crop_capture(
    store: &Arc<JobStore>,
    job_id: &JobId,
    capture_path: &str,
    roi: &[[f32; 2]],
) -> JobResult<serde_json::Value> {
    let job = store
        .job(job_id)
        .ok_or_else(|| JobError::not_found("job not found"))?;
    if job.status.is_active() {
        return Err(JobError::conflict(
            "capture crop is unavailable while the job is queued or running",
        ));
    }

    let artifact_root = canonical_root(&job.artifact_dir)?;
    let path = contained_image_path(capture_path, &artifact_root)?;
    let quad = Quad::from_wire(roi)
        .ok_or_else(|| JobError::invalid_input("roi must be 4 points: [[x, y], ...]"))?;

    let image = scorecap_media::imgops::load_rgb(&path)?;
    let (w, h) = image.dimensions();
    let clipped = quad.clipped(w as f32, h as f32);
    let (x0, y0, x1, y1) = clipped.bounding_box();
    let x0 = x0.floor().max(0.0) as u32;
    let y0 = y0.floor().max(0.0) as u32;
    let x1 = (x1.ceil() as u32).min(w);
    let y1 = (y1.ceil() as u32).min(h);

    if x1.saturating_sub(x0) < MIN_CROP_SIDE || y1.saturating_sub(y0) < MIN_CROP_SIDE {
        return Err(JobError::invalid_input(format!(
            "crop region must be at least {MIN_CROP_SIDE}x{MIN_CROP_SIDE} pixels"
        )));
    }

    let cropped =
        image::imageops::crop_imm(&image, x0, y0, x1 - x0, y1 - y0).to_image();
    let bytes = encode_for_extension(&cropped, &path)?;
    atomic_overwrite(&path, &bytes)?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let (cw, ch) = cropped.dimensions();
    store.log(
        job_id,
        format!("capture crop saved: {file_name} ({cw}x{ch})"),
    );

    Ok(json!({
        "path": path.to_string_lossy(),
        "width": cw,
        "height": ch,
    }))
}

fn canonical_root(artifact_dir: &Path) -> JobResult<PathBuf> {
    std::fs::canonicalize(artifact_dir)
        .map_err(|_| JobError::not_found("job artifact directory is missing"))
}

/// Resolve a user-supplied path, require an image extension, and require it
/// to live inside the job's artifact tree after symlink resolution.
fn contained_image_path(raw: &str, artifact_root: &Path) -> JobResult<PathBuf> {
    let path = PathBuf::from(raw);
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if !matches!(extension.as_str(), "png" | "jpg" | "jpeg") {
        return Err(JobError::invalid_input(
            "capture path must be a png or jpg image",
        ));
    }

    let canonical = std::fs::canonicalize(&path)
        .map_err(|_| JobError::not_found("capture file not found"))?;
    if !canonical.starts_with(artifact_root) {
        return Err(JobError::invalid_input(
            "capture path is outside the job artifact directory",
        ));
    }
    Ok(canonical)
}

fn encode_for_extension(img: &image::RgbImage, path: &Path) -> JobResult<Vec<u8>> {
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let mut buf = std::io::Cursor::new(Vec::new());
    let format = if extension == "png" {
        image::ImageFormat::Png
    } else {
        image::ImageFormat::Jpeg
    };
    image::DynamicImage::ImageRgb8(img.clone())
        .write_to(&mut buf, format)
        .map_err(|e| JobError::Internal(format!("crop encode failed: {e}")))?;
    Ok(buf.into_inner())
}
