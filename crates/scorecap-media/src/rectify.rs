//! Perspective rectification of detected regions.

use std::path::{Path, PathBuf};

use image::{Rgb, RgbImage};
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};
use scorecap_models::{DetectionRecord, Quad, RectifyOptions};
use tracing::debug;

use crate::error::{MediaError, MediaResult};
use crate::fs_utils::ensure_dir;
use crate::imgops;
use crate::StageLogger;

/// Warp every detected region to a fronto-parallel sheet image.
///
/// Frames without a region pass through unmodified. Output files are
/// `sheet_00000.png` onwards in the stage workspace.
pub fn rectify_frames(
    detections: &[DetectionRecord],
    options: &RectifyOptions,
    workspace: &Path,
    logger: &dyn StageLogger,
) -> MediaResult<Vec<PathBuf>> {
    ensure_dir(workspace)?;
    logger.log(&format!("rectify mode auto={}", options.auto));

    let override_quad = options
        .manual_points
        .as_ref()
        .and_then(|points| Quad::from_wire(points));

    let mut out_paths = Vec::new();
    for (idx, record) in detections.iter().enumerate() {
        let image = match imgops::load_rgb(&record.frame_path) {
            Ok(img) => img,
            Err(err) => {
                debug!("skipping unreadable frame: {err}");
                continue;
            }
        };

        let region = record.region.or(override_quad);
        let Some(region) = region else {
            out_paths.push(record.frame_path.clone());
            continue;
        };

        let warped = match warp_sheet(&image, &region) {
            Some(warped) => warped,
            None => image,
        };
        let finished = if options.auto {
            imgops::tone::enhance_sheet(&warped)
        } else {
            warped
        };

        let out_path = workspace.join(format!("sheet_{idx:05}.png"));
        imgops::save_png(&finished, &out_path)?;
        out_paths.push(out_path);
    }

    if out_paths.is_empty() {
        return Err(MediaError::internal(
            "rectification produced no output frames",
        ));
    }
    logger.log(&format!("rectified {} frames", out_paths.len()));
    Ok(out_paths)
}

/// Perspective-warp the region to a rectangle sized by its edge lengths.
///
/// Returns `None` when the region is degenerate (either dimension <= 1 px).
pub fn warp_sheet(image: &RgbImage, region: &Quad) -> Option<RgbImage> {
    let quad = Quad::ordered(region.0);
    let (top_w, bottom_w) = quad.edge_widths();
    let (left_h, right_h) = quad.edge_heights();
    let target_w = top_w.max(bottom_w).floor() as i64;
    let target_h = left_h.max(right_h).floor() as i64;
    if target_w <= 1 || target_h <= 1 {
        return None;
    }
    let (target_w, target_h) = (target_w as f32, target_h as f32);

    let from = [
        (quad.top_left().x, quad.top_left().y),
        (quad.top_right().x, quad.top_right().y),
        (quad.bottom_right().x, quad.bottom_right().y),
        (quad.bottom_left().x, quad.bottom_left().y),
    ];
    let to = [
        (0.0, 0.0),
        (target_w - 1.0, 0.0),
        (target_w - 1.0, target_h - 1.0),
        (0.0, target_h - 1.0),
    ];
    let projection = Projection::from_control_points(from, to)?;

    let mut out = RgbImage::from_pixel(target_w as u32, target_h as u32, Rgb([255, 255, 255]));
    warp_into(
        image,
        &projection,
        Interpolation::Bilinear,
        Rgb([255, 255, 255]),
        &mut out,
    );
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NullLogger;
    use scorecap_models::Point;
    use tempfile::TempDir;

    fn checkered_frame() -> RgbImage {
        let mut img = RgbImage::from_pixel(1280, 720, Rgb([10, 10, 10]));
        for y in 150..600 {
            for x in 100..1180 {
                let v = if (x / 20 + y / 20) % 2 == 0 { 230 } else { 180 };
                img.put_pixel(x, y, Rgb([v, v, v]));
            }
        }
        img
    }

    #[test]
    fn test_warp_dimensions_match_edge_lengths() {
        let img = checkered_frame();
        let quad = Quad::ordered([
            Point::new(100.0, 150.0),
            Point::new(1180.0, 150.0),
            Point::new(1180.0, 600.0),
            Point::new(100.0, 600.0),
        ]);
        let warped = warp_sheet(&img, &quad).unwrap();
        assert_eq!(warped.dimensions(), (1080, 450));
    }

    #[test]
    fn test_degenerate_region_is_rejected() {
        let img = checkered_frame();
        let quad = Quad::from_rect(10.0, 10.0, 0.5, 300.0);
        assert!(warp_sheet(&img, &quad).is_none());
    }

    #[test]
    fn test_rectify_writes_numbered_sheets() {
        let dir = TempDir::new().unwrap();
        let frame_path = dir.path().join("frame_000001.png");
        checkered_frame().save(&frame_path).unwrap();

        let detections = vec![DetectionRecord::new(
            frame_path,
            Some(Quad::from_rect(100.0, 150.0, 1080.0, 450.0)),
            1.0,
            0,
        )];
        let options = RectifyOptions {
            auto: false,
            manual_points: None,
        };
        let out = rectify_frames(
            &detections,
            &options,
            &dir.path().join("rectified"),
            &NullLogger,
        )
        .unwrap();
        assert_eq!(out.len(), 1);
        assert!(out[0].ends_with("sheet_00000.png"));
        let produced = imgops::load_rgb(&out[0]).unwrap();
        assert_eq!(produced.dimensions(), (1080, 450));
    }

    #[test]
    fn test_frames_without_region_pass_through() {
        let dir = TempDir::new().unwrap();
        let frame_path = dir.path().join("frame_000001.png");
        checkered_frame().save(&frame_path).unwrap();

        let detections = vec![DetectionRecord::new(frame_path.clone(), None, 0.0, 0)];
        let options = RectifyOptions {
            auto: false,
            manual_points: None,
        };
        let out = rectify_frames(
            &detections,
            &options,
            &dir.path().join("rectified"),
            &NullLogger,
        )
        .unwrap();
        assert_eq!(out, vec![frame_path]);
    }
}
