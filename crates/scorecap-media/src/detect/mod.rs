//! Layout-aware score region detection with temporal smoothing.

pub mod candidates;
pub mod score;

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use scorecap_models::{
    resolve_layout_hint, DetectMode, DetectOptions, DetectionProfile, DetectionRecord, FallbackMode,
    LayoutMode, Quad, SourceKind,
};
use tracing::debug;

use crate::error::{MediaError, MediaResult};
use crate::fs_utils::ensure_dir;
use crate::imgops;
use crate::StageLogger;

use candidates::{contour_candidates, synthetic_candidate};
use score::{score_candidate, FrameContext};

/// Temporal-IoU floor below which a page-turn frame resets the history.
const PAGE_TURN_IOU_RESET: f32 = 0.16;

/// Detect the score region in every frame.
pub fn detect_regions(
    frame_paths: &[PathBuf],
    options: &DetectOptions,
    source_kind: SourceKind,
    workspace: &Path,
    logger: &dyn StageLogger,
) -> MediaResult<Vec<DetectionRecord>> {
    ensure_dir(workspace)?;
    if frame_paths.is_empty() {
        return Ok(Vec::new());
    }

    if options.mode == DetectMode::Manual {
        return manual_detections(frame_paths, options, logger);
    }

    let layout = resolve_layout_hint(options.layout_hint, source_kind, options.prefer_bottom);
    let profile = layout.profile();
    logger.log(&format!("detect layout mode: {}", layout.as_str()));

    let mut detections = Vec::with_capacity(frame_paths.len());
    let mut history: VecDeque<Quad> = VecDeque::new();
    let mut last_region: Option<Quad> = None;

    for (idx, frame_path) in frame_paths.iter().enumerate() {
        let img = match imgops::load_rgb(frame_path) {
            Ok(img) => img,
            Err(err) => {
                debug!("skipping unreadable frame {}: {err}", frame_path.display());
                continue;
            }
        };
        let gray = imgops::to_gray(&img);
        let ctx = FrameContext::new(gray.clone());

        let mut frame_candidates = contour_candidates(&gray, profile);
        if let Some(synthetic) = synthetic_candidate(&img, &gray, profile) {
            frame_candidates.push(synthetic);
        }

        let mut best: Option<(f64, Quad)> = None;
        for candidate in &frame_candidates {
            let s = score_candidate(&candidate.quad, profile, &ctx, last_region.as_ref());
            if best.as_ref().map(|(bs, _)| s > *bs).unwrap_or(true) {
                best = Some((s, candidate.quad));
            }
        }

        let (raw_score, raw_region) = match (best, last_region) {
            (Some((s, quad)), _) if s >= profile.confidence_threshold => (s, quad),
            // Low-confidence frame: carry the recent region forward.
            (Some((s, _)), Some(recent)) => (s, recent),
            (Some((s, _)), None) => (s, fallback_region(profile, img.dimensions())),
            (None, Some(recent)) => (0.0, recent),
            (None, None) => (0.0, fallback_region(profile, img.dimensions())),
        };

        if layout == LayoutMode::PageTurn {
            if let Some(prev) = last_region.as_ref() {
                if raw_region.bbox_iou(prev) < PAGE_TURN_IOU_RESET {
                    history.clear();
                    logger.log(&format!(
                        "page transition suspected at frame {idx} (iou < {PAGE_TURN_IOU_RESET})"
                    ));
                }
            }
        }

        history.push_back(raw_region);
        while history.len() > profile.history_len() {
            history.pop_front();
        }

        // Page-turn frames keep the raw region; scroll layouts emit the
        // component-wise median of the recent history.
        let smoothed = if layout == LayoutMode::PageTurn {
            raw_region
        } else {
            let window: Vec<Quad> = history.iter().copied().collect();
            Quad::component_median(&window).unwrap_or(raw_region)
        };

        let canonical = Quad::ordered(smoothed.0);
        last_region = Some(raw_region);
        detections.push(DetectionRecord::new(
            frame_path.clone(),
            Some(canonical),
            raw_score,
            idx,
        ));
    }

    logger.log(&format!("detected regions in {} frames", detections.len()));
    Ok(detections)
}

fn manual_detections(
    frame_paths: &[PathBuf],
    options: &DetectOptions,
    logger: &dyn StageLogger,
) -> MediaResult<Vec<DetectionRecord>> {
    let raw = options
        .roi
        .as_ref()
        .ok_or_else(|| MediaError::internal("manual detect mode without roi"))?;
    let quad = Quad::from_wire(raw)
        .ok_or_else(|| MediaError::internal("roi must be 4 points"))?;

    let (top_w, bottom_w) = quad.edge_widths();
    let (left_h, right_h) = quad.edge_heights();
    if top_w + bottom_w <= 2.0 || left_h + right_h <= 2.0 {
        return Err(MediaError::internal(
            "roi is too small. drag a larger sheet region.",
        ));
    }

    logger.log("using manual ROI for all frames");
    Ok(frame_paths
        .iter()
        .enumerate()
        .map(|(idx, path)| DetectionRecord::new(path.clone(), Some(quad), 1.0, idx))
        .collect())
}

/// Fixed-ratio fallback rectangle for a layout's fallback mode.
fn fallback_region(profile: &DetectionProfile, dims: (u32, u32)) -> Quad {
    let (w, h) = (dims.0 as f32, dims.1 as f32);
    let (x0, y0, x1, y1) = match profile.fallback_mode {
        FallbackMode::Bottom => (0.04, 0.56, 0.96, 0.96),
        FallbackMode::Center => (0.10, 0.18, 0.90, 0.82),
        FallbackMode::FullPage => (0.02, 0.03, 0.98, 0.97),
    };
    Quad::from_rect(x0 * w, y0 * h, (x1 - x0) * w, (y1 - y0) * h)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NullLogger;
    use image::{Rgb, RgbImage};
    use scorecap_models::LayoutHint;
    use tempfile::TempDir;

    fn write_frames(dir: &Path, count: usize, painter: impl Fn(usize) -> RgbImage) -> Vec<PathBuf> {
        (0..count)
            .map(|i| {
                let path = dir.join(format!("frame_{:06}.png", i + 1));
                painter(i).save(&path).unwrap();
                path
            })
            .collect()
    }

    fn sheet_frame(offset: usize) -> RgbImage {
        let mut img = RgbImage::from_pixel(320, 180, Rgb([20, 20, 26]));
        for y in 30..150 {
            for x in 40..280 {
                img.put_pixel(x, y, Rgb([238, 238, 232]));
            }
        }
        for line in 0..5u32 {
            let y = 50 + line * 20 + (offset as u32) % 3;
            for x in 40..280 {
                img.put_pixel(x, y.min(179), Rgb([30, 30, 30]));
            }
        }
        img
    }

    #[test]
    fn test_manual_mode_returns_ordered_roi_everywhere() {
        let dir = TempDir::new().unwrap();
        let frames = write_frames(dir.path(), 3, |_| sheet_frame(0));

        let options = DetectOptions {
            mode: DetectMode::Manual,
            roi: Some(vec![
                [1180.0, 150.0],
                [100.0, 150.0],
                [100.0, 600.0],
                [1180.0, 600.0],
            ]),
            layout_hint: LayoutHint::Auto,
            prefer_bottom: None,
        };
        let records = detect_regions(
            &frames,
            &options,
            SourceKind::File,
            &dir.path().join("detect"),
            &NullLogger,
        )
        .unwrap();

        assert_eq!(records.len(), 3);
        for record in &records {
            assert_eq!(record.score, 1.0);
            let quad = record.region.unwrap();
            assert_eq!(quad.top_left().x, 100.0);
            assert_eq!(quad.top_left().y, 150.0);
            assert_eq!(quad.bottom_right().x, 1180.0);
            assert_eq!(quad.bottom_right().y, 600.0);
        }
    }

    #[test]
    fn test_manual_mode_rejects_degenerate_roi() {
        let dir = TempDir::new().unwrap();
        let frames = write_frames(dir.path(), 1, |_| sheet_frame(0));
        let options = DetectOptions {
            mode: DetectMode::Manual,
            roi: Some(vec![[0.0, 0.0], [0.5, 0.0], [0.5, 0.5], [0.0, 0.5]]),
            layout_hint: LayoutHint::Auto,
            prefer_bottom: None,
        };
        let err = detect_regions(
            &frames,
            &options,
            SourceKind::File,
            &dir.path().join("detect"),
            &NullLogger,
        )
        .unwrap_err();
        assert!(err.to_string().contains("too small"));
    }

    #[test]
    fn test_auto_mode_finds_stable_sheet() {
        let dir = TempDir::new().unwrap();
        let frames = write_frames(dir.path(), 5, sheet_frame);
        let options = DetectOptions {
            layout_hint: LayoutHint::FullScroll,
            ..Default::default()
        };
        let records = detect_regions(
            &frames,
            &options,
            SourceKind::File,
            &dir.path().join("detect"),
            &NullLogger,
        )
        .unwrap();
        assert_eq!(records.len(), 5);

        // Later records are median-smoothed; the region must sit on the sheet.
        let quad = records[4].region.unwrap();
        let (x0, y0, x1, y1) = quad.bounding_box();
        assert!(x0 < 80.0 && x1 > 240.0, "x range {x0}..{x1}");
        assert!(y0 < 60.0 && y1 > 120.0, "y range {y0}..{y1}");
    }

    #[test]
    fn test_fallback_rects() {
        let bottom = fallback_region(LayoutMode::BottomBar.profile(), (1000, 1000));
        let (x0, y0, x1, y1) = bottom.bounding_box();
        assert_eq!((x0, y0), (40.0, 560.0));
        assert_eq!((x1, y1), (960.0, 960.0));

        let full = fallback_region(LayoutMode::FullScroll.profile(), (100, 100));
        let (_, fy0, _, fy1) = full.bounding_box();
        assert!(fy0 < 5.0 && fy1 > 95.0);
    }
}
