//! Temporal dedup and vertical stitching of rectified frames.

pub mod dedup;

use std::path::{Path, PathBuf};

use image::{GrayImage, Rgb, RgbImage};
use scorecap_models::{resolve_layout_hint, LayoutMode, SourceKind, StitchOptions};
use tracing::debug;

use crate::error::{MediaError, MediaResult};
use crate::fs_utils::ensure_dir;
use crate::imgops;
use crate::imgops::shift::{
    estimate_shift_correlation, estimate_shift_phase, row_profile, PROFILE_COLUMN_FRACTION,
};
use crate::StageLogger;

use dedup::FrameDeduper;

/// Maximum seam height blended during a merge.
const SEAM_BLEND_MAX: u32 = 42;

/// Dedup then stitch the rectified frames into page images.
///
/// Page-turn sources split on similarity transitions instead of stitching;
/// disabled stitching passes the deduplicated frames through as pages.
pub fn stitch_pages(
    frame_paths: &[PathBuf],
    options: &StitchOptions,
    source_kind: SourceKind,
    workspace: &Path,
    logger: &dyn StageLogger,
) -> MediaResult<Vec<PathBuf>> {
    ensure_dir(workspace)?;
    if frame_paths.is_empty() {
        return Ok(Vec::new());
    }

    let layout = resolve_layout_hint(options.layout_hint, source_kind, None);
    logger.log(&format!("temporal dedupe mode: {:?}", options.dedup_level));
    let kept = filter_redundant_frames(frame_paths, layout, options, logger)?;
    if kept.is_empty() {
        return Ok(Vec::new());
    }

    if layout == LayoutMode::PageTurn {
        logger.log("page-turn mode: compressing repeated pages");
        return collect_page_turn_pages(&kept, options, workspace, logger);
    }

    if !options.enable {
        logger.log("stitch disabled, returning filtered frame pages");
        return Ok(kept);
    }

    scroll_stitch(&kept, options, layout, workspace, logger)
}

fn filter_redundant_frames(
    frame_paths: &[PathBuf],
    layout: LayoutMode,
    options: &StitchOptions,
    logger: &dyn StageLogger,
) -> MediaResult<Vec<PathBuf>> {
    if frame_paths.len() <= 1 {
        return Ok(frame_paths.to_vec());
    }

    let mut deduper = FrameDeduper::new(layout, options.dedup_level);
    let mut kept_paths = vec![frame_paths[0].clone()];
    let mut prev = imgops::load_rgb(&frame_paths[0])?;
    deduper.record_kept(&prev);

    let mut removed = 0usize;
    for path in &frame_paths[1..] {
        let current = match imgops::load_rgb(path) {
            Ok(img) => img,
            Err(err) => {
                debug!("skipping unreadable frame: {err}");
                continue;
            }
        };
        if deduper.should_drop(&prev, &current) {
            removed += 1;
            continue;
        }
        deduper.record_kept(&current);
        kept_paths.push(path.clone());
        prev = current;
    }

    if removed > 0 {
        logger.log(&format!(
            "temporal dedupe removed {removed} near-duplicate frames"
        ));
    }
    Ok(kept_paths)
}

/// Mean-absolute-difference similarity of two frames on a common size.
fn frame_similarity(a: &RgbImage, b: &RgbImage) -> f64 {
    let (ga, gb) = imgops::prepared_diff_pair(a, b);
    if ga.width() <= 2 || ga.height() <= 2 {
        return 0.0;
    }
    (1.0 - imgops::mean_abs_diff(&ga, &gb) / 255.0).clamp(0.0, 1.0)
}

fn collect_page_turn_pages(
    frame_paths: &[PathBuf],
    options: &StitchOptions,
    workspace: &Path,
    logger: &dyn StageLogger,
) -> MediaResult<Vec<PathBuf>> {
    let mut current = imgops::load_rgb(&frame_paths[0])?;
    let mut saved: Vec<PathBuf> = Vec::new();

    let similarity_threshold = (1.0 - options.overlap_threshold * 0.25).clamp(0.88, 0.98);
    for path in &frame_paths[1..] {
        let next = match imgops::load_rgb(path) {
            Ok(img) => img,
            Err(_) => continue,
        };
        let similarity = frame_similarity(&current, &next);
        if similarity >= similarity_threshold {
            continue;
        }
        let out_path = workspace.join(format!("page_{:04}.png", saved.len()));
        imgops::save_png(&current, &out_path)?;
        saved.push(out_path);
        logger.log(&format!(
            "page transition detected ({similarity:.2}) -> new page"
        ));
        current = next;
    }

    let out_path = workspace.join(format!("page_{:04}.png", saved.len()));
    imgops::save_png(&current, &out_path)?;
    saved.push(out_path);
    logger.log(&format!("page-turn pages generated: {}", saved.len()));
    Ok(saved)
}

/// Vertical shift between the bottom window of the buffer and the next
/// frame, combining row correlation and phase correlation.
fn estimate_scroll_shift(buffer_gray: &GrayImage, next_gray: &GrayImage) -> (i32, f64) {
    let h = next_gray.height().min(buffer_gray.height());
    let window = crop_gray(buffer_gray, 0, buffer_gray.height() - h, buffer_gray.width(), h);

    let prev_profile = row_profile(&window, PROFILE_COLUMN_FRACTION);
    let next_profile = row_profile(next_gray, PROFILE_COLUMN_FRACTION);
    let max_lag = (h as usize).saturating_sub(4).max(8);

    let row = estimate_shift_correlation(&prev_profile, &next_profile, max_lag);
    let phase = estimate_shift_phase(&prev_profile, &next_profile);

    if phase.confidence >= (row.confidence + 0.12).max(0.38) {
        (phase.shift, phase.confidence)
    } else {
        (row.shift, row.confidence)
    }
}

fn crop_gray(img: &GrayImage, x: u32, y: u32, w: u32, h: u32) -> GrayImage {
    image::imageops::crop_imm(img, x, y, w, h).to_image()
}

/// Overlap candidate search: mean |delta| between the buffer's bottom strip
/// and the next frame's top strip over central columns.
fn best_overlap(
    buffer_gray: &GrayImage,
    next_gray: &GrayImage,
    shift: i32,
    confidence: f64,
) -> (u32, f64) {
    let next_h = next_gray.height();
    let buf_h = buffer_gray.height();
    let max_overlap = next_h.min(buf_h).saturating_sub(1).max(1);

    let mut radius = ((next_h as f64) * 0.10).round() as i64;
    if confidence < 0.25 {
        radius *= 2;
    }
    let radius = radius.max(4);

    let floor = 8i64.min(max_overlap as i64);
    let center = next_h as i64 - (shift.abs() as i64);
    let lo = (center - radius).clamp(floor, max_overlap as i64);
    let hi = (center + radius).clamp(floor, max_overlap as i64);

    let w = buffer_gray.width().min(next_gray.width());
    let x0 = (w as f64 * (1.0 - PROFILE_COLUMN_FRACTION) / 2.0) as u32;
    let span = ((w as f64) * PROFILE_COLUMN_FRACTION) as u32;

    let mut best = (lo as u32, f64::INFINITY);
    for overlap in lo..=hi {
        let overlap = overlap as u32;
        let bottom = crop_gray(buffer_gray, x0, buf_h - overlap, span.max(1), overlap);
        let top = crop_gray(next_gray, x0, 0, span.max(1), overlap);
        let diff = imgops::mean_abs_diff(&bottom, &top);
        if diff < best.1 {
            best = (overlap, diff);
        }
    }

    let mut score = 1.0 - best.1 / 255.0;
    if confidence < 0.15 && score < 0.78 {
        score *= 0.9;
    }
    (best.0, score.clamp(0.0, 1.0))
}

/// Merge `next` under `buffer` with an `overlap`-row seam blend.
fn merge_pair(buffer: &RgbImage, next: &RgbImage, overlap: u32) -> RgbImage {
    let width = buffer.width().max(next.width());
    let buffer = imgops::pad_to_width(buffer, width);
    let next = imgops::pad_to_width(next, width);

    let buf_h = buffer.height();
    let next_h = next.height();
    let overlap = overlap.min(buf_h.saturating_sub(1)).min(next_h);
    let seam = overlap.min(SEAM_BLEND_MAX);
    let out_h = buf_h - overlap + next_h;

    let mut out = RgbImage::from_pixel(width, out_h, Rgb([255, 255, 255]));

    // Unmerged top of the buffer.
    for y in 0..(buf_h - overlap) {
        for x in 0..width {
            out.put_pixel(x, y, *buffer.get_pixel(x, y));
        }
    }
    // Linear alpha ramp from buffer to next over the seam rows.
    for row in 0..seam {
        let alpha = if seam <= 1 {
            0.0
        } else {
            1.0 - row as f64 / (seam - 1) as f64
        };
        let buffer_y = buf_h - overlap + row;
        let out_y = buf_h - overlap + row;
        for x in 0..width {
            let pb = buffer.get_pixel(x, buffer_y);
            let pn = next.get_pixel(x, row);
            let mut pixel = [0u8; 3];
            for c in 0..3 {
                let value = alpha * pb[c] as f64 + (1.0 - alpha) * pn[c] as f64;
                pixel[c] = value.round().clamp(0.0, 255.0) as u8;
            }
            out.put_pixel(x, out_y, Rgb(pixel));
        }
    }
    // Remainder of the next frame.
    for y in seam..next_h {
        let out_y = buf_h - overlap + y;
        for x in 0..width {
            out.put_pixel(x, out_y, *next.get_pixel(x, y));
        }
    }
    out
}

fn scroll_stitch(
    kept: &[PathBuf],
    options: &StitchOptions,
    layout: LayoutMode,
    workspace: &Path,
    logger: &dyn StageLogger,
) -> MediaResult<Vec<PathBuf>> {
    let effective = layout.effective_overlap_threshold(options.overlap_threshold);
    let mut merged_paths: Vec<PathBuf> = Vec::new();
    let mut buffer = imgops::load_rgb(&kept[0])?;

    let flush = |buffer: &RgbImage, merged_paths: &mut Vec<PathBuf>| -> MediaResult<()> {
        let out_path = workspace.join(format!("page_{:04}.png", merged_paths.len()));
        imgops::save_png(buffer, &out_path)?;
        merged_paths.push(out_path);
        Ok(())
    };

    for path in &kept[1..] {
        let next = match imgops::load_rgb(path) {
            Ok(img) => img,
            Err(_) => continue,
        };

        let width = buffer.width().max(next.width());
        let buffer_padded = imgops::pad_to_width(&buffer, width);
        let next_padded = imgops::pad_to_width(&next, width);
        let buffer_gray = imgops::to_gray(&buffer_padded);
        let next_gray = imgops::to_gray(&next_padded);

        let (shift, confidence) = estimate_scroll_shift(&buffer_gray, &next_gray);
        let (overlap, score) = best_overlap(&buffer_gray, &next_gray, shift, confidence);

        if score >= effective {
            logger.log(&format!(
                "overlap detected ({score:.2}, {overlap} rows) -> stitching"
            ));
            buffer = merge_pair(&buffer_padded, &next_padded, overlap);
        } else {
            flush(&buffer, &mut merged_paths)?;
            buffer = next;
        }
    }
    flush(&buffer, &mut merged_paths)?;
    logger.log(&format!("stitched pages generated: {}", merged_paths.len()));
    Ok(merged_paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NullLogger;
    use scorecap_models::{DedupLevel, LayoutHint};
    use tempfile::TempDir;

    /// A tall synthetic score sheet with distinctive horizontal texture.
    fn tall_sheet(height: u32) -> RgbImage {
        let mut img = RgbImage::from_pixel(400, height, Rgb([244, 244, 240]));
        for y in 0..height {
            let t = y as f64;
            let dark = (t / 13.0).sin() > 0.55 || (t / 29.0).cos() > 0.8;
            if dark {
                for x in 30..370 {
                    img.put_pixel(x, y, Rgb([35, 35, 35]));
                }
            }
        }
        img
    }

    /// A viewport of `view_h` rows starting `offset` rows into the sheet.
    fn viewport(sheet: &RgbImage, offset: u32, view_h: u32) -> RgbImage {
        image::imageops::crop_imm(sheet, 0, offset, sheet.width(), view_h).to_image()
    }

    #[test]
    fn test_merge_pair_height_invariant() {
        let sheet = tall_sheet(600);
        let a = viewport(&sheet, 0, 300);
        let b = viewport(&sheet, 100, 300);
        let merged = merge_pair(&a, &b, 200);
        assert_eq!(merged.height(), 300 + 300 - 200);
        assert_eq!(merged.width(), 400);
    }

    #[test]
    fn test_stitching_single_frame_is_identity() {
        let dir = TempDir::new().unwrap();
        let sheet = viewport(&tall_sheet(400), 0, 300);
        let path = dir.path().join("sheet_00000.png");
        sheet.save(&path).unwrap();

        let options = StitchOptions {
            enable: true,
            overlap_threshold: 0.4,
            layout_hint: LayoutHint::FullScroll,
            dedup_level: DedupLevel::Normal,
        };
        let pages = stitch_pages(
            &[path],
            &options,
            SourceKind::File,
            &dir.path().join("stitched"),
            &NullLogger,
        )
        .unwrap();
        assert_eq!(pages.len(), 1);
        let out = imgops::load_rgb(&pages[0]).unwrap();
        assert_eq!(out.dimensions(), sheet.dimensions());
    }

    #[test]
    fn test_overlapping_scroll_produces_single_page() {
        let dir = TempDir::new().unwrap();
        let sheet = tall_sheet(700);
        let frames: Vec<PathBuf> = [0u32, 60, 120, 180]
            .iter()
            .enumerate()
            .map(|(i, &offset)| {
                let path = dir.path().join(format!("sheet_{i:05}.png"));
                viewport(&sheet, offset, 360).save(&path).unwrap();
                path
            })
            .collect();

        let options = StitchOptions {
            enable: true,
            overlap_threshold: 0.4,
            layout_hint: LayoutHint::FullScroll,
            dedup_level: DedupLevel::Normal,
        };
        let pages = stitch_pages(
            &frames,
            &options,
            SourceKind::File,
            &dir.path().join("stitched"),
            &NullLogger,
        )
        .unwrap();
        assert_eq!(pages.len(), 1, "scroll overlap should merge to one page");

        let merged = imgops::load_rgb(&pages[0]).unwrap();
        assert!(merged.height() > 360, "merged page must grow");
        assert!(merged.height() <= 700, "merged page cannot exceed source");
    }

    #[test]
    fn test_unrelated_frames_flush_pages() {
        let dir = TempDir::new().unwrap();
        let a = tall_sheet(300);
        // Invert to make content clearly unrelated.
        let mut b = tall_sheet(300);
        for p in b.pixels_mut() {
            p[0] = 255 - p[0];
            p[1] = 255 - p[1];
            p[2] = 255 - p[2];
        }
        let pa = dir.path().join("sheet_00000.png");
        let pb = dir.path().join("sheet_00001.png");
        a.save(&pa).unwrap();
        b.save(&pb).unwrap();

        let options = StitchOptions {
            enable: true,
            overlap_threshold: 0.9,
            layout_hint: LayoutHint::FullScroll,
            dedup_level: DedupLevel::Sensitive,
        };
        let pages = stitch_pages(
            &[pa, pb],
            &options,
            SourceKind::File,
            &dir.path().join("stitched"),
            &NullLogger,
        )
        .unwrap();
        assert_eq!(pages.len(), 2);
    }

    #[test]
    fn test_page_turn_splits_on_transition() {
        let dir = TempDir::new().unwrap();
        let page_one = viewport(&tall_sheet(400), 0, 300);
        // A structurally different second page: vertical bars instead of
        // horizontal texture, so the change mask, structure and hash all move.
        let mut page_two = RgbImage::from_pixel(400, 300, Rgb([244, 244, 240]));
        for y in 0..300 {
            for x in 0..400 {
                if (x / 50) % 2 == 0 {
                    page_two.put_pixel(x, y, Rgb([35, 35, 35]));
                }
            }
        }

        let frames: Vec<PathBuf> = [&page_one, &page_one, &page_two, &page_two]
            .iter()
            .enumerate()
            .map(|(i, img)| {
                let path = dir.path().join(format!("sheet_{i:05}.png"));
                img.save(&path).unwrap();
                path
            })
            .collect();

        let options = StitchOptions {
            enable: true,
            overlap_threshold: 0.4,
            layout_hint: LayoutHint::PageTurn,
            dedup_level: DedupLevel::Normal,
        };
        let pages = stitch_pages(
            &frames,
            &options,
            SourceKind::File,
            &dir.path().join("stitched"),
            &NullLogger,
        )
        .unwrap();
        assert_eq!(pages.len(), 2, "exactly two pages expected");
    }

    #[test]
    fn test_disabled_stitch_passes_frames_through() {
        let dir = TempDir::new().unwrap();
        let sheet = tall_sheet(900);
        let frames: Vec<PathBuf> = [0u32, 300, 600]
            .iter()
            .enumerate()
            .map(|(i, &offset)| {
                let path = dir.path().join(format!("sheet_{i:05}.png"));
                viewport(&sheet, offset, 280).save(&path).unwrap();
                path
            })
            .collect();

        let options = StitchOptions {
            enable: false,
            overlap_threshold: 0.2,
            layout_hint: LayoutHint::FullScroll,
            dedup_level: DedupLevel::Normal,
        };
        let pages = stitch_pages(
            &frames,
            &options,
            SourceKind::File,
            &dir.path().join("stitched"),
            &NullLogger,
        )
        .unwrap();
        assert_eq!(pages, frames);
    }
}
