//! Sheet finalization: tone normalization, merged-sheet assembly,
//! whitespace-aware pagination and print margining.

pub mod paginate;

use image::{GrayImage, Luma, Rgb, RgbImage};
use rayon::prelude::*;
use scorecap_models::FillMode;

use crate::imgops;
use crate::StageLogger;

/// Portrait A-series page ratio (width / height).
pub const PORTRAIT_PAGE_RATIO: f64 = std::f64::consts::FRAC_1_SQRT_2;

/// Mean-absolute-difference floor under which consecutive finalizer inputs
/// are treated as the same sheet.
const NEAR_IDENTICAL_MAD: f64 = 5.8;

/// Grayscale MAE ceiling for accepting a finalize-time overlap merge.
const MERGE_MAE_LIMIT: f64 = 19.5;

/// Separator height between unmergeable sheets.
const SEPARATOR_ROWS: u32 = 12;

/// Page ratio from the environment override, portrait by default.
pub fn page_ratio_from_env() -> f64 {
    std::env::var("SCORECAP_PAGE_RATIO")
        .ok()
        .and_then(|raw| raw.trim().parse::<f64>().ok())
        .filter(|ratio| (0.3..=3.0).contains(ratio))
        .unwrap_or(PORTRAIT_PAGE_RATIO)
}

/// The finalizer's output.
pub struct FinalizeOutcome {
    /// Print-ready pages, in reading order.
    pub pages: Vec<RgbImage>,
    /// The fully merged pre-split sheet, when 2+ inputs contributed.
    pub complete_sheet: Option<RgbImage>,
}

/// Finalize the stitched page sequence into print-ready pages.
pub fn finalize_sheet_pages(
    inputs: &[RgbImage],
    fill_mode: FillMode,
    page_ratio: f64,
    logger: &dyn StageLogger,
) -> FinalizeOutcome {
    let normalized: Vec<RgbImage> = inputs.par_iter().map(normalize_score_tone).collect();
    let distinct = drop_near_identical(normalized);
    if distinct.is_empty() {
        return FinalizeOutcome {
            pages: Vec::new(),
            complete_sheet: None,
        };
    }
    let contributed = distinct.len();

    let merged = merge_sheet_sequence(&distinct, logger);
    let gray = imgops::to_gray(&merged);
    let density = paginate::sheet_row_density(&gray);
    let target_h = paginate::target_page_height(merged.width(), page_ratio);
    let ranges = paginate::split_rows(&density, fill_mode, target_h);
    if ranges.len() > 1 {
        logger.log(&format!(
            "pagination split merged sheet into {} pages",
            ranges.len()
        ));
    }

    let pages: Vec<RgbImage> = ranges
        .iter()
        .map(|&(s, e)| {
            let slice =
                image::imageops::crop_imm(&merged, 0, s as u32, merged.width(), (e - s) as u32)
                    .to_image();
            frame_as_printed_page(&slice, page_ratio)
        })
        .collect();

    FinalizeOutcome {
        complete_sheet: (contributed >= 2).then(|| merged),
        pages,
    }
}

/// Tone normalize: gray, median blur, percentile stretch, slight gain/bias.
pub fn normalize_score_tone(image: &RgbImage) -> RgbImage {
    let gray = imgops::to_gray(image);
    let blurred = imageproc::filter::median_filter(&gray, 1, 1);

    let values: Vec<f32> = blurred.pixels().map(|p| p[0] as f32).collect();
    let low = imgops::percentile(&values, 1.0) as f64;
    let high = imgops::percentile(&values, 99.0) as f64;

    let stretched: GrayImage = if high - low > 1.0 {
        let scale = 255.0 / (high - low);
        GrayImage::from_fn(blurred.width(), blurred.height(), |x, y| {
            let value = (blurred.get_pixel(x, y)[0] as f64 - low) * scale;
            Luma([value.round().clamp(0.0, 255.0) as u8])
        })
    } else {
        blurred
    };

    // convertScaleAbs(alpha=1.06, beta=6)
    let mut out = RgbImage::new(stretched.width(), stretched.height());
    for (x, y, pixel) in stretched.enumerate_pixels() {
        let value = (1.06 * pixel[0] as f64 + 6.0).round().clamp(0.0, 255.0) as u8;
        out.put_pixel(x, y, Rgb([value, value, value]));
    }
    out
}

/// Drop consecutive near-identical sheets.
fn drop_near_identical(inputs: Vec<RgbImage>) -> Vec<RgbImage> {
    let mut out: Vec<RgbImage> = Vec::with_capacity(inputs.len());
    for img in inputs {
        if let Some(prev) = out.last() {
            let (ga, gb) = imgops::prepared_diff_pair(prev, &img);
            if imgops::mean_abs_diff(&ga, &gb) < NEAR_IDENTICAL_MAD {
                continue;
            }
        }
        out.push(img);
    }
    out
}

/// Merge the sheet sequence vertically, blending detected overlaps and
/// separating unrelated sheets with a white gap.
fn merge_sheet_sequence(sheets: &[RgbImage], logger: &dyn StageLogger) -> RgbImage {
    let mut merged = sheets[0].clone();
    for next in &sheets[1..] {
        merged = merge_two_sheets(&merged, next, logger);
    }
    merged
}

fn merge_two_sheets(top: &RgbImage, bottom: &RgbImage, logger: &dyn StageLogger) -> RgbImage {
    let width = top.width().max(bottom.width());
    let top = imgops::pad_to_width(top, width);
    let bottom = imgops::pad_to_width(bottom, width);

    let top_gray = imgops::to_gray(&top);
    let bottom_gray = imgops::to_gray(&bottom);
    let h = top.height().min(bottom.height());

    let min_overlap = 18.max((h as f64 * 0.06) as u32);
    let max_overlap = 60.max((h as f64 * 0.34) as u32).min(h.saturating_sub(1));

    let mut best: Option<(u32, f64)> = None;
    let mut overlap = min_overlap;
    while overlap <= max_overlap {
        let top_strip = image::imageops::crop_imm(
            &top_gray,
            0,
            top_gray.height() - overlap,
            top_gray.width(),
            overlap,
        )
        .to_image();
        let bottom_strip =
            image::imageops::crop_imm(&bottom_gray, 0, 0, bottom_gray.width(), overlap).to_image();
        let mae = imgops::mean_abs_diff(&top_strip, &bottom_strip);
        if best.map(|(_, b)| mae < b).unwrap_or(true) {
            best = Some((overlap, mae));
        }
        overlap += 2;
    }

    match best {
        Some((overlap, mae)) if mae <= MERGE_MAE_LIMIT => {
            logger.log(&format!(
                "sheet merge accepted (overlap {overlap}, mae {mae:.1})"
            ));
            blend_overlap(&top, &bottom, overlap)
        }
        _ => append_with_separator(&top, &bottom),
    }
}

fn blend_overlap(top: &RgbImage, bottom: &RgbImage, overlap: u32) -> RgbImage {
    let width = top.width();
    let top_h = top.height();
    let bottom_h = bottom.height();
    let overlap = overlap.min(top_h.saturating_sub(1)).min(bottom_h);
    let out_h = top_h - overlap + bottom_h;
    let mut out = RgbImage::from_pixel(width, out_h, Rgb([255, 255, 255]));

    for y in 0..(top_h - overlap) {
        for x in 0..width {
            out.put_pixel(x, y, *top.get_pixel(x, y));
        }
    }
    for row in 0..overlap {
        let alpha = if overlap <= 1 {
            0.0
        } else {
            1.0 - row as f64 / (overlap - 1) as f64
        };
        for x in 0..width {
            let pt = top.get_pixel(x, top_h - overlap + row);
            let pb = bottom.get_pixel(x, row);
            let mut pixel = [0u8; 3];
            for c in 0..3 {
                let value = alpha * pt[c] as f64 + (1.0 - alpha) * pb[c] as f64;
                pixel[c] = value.round().clamp(0.0, 255.0) as u8;
            }
            out.put_pixel(x, top_h - overlap + row, Rgb(pixel));
        }
    }
    for y in overlap..bottom_h {
        for x in 0..width {
            out.put_pixel(x, top_h - overlap + y, *bottom.get_pixel(x, y));
        }
    }
    out
}

fn append_with_separator(top: &RgbImage, bottom: &RgbImage) -> RgbImage {
    let width = top.width();
    let out_h = top.height() + SEPARATOR_ROWS + bottom.height();
    let mut out = RgbImage::from_pixel(width, out_h, Rgb([255, 255, 255]));
    image::imageops::overlay(&mut out, top, 0, 0);
    image::imageops::overlay(&mut out, bottom, 0, (top.height() + SEPARATOR_ROWS) as i64);
    out
}

/// Frame a page slice as a printed page: side and top/bottom margins, then
/// extend downward until the aspect matches the page ratio. Content is
/// never cropped and short pages stay aligned to the top.
pub fn frame_as_printed_page(image: &RgbImage, page_ratio: f64) -> RgbImage {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return image.clone();
    }

    let margin_x = 10.max((w as f64 * 0.015) as u32);
    let margin_top = 14.max((h as f64 * 0.026) as u32);
    let margin_bottom = 24.max((h as f64 * 0.056) as u32);

    let base_w = w + margin_x * 2;
    let base_h = h + margin_top + margin_bottom;
    let ratio = page_ratio.max(0.2);

    let canvas_h = if (base_w as f64) / (base_h as f64) > ratio {
        ((base_w as f64) / ratio).round() as u32
    } else {
        base_h
    };

    let mut canvas = RgbImage::from_pixel(base_w, canvas_h.max(base_h), Rgb([255, 255, 255]));
    image::imageops::overlay(&mut canvas, image, margin_x as i64, margin_top as i64);
    canvas
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NullLogger;

    fn scored_sheet(w: u32, h: u32, phase: u32) -> RgbImage {
        let mut img = RgbImage::from_pixel(w, h, Rgb([200, 200, 196]));
        for y in 0..h {
            if (y + phase) % 40 < 4 {
                for x in 10..w.saturating_sub(10) {
                    img.put_pixel(x, y, Rgb([60, 60, 60]));
                }
            }
        }
        img
    }

    #[test]
    fn test_normalize_stretches_contrast() {
        let img = scored_sheet(300, 200, 0);
        let out = normalize_score_tone(&img);
        let gray = imgops::to_gray(&out);
        let max = gray.pixels().map(|p| p[0]).max().unwrap();
        assert!(max > 240, "paper should stretch toward white, got {max}");
        assert_eq!(out.dimensions(), (300, 200));
    }

    #[test]
    fn test_near_identical_inputs_collapse() {
        let a = scored_sheet(300, 200, 0);
        let outcome = finalize_sheet_pages(
            &[a.clone(), a.clone(), a],
            FillMode::Performance,
            PORTRAIT_PAGE_RATIO,
            &NullLogger,
        );
        assert_eq!(outcome.pages.len(), 1);
        assert!(outcome.complete_sheet.is_none(), "one contributor only");
    }

    #[test]
    fn test_unrelated_sheets_get_separator() {
        let a = scored_sheet(300, 200, 0);
        let b = scored_sheet(300, 200, 21);
        let merged = merge_two_sheets(&a, &b, &NullLogger);
        // Either a blended overlap or a separator append is acceptable,
        // but the merged sheet must contain both contributions.
        assert!(merged.height() >= 260);
    }

    #[test]
    fn test_complete_sheet_present_with_two_contributors() {
        let a = scored_sheet(300, 300, 0);
        let b = scored_sheet(300, 300, 23);
        let outcome = finalize_sheet_pages(
            &[a, b],
            FillMode::Performance,
            PORTRAIT_PAGE_RATIO,
            &NullLogger,
        );
        assert!(outcome.complete_sheet.is_some());
        assert!(!outcome.pages.is_empty());
    }

    #[test]
    fn test_printed_page_reaches_portrait_ratio() {
        let wide = RgbImage::from_pixel(1000, 300, Rgb([255, 255, 255]));
        let page = frame_as_printed_page(&wide, PORTRAIT_PAGE_RATIO);
        let ratio = page.width() as f64 / page.height() as f64;
        assert!(
            ratio <= PORTRAIT_PAGE_RATIO + 0.01,
            "ratio {ratio} still wider than portrait"
        );
    }

    #[test]
    fn test_printed_page_keeps_content_at_top() {
        let mut content = RgbImage::from_pixel(400, 100, Rgb([255, 255, 255]));
        for x in 0..400 {
            content.put_pixel(x, 0, Rgb([0, 0, 0]));
        }
        let page = frame_as_printed_page(&content, PORTRAIT_PAGE_RATIO);
        // The dark stripe must sit at the top margin, not centered.
        let margin_top = 14.max((100.0 * 0.026) as u32);
        assert_eq!(page.get_pixel(200, margin_top)[0], 0);
        assert!(page.height() > page.width());
    }

    #[test]
    fn test_tall_merged_sheet_gets_split() {
        // Stack many distinct sheets so the merged image is tall.
        let sheets: Vec<RgbImage> = (0..8).map(|i| scored_sheet(800, 400, i * 7 + 3)).collect();
        let outcome = finalize_sheet_pages(
            &sheets,
            FillMode::Performance,
            PORTRAIT_PAGE_RATIO,
            &NullLogger,
        );
        assert!(outcome.pages.len() >= 2, "tall sheet should paginate");
        for page in &outcome.pages {
            let ratio = page.width() as f64 / page.height() as f64;
            assert!(ratio <= PORTRAIT_PAGE_RATIO + 0.05);
        }
    }
}
