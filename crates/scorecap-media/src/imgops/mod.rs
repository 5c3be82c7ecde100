//! Shared pixel operations for the pipeline stages.
//!
//! Everything here operates on `image` buffers; stage-specific logic lives
//! with the stages. Binary images use 255 for foreground, 0 for background.

pub mod hash;
pub mod shift;
pub mod tone;

use std::path::Path;

use image::imageops::FilterType;
use image::{GrayImage, Luma, RgbImage};

use crate::error::{MediaError, MediaResult};

/// Comparison working size: frames are shrunk to fit this box before
/// temporal diffs so thresholds stay resolution-independent.
pub const DIFF_MAX_W: u32 = 1600;
pub const DIFF_MAX_H: u32 = 900;

/// Load an image as RGB.
pub fn load_rgb(path: impl AsRef<Path>) -> MediaResult<RgbImage> {
    let path = path.as_ref();
    let img = image::open(path).map_err(|e| MediaError::image_decode(path, e))?;
    Ok(img.to_rgb8())
}

/// Save an RGB image as PNG.
pub fn save_png(img: &RgbImage, path: impl AsRef<Path>) -> MediaResult<()> {
    let path = path.as_ref();
    img.save(path).map_err(|e| MediaError::image_encode(path, e))
}

/// Save an RGB image as JPEG with the given quality.
pub fn save_jpg(img: &RgbImage, path: impl AsRef<Path>, quality: u8) -> MediaResult<()> {
    let path = path.as_ref();
    let file = std::fs::File::create(path)?;
    let mut writer = std::io::BufWriter::new(file);
    let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut writer, quality);
    encoder
        .encode(img.as_raw(), img.width(), img.height(), image::ColorType::Rgb8)
        .map_err(|e| MediaError::image_encode(path, e))
}

/// Encode an RGB image to an in-memory JPEG buffer.
pub fn encode_jpg_buffer(img: &RgbImage, quality: u8) -> MediaResult<Vec<u8>> {
    let mut buf = Vec::new();
    let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, quality);
    encoder
        .encode(img.as_raw(), img.width(), img.height(), image::ColorType::Rgb8)
        .map_err(|e| MediaError::internal(format!("jpeg encode: {e}")))?;
    Ok(buf)
}

/// Grayscale conversion.
pub fn to_gray(img: &RgbImage) -> GrayImage {
    image::imageops::grayscale(img)
}

/// Resize an RGB image.
pub fn resize_rgb(img: &RgbImage, w: u32, h: u32, filter: FilterType) -> RgbImage {
    image::imageops::resize(img, w.max(1), h.max(1), filter)
}

/// Resize a grayscale image.
pub fn resize_gray(img: &GrayImage, w: u32, h: u32, filter: FilterType) -> GrayImage {
    image::imageops::resize(img, w.max(1), h.max(1), filter)
}

/// Common comparison size for two frames, capped at the diff working box.
pub fn diff_size(a: (u32, u32), b: (u32, u32)) -> (u32, u32) {
    let w = a.0.min(b.0).min(DIFF_MAX_W).max(1);
    let h = a.1.min(b.1).min(DIFF_MAX_H).max(1);
    (w, h)
}

/// Blurred grayscale copies of two frames at a common comparison size.
pub fn prepared_diff_pair(a: &RgbImage, b: &RgbImage) -> (GrayImage, GrayImage) {
    let (w, h) = diff_size(a.dimensions(), b.dimensions());
    let ga = imageproc::filter::gaussian_blur_f32(
        &to_gray(&resize_rgb(a, w, h, FilterType::Triangle)),
        0.8,
    );
    let gb = imageproc::filter::gaussian_blur_f32(
        &to_gray(&resize_rgb(b, w, h, FilterType::Triangle)),
        0.8,
    );
    (ga, gb)
}

/// Binary mask of pixels whose absolute difference exceeds `threshold`.
pub fn changed_mask(a: &GrayImage, b: &GrayImage, threshold: u8) -> GrayImage {
    let (w, h) = a.dimensions();
    let mut mask = GrayImage::new(w, h);
    for (pa, (pb, pm)) in a
        .pixels()
        .zip(b.pixels().zip(mask.pixels_mut()))
    {
        let diff = (pa[0] as i16 - pb[0] as i16).unsigned_abs() as u8;
        pm[0] = if diff > threshold { 255 } else { 0 };
    }
    mask
}

/// Fraction of foreground pixels in a binary mask.
pub fn foreground_ratio(mask: &GrayImage) -> f64 {
    let total = (mask.width() as u64 * mask.height() as u64).max(1);
    let set = mask.pixels().filter(|p| p[0] > 0).count() as u64;
    set as f64 / total as f64
}

/// Mean absolute difference between two equally sized grayscale images.
pub fn mean_abs_diff(a: &GrayImage, b: &GrayImage) -> f64 {
    let n = (a.width() as u64 * a.height() as u64).max(1);
    let sum: u64 = a
        .pixels()
        .zip(b.pixels())
        .map(|(pa, pb)| (pa[0] as i16 - pb[0] as i16).unsigned_abs() as u64)
        .sum();
    sum as f64 / n as f64
}

/// XOR foreground ratio between two binary images.
pub fn xor_ratio(a: &GrayImage, b: &GrayImage) -> f64 {
    let total = (a.width() as u64 * a.height() as u64).max(1);
    let set = a
        .pixels()
        .zip(b.pixels())
        .filter(|(pa, pb)| (pa[0] > 0) != (pb[0] > 0))
        .count() as u64;
    set as f64 / total as f64
}

/// Inverted adaptive threshold: foreground where a pixel is darker than its
/// local box mean by more than `delta`.
pub fn adaptive_inverse(gray: &GrayImage, block: u32, delta: f64) -> GrayImage {
    let (w, h) = gray.dimensions();
    let mut out = GrayImage::new(w, h);
    if w == 0 || h == 0 {
        return out;
    }
    let radius = (block.max(3) / 2) as i64;

    // Summed-area table with a leading zero row/column.
    let stride = (w + 1) as usize;
    let mut integral = vec![0u64; stride * (h + 1) as usize];
    for y in 0..h as usize {
        let mut row_sum = 0u64;
        for x in 0..w as usize {
            row_sum += gray.get_pixel(x as u32, y as u32)[0] as u64;
            integral[(y + 1) * stride + (x + 1)] = integral[y * stride + (x + 1)] + row_sum;
        }
    }

    for y in 0..h as i64 {
        for x in 0..w as i64 {
            let x0 = (x - radius).max(0) as usize;
            let y0 = (y - radius).max(0) as usize;
            let x1 = ((x + radius + 1).min(w as i64)) as usize;
            let y1 = ((y + radius + 1).min(h as i64)) as usize;
            let count = ((x1 - x0) * (y1 - y0)) as f64;
            let sum = integral[y1 * stride + x1] + integral[y0 * stride + x0]
                - integral[y0 * stride + x1]
                - integral[y1 * stride + x0];
            let mean = sum as f64 / count;
            let value = gray.get_pixel(x as u32, y as u32)[0] as f64;
            out.put_pixel(
                x as u32,
                y as u32,
                Luma([if value <= mean - delta { 255 } else { 0 }]),
            );
        }
    }
    out
}

/// Rectangular-kernel morphology on binary images.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MorphOp {
    Dilate,
    Erode,
}

fn morph_pass(img: &GrayImage, kw: u32, kh: u32, op: MorphOp) -> GrayImage {
    let (w, h) = img.dimensions();
    let mut out = img.clone();
    let rx = (kw.max(1) / 2) as i64;
    let ry = (kh.max(1) / 2) as i64;
    let pick = |hit: bool| -> u8 {
        match (op, hit) {
            (MorphOp::Dilate, true) => 255,
            (MorphOp::Dilate, false) => 0,
            (MorphOp::Erode, true) => 0,
            (MorphOp::Erode, false) => 255,
        }
    };
    let target = match op {
        MorphOp::Dilate => 255u8,
        MorphOp::Erode => 0u8,
    };

    // Horizontal pass.
    let mut tmp = GrayImage::new(w, h);
    for y in 0..h as i64 {
        for x in 0..w as i64 {
            let mut hit = false;
            for dx in -rx..=(kw as i64 - 1 - rx) {
                let xx = x + dx;
                if xx >= 0 && xx < w as i64 && img.get_pixel(xx as u32, y as u32)[0] == target {
                    hit = true;
                    break;
                }
            }
            tmp.put_pixel(x as u32, y as u32, Luma([pick(hit)]));
        }
    }
    // Vertical pass.
    for y in 0..h as i64 {
        for x in 0..w as i64 {
            let mut hit = false;
            for dy in -ry..=(kh as i64 - 1 - ry) {
                let yy = y + dy;
                if yy >= 0 && yy < h as i64 && tmp.get_pixel(x as u32, yy as u32)[0] == target {
                    hit = true;
                    break;
                }
            }
            out.put_pixel(x as u32, y as u32, Luma([pick(hit)]));
        }
    }
    out
}

/// Dilate with a `kw` x `kh` rectangle.
pub fn dilate_rect(img: &GrayImage, kw: u32, kh: u32) -> GrayImage {
    morph_pass(img, kw, kh, MorphOp::Dilate)
}

/// Erode with a `kw` x `kh` rectangle.
pub fn erode_rect(img: &GrayImage, kw: u32, kh: u32) -> GrayImage {
    morph_pass(img, kw, kh, MorphOp::Erode)
}

/// Morphological open (erode then dilate).
pub fn open_rect(img: &GrayImage, kw: u32, kh: u32) -> GrayImage {
    dilate_rect(&erode_rect(img, kw, kh), kw, kh)
}

/// Morphological close (dilate then erode).
pub fn close_rect(img: &GrayImage, kw: u32, kh: u32) -> GrayImage {
    erode_rect(&dilate_rect(img, kw, kh), kw, kh)
}

/// Per-row foreground density of a binary image: count / width.
pub fn row_density(bin: &GrayImage) -> Vec<f32> {
    let (w, h) = bin.dimensions();
    let mut out = vec![0.0f32; h as usize];
    if w == 0 {
        return out;
    }
    for y in 0..h {
        let mut count = 0u32;
        for x in 0..w {
            if bin.get_pixel(x, y)[0] > 0 {
                count += 1;
            }
        }
        out[y as usize] = count as f32 / w as f32;
    }
    out
}

/// Per-column foreground density of a binary image: count / height.
pub fn col_density(bin: &GrayImage) -> Vec<f32> {
    let (w, h) = bin.dimensions();
    let mut out = vec![0.0f32; w as usize];
    if h == 0 {
        return out;
    }
    for x in 0..w {
        let mut count = 0u32;
        for y in 0..h {
            if bin.get_pixel(x, y)[0] > 0 {
                count += 1;
            }
        }
        out[x as usize] = count as f32 / h as f32;
    }
    out
}

/// The `p`-th percentile (0..=100) of a sample, by nearest-rank.
pub fn percentile(values: &[f32], p: f64) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let rank = ((p / 100.0) * (sorted.len() - 1) as f64).round() as usize;
    sorted[rank.min(sorted.len() - 1)]
}

/// Saturating per-pixel weighted sum `alpha * a + beta * b + gamma`.
pub fn weighted_add_gray(a: &GrayImage, alpha: f64, b: &GrayImage, beta: f64, gamma: f64) -> GrayImage {
    let (w, h) = a.dimensions();
    let mut out = GrayImage::new(w, h);
    for ((pa, pb), po) in a.pixels().zip(b.pixels()).zip(out.pixels_mut()) {
        let value = alpha * pa[0] as f64 + beta * pb[0] as f64 + gamma;
        po[0] = value.round().clamp(0.0, 255.0) as u8;
    }
    out
}

/// Pad an RGB image to `target_w` with white columns, centered.
pub fn pad_to_width(img: &RgbImage, target_w: u32) -> RgbImage {
    let (w, h) = img.dimensions();
    if w >= target_w {
        return img.clone();
    }
    let mut out = RgbImage::from_pixel(target_w, h, image::Rgb([255, 255, 255]));
    let offset = (target_w - w) / 2;
    image::imageops::overlay(&mut out, img, offset as i64, 0);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(w: u32, h: u32, v: u8) -> GrayImage {
        GrayImage::from_pixel(w, h, Luma([v]))
    }

    #[test]
    fn test_changed_mask_and_ratio() {
        let a = flat(10, 10, 100);
        let mut b = flat(10, 10, 100);
        for x in 0..10 {
            b.put_pixel(x, 0, Luma([200]));
        }
        let mask = changed_mask(&a, &b, 22);
        assert!((foreground_ratio(&mask) - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_identical_frames_have_zero_diff() {
        let a = flat(64, 64, 150);
        assert_eq!(mean_abs_diff(&a, &a), 0.0);
        let mask = changed_mask(&a, &a, 22);
        assert_eq!(foreground_ratio(&mask), 0.0);
    }

    #[test]
    fn test_adaptive_inverse_marks_dark_content() {
        // White page with one dark stroke.
        let mut img = flat(64, 64, 230);
        for x in 10..54 {
            img.put_pixel(x, 32, Luma([20]));
        }
        let inv = adaptive_inverse(&img, 31, 7.0);
        assert!(inv.get_pixel(32, 32)[0] > 0, "stroke must be foreground");
        assert_eq!(inv.get_pixel(5, 5)[0], 0, "paper must stay background");
    }

    #[test]
    fn test_open_removes_speckle_keeps_blocks() {
        let mut img = flat(32, 32, 0);
        img.put_pixel(3, 3, Luma([255]));
        for y in 10..20 {
            for x in 10..20 {
                img.put_pixel(x, y, Luma([255]));
            }
        }
        let opened = open_rect(&img, 3, 3);
        assert_eq!(opened.get_pixel(3, 3)[0], 0, "speckle removed");
        assert_eq!(opened.get_pixel(15, 15)[0], 255, "block preserved");
    }

    #[test]
    fn test_row_density() {
        let mut img = flat(10, 4, 0);
        for x in 0..5 {
            img.put_pixel(x, 2, Luma([255]));
        }
        let density = row_density(&img);
        assert_eq!(density[2], 0.5);
        assert_eq!(density[0], 0.0);
    }

    #[test]
    fn test_percentile() {
        let values: Vec<f32> = (0..=100).map(|v| v as f32).collect();
        assert_eq!(percentile(&values, 0.0), 0.0);
        assert_eq!(percentile(&values, 50.0), 50.0);
        assert_eq!(percentile(&values, 100.0), 100.0);
    }

    #[test]
    fn test_pad_to_width_centers() {
        let img = RgbImage::from_pixel(10, 4, image::Rgb([0, 0, 0]));
        let padded = pad_to_width(&img, 20);
        assert_eq!(padded.dimensions(), (20, 4));
        assert_eq!(padded.get_pixel(0, 0)[0], 255);
        assert_eq!(padded.get_pixel(10, 0)[0], 0);
    }
}
