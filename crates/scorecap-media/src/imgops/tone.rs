//! Lab-space tone operations: CLAHE and unsharp masking.

use image::{GrayImage, Luma, Rgb, RgbImage};

/// Lab planes of an RGB image, stored 8-bit the OpenCV way:
/// L in [0, 255] (scaled from [0, 100]), a and b offset by 128.
pub struct LabPlanes {
    pub l: GrayImage,
    pub a: GrayImage,
    pub b: GrayImage,
}

fn srgb_to_linear(c: u8) -> f64 {
    let c = c as f64 / 255.0;
    if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

fn linear_to_srgb(c: f64) -> u8 {
    let c = c.clamp(0.0, 1.0);
    let v = if c <= 0.0031308 {
        c * 12.92
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    };
    (v * 255.0).round().clamp(0.0, 255.0) as u8
}

fn lab_f(t: f64) -> f64 {
    const EPSILON: f64 = 0.008856;
    const KAPPA: f64 = 903.3;
    if t > EPSILON {
        t.cbrt()
    } else {
        (KAPPA * t + 16.0) / 116.0
    }
}

fn lab_f_inv(t: f64) -> f64 {
    let cubed = t * t * t;
    if cubed > 0.008856 {
        cubed
    } else {
        (116.0 * t - 16.0) / 903.3
    }
}

// D65 reference white.
const WHITE: (f64, f64, f64) = (0.95047, 1.0, 1.08883);

fn rgb_to_lab(pixel: &Rgb<u8>) -> (f64, f64, f64) {
    let r = srgb_to_linear(pixel[0]);
    let g = srgb_to_linear(pixel[1]);
    let b = srgb_to_linear(pixel[2]);

    let x = (0.4124564 * r + 0.3575761 * g + 0.1804375 * b) / WHITE.0;
    let y = (0.2126729 * r + 0.7151522 * g + 0.0721750 * b) / WHITE.1;
    let z = (0.0193339 * r + 0.1191920 * g + 0.9503041 * b) / WHITE.2;

    let fx = lab_f(x);
    let fy = lab_f(y);
    let fz = lab_f(z);

    let l = 116.0 * fy - 16.0;
    let a = 500.0 * (fx - fy);
    let b = 200.0 * (fy - fz);
    (l, a, b)
}

fn lab_to_rgb(l: f64, a: f64, b: f64) -> Rgb<u8> {
    let fy = (l + 16.0) / 116.0;
    let fx = fy + a / 500.0;
    let fz = fy - b / 200.0;

    let x = lab_f_inv(fx) * WHITE.0;
    let y = if l > 8.0 {
        ((l + 16.0) / 116.0).powi(3) * WHITE.1
    } else {
        l / 903.3 * WHITE.1
    };
    let z = lab_f_inv(fz) * WHITE.2;

    let r = 3.2404542 * x - 1.5371385 * y - 0.4985314 * z;
    let g = -0.9692660 * x + 1.8760108 * y + 0.0415560 * z;
    let bb = 0.0556434 * x - 0.2040259 * y + 1.0572252 * z;
    Rgb([linear_to_srgb(r), linear_to_srgb(g), linear_to_srgb(bb)])
}

/// Split into 8-bit Lab planes.
pub fn split_lab(img: &RgbImage) -> LabPlanes {
    let (w, h) = img.dimensions();
    let mut l_plane = GrayImage::new(w, h);
    let mut a_plane = GrayImage::new(w, h);
    let mut b_plane = GrayImage::new(w, h);
    for (x, y, pixel) in img.enumerate_pixels() {
        let (l, a, b) = rgb_to_lab(pixel);
        l_plane.put_pixel(x, y, Luma([(l * 255.0 / 100.0).round().clamp(0.0, 255.0) as u8]));
        a_plane.put_pixel(x, y, Luma([(a + 128.0).round().clamp(0.0, 255.0) as u8]));
        b_plane.put_pixel(x, y, Luma([(b + 128.0).round().clamp(0.0, 255.0) as u8]));
    }
    LabPlanes {
        l: l_plane,
        a: a_plane,
        b: b_plane,
    }
}

/// Recombine 8-bit Lab planes into RGB.
pub fn merge_lab(planes: &LabPlanes) -> RgbImage {
    let (w, h) = planes.l.dimensions();
    let mut out = RgbImage::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let l = planes.l.get_pixel(x, y)[0] as f64 * 100.0 / 255.0;
            let a = planes.a.get_pixel(x, y)[0] as f64 - 128.0;
            let b = planes.b.get_pixel(x, y)[0] as f64 - 128.0;
            out.put_pixel(x, y, lab_to_rgb(l, a, b));
        }
    }
    out
}

/// Contrast-limited adaptive histogram equalization on one 8-bit plane.
///
/// Tile mappings are clipped at `clip_limit` times the uniform bin height
/// and pixels interpolate bilinearly between the four surrounding tiles.
pub fn clahe(plane: &GrayImage, clip_limit: f64, tiles_x: u32, tiles_y: u32) -> GrayImage {
    let (w, h) = plane.dimensions();
    if w < tiles_x || h < tiles_y || tiles_x == 0 || tiles_y == 0 {
        return plane.clone();
    }
    let tile_w = w.div_ceil(tiles_x);
    let tile_h = h.div_ceil(tiles_y);

    // Per-tile lookup tables.
    let mut luts = vec![[0u8; 256]; (tiles_x * tiles_y) as usize];
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let x0 = tx * tile_w;
            let y0 = ty * tile_h;
            let x1 = (x0 + tile_w).min(w);
            let y1 = (y0 + tile_h).min(h);
            let count = ((x1 - x0) * (y1 - y0)) as f64;

            let mut hist = [0u32; 256];
            for y in y0..y1 {
                for x in x0..x1 {
                    hist[plane.get_pixel(x, y)[0] as usize] += 1;
                }
            }

            // Clip and redistribute the excess uniformly.
            let limit = ((clip_limit * count / 256.0).max(1.0)) as u32;
            let mut excess = 0u32;
            for bin in hist.iter_mut() {
                if *bin > limit {
                    excess += *bin - limit;
                    *bin = limit;
                }
            }
            let bonus = excess / 256;
            for bin in hist.iter_mut() {
                *bin += bonus;
            }

            let lut = &mut luts[(ty * tiles_x + tx) as usize];
            let mut cumulative = 0u64;
            for (value, bin) in hist.iter().enumerate() {
                cumulative += *bin as u64;
                lut[value] = ((cumulative as f64 / count) * 255.0).round().clamp(0.0, 255.0) as u8;
            }
        }
    }

    // Bilinear interpolation between tile LUTs.
    let mut out = GrayImage::new(w, h);
    for y in 0..h {
        let fy = (y as f64 + 0.5) / tile_h as f64 - 0.5;
        let ty0 = fy.floor().clamp(0.0, (tiles_y - 1) as f64) as u32;
        let ty1 = (ty0 + 1).min(tiles_y - 1);
        let wy = (fy - ty0 as f64).clamp(0.0, 1.0);
        for x in 0..w {
            let fx = (x as f64 + 0.5) / tile_w as f64 - 0.5;
            let tx0 = fx.floor().clamp(0.0, (tiles_x - 1) as f64) as u32;
            let tx1 = (tx0 + 1).min(tiles_x - 1);
            let wx = (fx - tx0 as f64).clamp(0.0, 1.0);

            let value = plane.get_pixel(x, y)[0] as usize;
            let v00 = luts[(ty0 * tiles_x + tx0) as usize][value] as f64;
            let v01 = luts[(ty0 * tiles_x + tx1) as usize][value] as f64;
            let v10 = luts[(ty1 * tiles_x + tx0) as usize][value] as f64;
            let v11 = luts[(ty1 * tiles_x + tx1) as usize][value] as f64;
            let top = v00 * (1.0 - wx) + v01 * wx;
            let bottom = v10 * (1.0 - wx) + v11 * wx;
            let blended = top * (1.0 - wy) + bottom * wy;
            out.put_pixel(x, y, Luma([blended.round().clamp(0.0, 255.0) as u8]));
        }
    }
    out
}

/// Unsharp-mask one plane: `alpha * plane + beta * blur(plane, sigma)`.
pub fn unsharp_plane(plane: &GrayImage, alpha: f64, beta: f64, sigma: f32) -> GrayImage {
    let blurred = imageproc::filter::gaussian_blur_f32(plane, sigma);
    super::weighted_add_gray(plane, alpha, &blurred, beta, 0.0)
}

/// CLAHE on L followed by a gentle whole-image unsharp mask; the rectifier's
/// auto-enhance step.
pub fn enhance_sheet(img: &RgbImage) -> RgbImage {
    let mut planes = split_lab(img);
    planes.l = clahe(&planes.l, 2.0, 8, 8);
    let merged = merge_lab(&planes);

    // addWeighted(img, 1.6, blur, -0.6) applied per channel.
    let (w, h) = merged.dimensions();
    let blurred = image::imageops::blur(&merged, 1.2);
    let mut out = RgbImage::new(w, h);
    for ((po, pm), pb) in out.pixels_mut().zip(merged.pixels()).zip(blurred.pixels()) {
        for c in 0..3 {
            let value = 1.6 * pm[c] as f64 - 0.6 * pb[c] as f64;
            po[c] = value.round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}

/// Document unsharp applied after upscaling: L-channel only,
/// `1.45 * L - 0.45 * blur(L, 0.8)`.
pub fn sharpen_document(img: &RgbImage) -> RgbImage {
    if img.width().min(img.height()) < 80 {
        return img.clone();
    }
    let mut planes = split_lab(img);
    planes.l = unsharp_plane(&planes.l, 1.45, -0.45, 0.8);
    merge_lab(&planes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lab_round_trip_is_close() {
        for rgb in [[255u8, 255, 255], [0, 0, 0], [200, 60, 30], [128, 128, 128]] {
            let pixel = Rgb(rgb);
            let (l, a, b) = rgb_to_lab(&pixel);
            let back = lab_to_rgb(l, a, b);
            for c in 0..3 {
                assert!(
                    (back[c] as i16 - rgb[c] as i16).abs() <= 2,
                    "{rgb:?} -> {back:?}"
                );
            }
        }
    }

    #[test]
    fn test_clahe_spreads_low_contrast() {
        // Mid-gray page with faint texture.
        let mut img = GrayImage::from_pixel(128, 128, Luma([120]));
        for y in 0..128 {
            for x in 0..128 {
                if (x / 8 + y / 8) % 2 == 0 {
                    img.put_pixel(x, y, Luma([135]));
                }
            }
        }
        let out = clahe(&img, 2.0, 8, 8);
        let (min, max) = out
            .pixels()
            .fold((255u8, 0u8), |(lo, hi), p| (lo.min(p[0]), hi.max(p[0])));
        assert!(max - min > 30, "contrast should expand, got {min}..{max}");
    }

    #[test]
    fn test_sharpen_document_keeps_dimensions() {
        let img = RgbImage::from_pixel(100, 100, Rgb([180, 180, 180]));
        let out = sharpen_document(&img);
        assert_eq!(out.dimensions(), (100, 100));
    }

    #[test]
    fn test_sharpen_skips_tiny_images() {
        let img = RgbImage::from_pixel(32, 32, Rgb([10, 200, 40]));
        let out = sharpen_document(&img);
        assert_eq!(out, img);
    }
}
