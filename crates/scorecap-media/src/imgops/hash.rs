//! 64-bit perceptual difference hash.
//!
//! The frame is shrunk to 9x8 and one bit is emitted per adjacent-column
//! comparison, giving an 8x8 = 64-bit gradient signature that survives
//! re-encoding and small luminance drift.

use image::imageops::FilterType;
use image::GrayImage;

/// Difference hash of a grayscale frame.
pub fn dhash64(gray: &GrayImage) -> u64 {
    let tiny = image::imageops::resize(gray, 9, 8, FilterType::Triangle);
    let mut hash = 0u64;
    let mut bit = 0u32;
    for y in 0..8 {
        for x in 0..8 {
            if tiny.get_pixel(x, y)[0] < tiny.get_pixel(x + 1, y)[0] {
                hash |= 1u64 << bit;
            }
            bit += 1;
        }
    }
    hash
}

/// Hamming distance between two hashes.
pub fn hamming(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    /// A synthetic score-like page: white paper, horizontal staff lines,
    /// periodic dark note heads.
    fn score_like_image(w: u32, h: u32, shift_x: u32) -> GrayImage {
        let mut img = GrayImage::from_pixel(w, h, Luma([245]));
        for staff in 0..6 {
            let y0 = h * (staff + 1) / 8;
            for line in 0..5 {
                let y = y0 + line * 8;
                if y >= h {
                    continue;
                }
                for x in 0..w {
                    img.put_pixel(x, y, Luma([40]));
                }
            }
            for note in 0..24 {
                let x = (note * w / 24 + shift_x) % w;
                let y = y0 + (note % 5) * 8;
                for dy in 0..5u32 {
                    for dx in 0..7u32 {
                        let px = (x + dx).min(w - 1);
                        let py = (y + dy).min(h - 1);
                        img.put_pixel(px, py, Luma([20]));
                    }
                }
            }
        }
        img
    }

    #[test]
    fn test_dhash_reflexive() {
        let img = score_like_image(2000, 1200, 0);
        assert_eq!(hamming(dhash64(&img), dhash64(&img)), 0);
    }

    #[test]
    fn test_dhash_tolerates_one_pixel_shift() {
        let a = score_like_image(2000, 1200, 0);
        let b = score_like_image(2000, 1200, 1);
        assert!(hamming(dhash64(&a), dhash64(&b)) <= 8);
    }

    #[test]
    fn test_dhash_separates_different_pages() {
        let a = score_like_image(2000, 1200, 0);
        let b = score_like_image(2000, 1200, 700);
        assert!(hamming(dhash64(&a), dhash64(&b)) > 0);
    }
}
