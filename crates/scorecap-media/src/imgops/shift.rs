//! Vertical shift estimation between consecutive frames.
//!
//! Two estimators over row-mean brightness profiles: a direct normalized
//! cross-correlation scan, and a phase-correlation pass. The stitcher
//! prefers phase when it is clearly more confident.

use image::GrayImage;
use rustfft::{num_complex::Complex, FftPlanner};

/// A vertical shift candidate with its confidence in [0, 1].
///
/// Positive shift means the content scrolled upward: row `i` of the next
/// frame matches row `i + shift` of the previous frame.
#[derive(Debug, Clone, Copy)]
pub struct ShiftEstimate {
    pub shift: i32,
    pub confidence: f64,
}

/// Fraction of central columns used for row profiles.
pub const PROFILE_COLUMN_FRACTION: f64 = 0.84;

/// Row-mean brightness profile over the central columns.
pub fn row_profile(gray: &GrayImage, column_fraction: f64) -> Vec<f32> {
    let (w, h) = gray.dimensions();
    let mut out = vec![0.0f32; h as usize];
    if w == 0 || h == 0 {
        return out;
    }
    let fraction = column_fraction.clamp(0.05, 1.0);
    let span = ((w as f64 * fraction).round() as u32).clamp(1, w);
    let x0 = (w - span) / 2;
    for y in 0..h {
        let mut sum = 0u64;
        for x in x0..(x0 + span) {
            sum += gray.get_pixel(x, y)[0] as u64;
        }
        out[y as usize] = sum as f32 / span as f32;
    }
    out
}

fn zero_mean(profile: &[f32]) -> Vec<f64> {
    let mean = profile.iter().map(|&v| v as f64).sum::<f64>() / profile.len().max(1) as f64;
    profile.iter().map(|&v| v as f64 - mean).collect()
}

/// Direct normalized cross-correlation over lags in `[-max_lag, max_lag]`.
pub fn estimate_shift_correlation(prev: &[f32], next: &[f32], max_lag: usize) -> ShiftEstimate {
    let n = prev.len().min(next.len());
    if n < 8 {
        return ShiftEstimate {
            shift: 0,
            confidence: 0.0,
        };
    }
    let a = zero_mean(&prev[..n]);
    let b = zero_mean(&next[..n]);
    let max_lag = max_lag.min(n - 4) as i64;

    let mut best_lag = 0i64;
    let mut best_corr = f64::NEG_INFINITY;
    for lag in -max_lag..=max_lag {
        let mut dot = 0.0;
        let mut norm_a = 0.0;
        let mut norm_b = 0.0;
        let mut count = 0usize;
        for i in 0..n as i64 {
            let j = i + lag;
            if j < 0 || j >= n as i64 {
                continue;
            }
            let va = a[j as usize];
            let vb = b[i as usize];
            dot += va * vb;
            norm_a += va * va;
            norm_b += vb * vb;
            count += 1;
        }
        if count < 4 {
            continue;
        }
        let denom = (norm_a * norm_b).sqrt();
        let corr = if denom > 1e-9 { dot / denom } else { 0.0 };
        if corr > best_corr {
            best_corr = corr;
            best_lag = lag;
        }
    }

    ShiftEstimate {
        shift: best_lag as i32,
        confidence: best_corr.clamp(0.0, 1.0),
    }
}

/// Phase correlation over zero-padded FFTs.
pub fn estimate_shift_phase(prev: &[f32], next: &[f32]) -> ShiftEstimate {
    let n = prev.len().min(next.len());
    if n < 8 {
        return ShiftEstimate {
            shift: 0,
            confidence: 0.0,
        };
    }
    let a = zero_mean(&prev[..n]);
    let b = zero_mean(&next[..n]);
    let fft_len = (2 * n).next_power_of_two();

    let mut planner = FftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(fft_len);
    let ifft = planner.plan_fft_inverse(fft_len);

    let mut fa: Vec<Complex<f64>> = a.iter().map(|&x| Complex::new(x, 0.0)).collect();
    fa.resize(fft_len, Complex::new(0.0, 0.0));
    let mut fb: Vec<Complex<f64>> = b.iter().map(|&x| Complex::new(x, 0.0)).collect();
    fb.resize(fft_len, Complex::new(0.0, 0.0));

    fft.process(&mut fa);
    fft.process(&mut fb);

    // Cross-power spectrum with unit magnitude (pure phase).
    let mut g: Vec<Complex<f64>> = fa
        .iter()
        .zip(fb.iter())
        .map(|(pa, pb)| {
            let cross = pa.conj() * pb;
            let mag = cross.norm() + 1e-12;
            cross / mag
        })
        .collect();
    ifft.process(&mut g);

    let scale = 1.0 / fft_len as f64;
    let mut best_idx = 0usize;
    let mut best_value = f64::NEG_INFINITY;
    for (idx, value) in g.iter().enumerate() {
        let re = value.re * scale;
        if re > best_value {
            best_value = re;
            best_idx = idx;
        }
    }

    let lag = if best_idx <= fft_len / 2 {
        best_idx as i64
    } else {
        best_idx as i64 - fft_len as i64
    };
    // Cap to a plausible frame shift.
    let lag = lag.clamp(-(n as i64) + 1, n as i64 - 1);

    ShiftEstimate {
        shift: lag as i32,
        confidence: best_value.clamp(0.0, 1.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    /// Smooth pseudo-random profile: sum of a few sinusoids plus noise.
    fn synthetic_profile(len: usize, seed_phase: f64) -> Vec<f32> {
        (0..len)
            .map(|i| {
                let t = i as f64;
                let v = 120.0
                    + 50.0 * (t / 17.0 + seed_phase).sin()
                    + 30.0 * (t / 41.0 + 2.0 * seed_phase).cos()
                    + 15.0 * (t / 7.0).sin();
                v as f32
            })
            .collect()
    }

    fn shifted(profile: &[f32], shift: usize) -> Vec<f32> {
        // next[i] = prev[i + shift], tail repeats the last value.
        let n = profile.len();
        (0..n)
            .map(|i| profile[(i + shift).min(n - 1)])
            .collect()
    }

    #[test]
    fn test_correlation_recovers_known_shift() {
        let prev = synthetic_profile(720, 0.3);
        for shift in [0usize, 5, 23, 60] {
            let next = shifted(&prev, shift);
            let estimate = estimate_shift_correlation(&prev, &next, 120);
            assert!(
                (estimate.shift - shift as i32).abs() <= 1,
                "shift {shift} estimated as {}",
                estimate.shift
            );
            assert!(estimate.confidence > 0.8);
        }
    }

    #[test]
    fn test_phase_recovers_known_shift() {
        let prev = synthetic_profile(720, 1.1);
        for shift in [4usize, 31, 90] {
            let next = shifted(&prev, shift);
            let estimate = estimate_shift_phase(&prev, &next);
            assert!(
                (estimate.shift - shift as i32).abs() <= 2,
                "shift {shift} estimated as {}",
                estimate.shift
            );
        }
    }

    #[test]
    fn test_random_small_translations_fuzz() {
        let mut rng = rand::rng();
        let prev = synthetic_profile(500, 2.2);
        for _ in 0..16 {
            let shift: usize = rng.random_range(0..40);
            let next = shifted(&prev, shift);
            let estimate = estimate_shift_correlation(&prev, &next, 80);
            assert!((estimate.shift - shift as i32).abs() <= 2);
        }
    }

    #[test]
    fn test_flat_profile_has_low_confidence() {
        let flat = vec![128.0f32; 300];
        let estimate = estimate_shift_correlation(&flat, &flat, 60);
        assert!(estimate.confidence <= 0.5);
    }

    #[test]
    fn test_row_profile_central_columns() {
        let mut img = GrayImage::from_pixel(100, 10, image::Luma([0]));
        // Bright edges outside the central window must not dominate.
        for y in 0..10 {
            img.put_pixel(0, y, image::Luma([255]));
            img.put_pixel(99, y, image::Luma([255]));
        }
        let profile = row_profile(&img, 0.84);
        assert!(profile[0] < 10.0);
    }
}
