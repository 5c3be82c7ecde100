//! Temporal deduplication of rectified frames.
//!
//! Thresholds are tabulated per (layout x dedup level) and tolerate an
//! animated playhead in bottom-bar captures while rejecting scroll jitter.

use std::collections::VecDeque;

use image::{GrayImage, RgbImage};
use scorecap_models::{DedupLevel, LayoutMode};

use crate::imgops;
use crate::imgops::hash::{dhash64, hamming};
use crate::imgops::shift::{estimate_shift_correlation, row_profile, PROFILE_COLUMN_FRACTION};

/// Pixel-difference binarization threshold for the change mask.
const CHANGE_MASK_THRESHOLD: u8 = 22;

/// Kept-frame hash ring length for bottom_bar / page_turn dedup.
const HASH_RING_LEN: usize = 8;

/// Static and structural thresholds for a (layout, level) pair.
#[derive(Debug, Clone, Copy)]
pub struct DedupThresholds {
    pub static_threshold: f64,
    pub structure_threshold: f64,
    /// Present only for bottom_bar: the changed-ratio ceiling under which a
    /// playhead-shaped mask still counts as a duplicate.
    pub playhead_threshold: Option<f64>,
}

/// The tabulated threshold contract.
pub fn thresholds(layout: LayoutMode, level: DedupLevel) -> DedupThresholds {
    match layout {
        LayoutMode::BottomBar => DedupThresholds {
            static_threshold: level.pick(0.045, 0.028, 0.016),
            structure_threshold: level.pick(0.085, 0.062, 0.042),
            playhead_threshold: Some(level.pick(0.22, 0.14, 0.09)),
        },
        LayoutMode::PageTurn => DedupThresholds {
            static_threshold: level.pick(0.012, 0.008, 0.005),
            structure_threshold: level.pick(0.032, 0.024, 0.017),
            playhead_threshold: None,
        },
        LayoutMode::FullScroll => DedupThresholds {
            static_threshold: level.pick(0.026, 0.018, 0.012),
            structure_threshold: level.pick(0.052, 0.038, 0.026),
            playhead_threshold: None,
        },
    }
}

/// Minimum credible scroll distance in pixels for full-scroll captures.
pub fn min_scroll_shift(level: DedupLevel) -> i32 {
    level.pick(8.0, 5.0, 3.0) as i32
}

/// Hamming-distance gate for the kept-frame hash ring.
pub fn dhash_gate(layout: LayoutMode, level: DedupLevel) -> Option<u32> {
    match layout {
        LayoutMode::BottomBar => Some(level.pick(8.0, 6.0, 4.0) as u32),
        LayoutMode::PageTurn => Some(level.pick(3.0, 2.0, 1.0) as u32),
        LayoutMode::FullScroll => None,
    }
}

/// Stateful frame deduper; call [`FrameDeduper::should_drop`] against the
/// last kept frame in capture order.
pub struct FrameDeduper {
    layout: LayoutMode,
    level: DedupLevel,
    thresholds: DedupThresholds,
    hash_ring: VecDeque<u64>,
    scroll_direction: i32,
}

impl FrameDeduper {
    pub fn new(layout: LayoutMode, level: DedupLevel) -> Self {
        Self {
            layout,
            level,
            thresholds: thresholds(layout, level),
            hash_ring: VecDeque::new(),
            scroll_direction: 0,
        }
    }

    /// Record a kept frame (feeds the hash ring and scroll direction).
    pub fn record_kept(&mut self, kept: &RgbImage) {
        if dhash_gate(self.layout, self.level).is_some() {
            let gray = imgops::to_gray(kept);
            if self.hash_ring.len() >= HASH_RING_LEN {
                self.hash_ring.pop_front();
            }
            self.hash_ring.push_back(dhash64(&gray));
        }
    }

    /// Decide whether `current` is a near-duplicate of the last kept frame.
    pub fn should_drop(&mut self, last_kept: &RgbImage, current: &RgbImage) -> bool {
        let (prev_gray, cur_gray) = imgops::prepared_diff_pair(last_kept, current);
        let (w, h) = prev_gray.dimensions();
        if w <= 16 || h <= 16 {
            return false;
        }

        let mask = imgops::changed_mask(&prev_gray, &cur_gray, CHANGE_MASK_THRESHOLD);
        let changed_ratio = imgops::foreground_ratio(&mask);
        let structure_diff = structure_diff_ratio(&prev_gray, &cur_gray);

        if changed_ratio < self.thresholds.static_threshold {
            return true;
        }
        if structure_diff < self.thresholds.structure_threshold {
            return true;
        }
        if let Some(playhead_threshold) = self.thresholds.playhead_threshold {
            if changed_ratio < playhead_threshold && looks_like_moving_playhead(&mask) {
                return true;
            }
        }

        if self.layout == LayoutMode::FullScroll && self.is_scroll_jitter(&prev_gray, &cur_gray) {
            return true;
        }

        if let Some(gate) = dhash_gate(self.layout, self.level) {
            let hash = dhash64(&imgops::to_gray(current));
            let min_distance = self
                .hash_ring
                .iter()
                .map(|&kept| hamming(hash, kept))
                .min();
            if let Some(distance) = min_distance {
                if distance <= gate {
                    return true;
                }
            }
        }

        false
    }

    /// Reject frames whose estimated scroll is confidently too small, or a
    /// small move against the established scroll direction.
    fn is_scroll_jitter(&mut self, prev_gray: &GrayImage, cur_gray: &GrayImage) -> bool {
        let prev_profile = row_profile(prev_gray, PROFILE_COLUMN_FRACTION);
        let cur_profile = row_profile(cur_gray, PROFILE_COLUMN_FRACTION);
        let max_lag = (prev_profile.len() / 3).max(8);
        let estimate = estimate_shift_correlation(&prev_profile, &cur_profile, max_lag);
        let min_shift = min_scroll_shift(self.level);

        if estimate.confidence >= 0.34 && estimate.shift.abs() < min_shift {
            return true;
        }
        if self.scroll_direction != 0
            && estimate.shift.signum() == -self.scroll_direction
            && (estimate.shift.abs() as f64) < 1.8 * min_shift as f64
        {
            return true;
        }
        if estimate.confidence >= 0.34 && estimate.shift != 0 {
            self.scroll_direction = estimate.shift.signum();
        }
        false
    }
}

/// Structural XOR ratio: adaptive-inverse both frames, open with a 2x2
/// kernel, count disagreeing foreground pixels.
pub fn structure_diff_ratio(prev_gray: &GrayImage, cur_gray: &GrayImage) -> f64 {
    let prev_clean = imgops::open_rect(&imgops::adaptive_inverse(prev_gray, 31, 7.0), 2, 2);
    let cur_clean = imgops::open_rect(&imgops::adaptive_inverse(cur_gray, 31, 7.0), 2, 2);
    imgops::xor_ratio(&prev_clean, &cur_clean)
}

/// A change mask that looks like a moving playhead: a tight vertical column
/// of changes rather than new score content.
pub fn looks_like_moving_playhead(mask: &GrayImage) -> bool {
    let (w, h) = mask.dimensions();
    if w == 0 || h == 0 {
        return false;
    }

    let mut min_x = u32::MAX;
    let mut max_x = 0u32;
    let mut min_y = u32::MAX;
    let mut max_y = 0u32;
    let mut changed_total = 0u64;
    for (x, y, pixel) in mask.enumerate_pixels() {
        if pixel[0] > 0 {
            min_x = min_x.min(x);
            max_x = max_x.max(x);
            min_y = min_y.min(y);
            max_y = max_y.max(y);
            changed_total += 1;
        }
    }
    if changed_total == 0 {
        return false;
    }

    let box_w_ratio = (max_x - min_x + 1) as f64 / w as f64;
    let box_h_ratio = (max_y - min_y + 1) as f64 / h as f64;
    let changed_ratio = changed_total as f64 / (w as u64 * h as u64) as f64;
    if box_w_ratio <= 0.22 && box_h_ratio >= 0.42 && changed_ratio <= 0.25 {
        return true;
    }

    // Column-concentration check.
    let density = imgops::col_density(mask);
    let active: Vec<usize> = density
        .iter()
        .enumerate()
        .filter(|(_, &d)| d > 0.45)
        .map(|(i, _)| i)
        .collect();
    let (Some(&first), Some(&last)) = (active.first(), active.last()) else {
        return false;
    };
    let span = (last - first + 1) as u32;
    let max_span = 6.max((w as f64 * 0.16) as u32);
    if span > max_span {
        return false;
    }
    if box_h_ratio < 0.42 {
        return false;
    }

    let mut concentrated = 0u64;
    for &x in &active {
        for y in 0..h {
            if mask.get_pixel(x as u32, y)[0] > 0 {
                concentrated += 1;
            }
        }
    }
    concentrated as f64 / changed_total as f64 > 0.52
}
