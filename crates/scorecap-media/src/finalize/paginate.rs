//! Whitespace-aware pagination of the merged sheet.

use image::GrayImage;
use scorecap_models::FillMode;

use crate::imgops;

/// Target page height for a merged sheet of width `w`.
pub fn target_page_height(width: u32, page_ratio: f64) -> u32 {
    let ratio = page_ratio.max(0.2);
    ((width as f64 / ratio).round() as u32).clamp(900, 2600)
}

/// Per-mode packing limits, as multiples of the target height.
struct FillLimits {
    soft: f64,
    hard: f64,
    underfill: f64,
    min_page: f64,
    tail: f64,
    absorb: f64,
}

fn limits(mode: FillMode) -> FillLimits {
    match mode {
        FillMode::Performance => FillLimits {
            soft: 1.02,
            hard: 1.10,
            underfill: 0.90,
            min_page: 0.74,
            tail: 0.42,
            absorb: 1.18,
        },
        FillMode::Balanced => FillLimits {
            soft: 0.93,
            hard: 0.93,
            underfill: 0.0,
            min_page: 0.58,
            tail: 0.22,
            absorb: 1.08,
        },
    }
}

/// Foreground density per row of the merged sheet.
pub fn sheet_row_density(gray: &GrayImage) -> Vec<f32> {
    let inverse = imgops::adaptive_inverse(gray, 31, 7.0);
    imgops::row_density(&inverse)
}

/// The density level below which a row counts as whitespace.
pub fn blank_threshold(density: &[f32]) -> f32 {
    (imgops::percentile(density, 72.0) * 0.34).clamp(0.004, 0.03)
}

/// Contiguous active bands whose density exceeds the threshold.
pub fn active_bands(density: &[f32], threshold: f32, min_len: usize) -> Vec<(usize, usize)> {
    let mut bands = Vec::new();
    let mut start: Option<usize> = None;
    for (idx, &value) in density.iter().enumerate() {
        let active = value > threshold;
        match (active, start) {
            (true, None) => start = Some(idx),
            (false, Some(s)) => {
                if idx - s >= min_len {
                    bands.push((s, idx));
                }
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        if density.len() - s >= min_len {
            bands.push((s, density.len()));
        }
    }
    bands
}

/// Split a tall merged sheet into page row-ranges.
///
/// Active bands are packed greedily within the fill mode's limits; when no
/// bands exist or a packed page overshoots 1.32x target, that span falls
/// back to whitespace slicing. Ranges never overlap.
pub fn split_rows(density: &[f32], fill_mode: FillMode, target_h: u32) -> Vec<(usize, usize)> {
    let h = density.len();
    let target = target_h as f64;
    if h == 0 {
        return Vec::new();
    }
    let lim = limits(fill_mode);
    if (h as f64) <= target * lim.hard {
        return vec![(0, h)];
    }

    let threshold = blank_threshold(density);
    let min_band = 6.max((h as f64 * 0.004) as usize);
    let bands = active_bands(density, threshold, min_band);

    let mut pages: Vec<(usize, usize)> = if bands.is_empty() {
        slice_by_whitespace(density, 0, h, fill_mode, target_h, threshold)
    } else {
        let packed = pack_bands(&bands, h, &lim, target);
        let mut resolved = resolve_overlaps(packed, density);

        // Oversized packed pages fall back to whitespace slicing in place.
        let mut out = Vec::with_capacity(resolved.len());
        for (s, e) in resolved.drain(..) {
            if (e - s) as f64 > target * 1.32 {
                out.extend(slice_by_whitespace(
                    density, s, e, fill_mode, target_h, threshold,
                ));
            } else {
                out.push((s, e));
            }
        }
        out
    };

    merge_short_tail(&mut pages, &lim, target);
    pages
}

fn pack_bands(
    bands: &[(usize, usize)],
    h: usize,
    lim: &FillLimits,
    target: f64,
) -> Vec<(usize, usize)> {
    let gap_pad = 8.max((h as f64 * 0.012) as usize);
    let expanded: Vec<(usize, usize)> = bands
        .iter()
        .map(|&(s, e)| (s.saturating_sub(gap_pad), (e + gap_pad).min(h)))
        .collect();

    let mut pages = Vec::new();
    let (mut cur_s, mut cur_e) = expanded[0];
    for &(s, e) in &expanded[1..] {
        let extended = (e - cur_s) as f64;
        let filled = (cur_e - cur_s) as f64;
        if extended <= target * lim.soft {
            cur_e = e;
            continue;
        }
        // Extend into the hard limit rather than ending a page underfilled.
        if lim.underfill > 0.0 && filled < target * lim.underfill && extended <= target * lim.hard {
            cur_e = e;
            continue;
        }
        pages.push((cur_s, cur_e));
        cur_s = s;
        cur_e = e;
    }
    pages.push((cur_s, cur_e));
    pages
}

/// Overlapping neighbors cut at the minimum-density row between them.
fn resolve_overlaps(mut pages: Vec<(usize, usize)>, density: &[f32]) -> Vec<(usize, usize)> {
    for i in 1..pages.len() {
        let prev_end = pages[i - 1].1;
        let next_start = pages[i].0;
        if next_start < prev_end {
            let lo = next_start;
            let hi = prev_end.min(density.len());
            let cut = (lo..hi)
                .min_by(|&a, &b| {
                    density[a]
                        .partial_cmp(&density[b])
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .unwrap_or(lo);
            pages[i - 1].1 = cut;
            pages[i].0 = cut;
        }
    }
    pages.retain(|&(s, e)| e > s);
    pages
}

/// Walk a cursor splitting `[start, end)` into target-sized pages at clean
/// whitespace rows. Consecutive pages tile exactly: no duplicated rows, no
/// dropped rows.
fn slice_by_whitespace(
    density: &[f32],
    start: usize,
    end: usize,
    fill_mode: FillMode,
    target_h: u32,
    threshold: f32,
) -> Vec<(usize, usize)> {
    let lim = limits(fill_mode);
    let target = target_h as usize;
    let min_h = ((target as f64) * lim.min_page) as usize;
    let mut pages = Vec::new();
    let mut cursor = start;

    while cursor < end {
        let hard_end = (cursor + target).min(end);
        if hard_end >= end {
            pages.push((cursor, end));
            break;
        }

        let window = ((target as f64) * 0.22) as usize;
        let lo = (cursor + min_h).max(hard_end.saturating_sub(window));
        let hi = (hard_end + window).min(end - 1);

        let mut cut = match fill_mode {
            FillMode::Performance => {
                // Last clean whitespace row inside the backward window.
                (lo..=hard_end.min(hi))
                    .rev()
                    .find(|&row| density[row] <= threshold * 0.96)
                    .unwrap_or(hard_end)
            }
            FillMode::Balanced => {
                if hi <= lo {
                    hard_end
                } else {
                    (lo..=hi)
                        .min_by(|&a, &b| {
                            density[a]
                                .partial_cmp(&density[b])
                                .unwrap_or(std::cmp::Ordering::Equal)
                        })
                        .unwrap_or(hard_end)
                }
            }
        };

        if density[cut] > threshold * 1.25 {
            // Look ahead for a clearly cleaner row.
            let forward_limit = (hard_end + (target as f64 * 0.28) as usize).min(end - 1);
            let ahead = (hard_end..=forward_limit).find(|&row| density[row] <= threshold * 0.96);
            if let Some(row) = ahead {
                cut = row;
            } else {
                // Any blank row nearest to the target end.
                let nearest = (cursor + min_h.min(target)..=forward_limit)
                    .filter(|&row| density[row] <= threshold)
                    .min_by_key(|&row| row.abs_diff(hard_end));
                if let Some(row) = nearest {
                    cut = row;
                }
            }
        }

        if cut <= cursor || cut - cursor < min_h {
            cut = hard_end;
        }
        pages.push((cursor, cut));
        cursor = cut;
    }
    pages
}

/// Concatenate a short trailing page into its predecessor when it fits.
fn merge_short_tail(pages: &mut Vec<(usize, usize)>, lim: &FillLimits, target: f64) {
    if pages.len() < 2 {
        return;
    }
    let last = pages[pages.len() - 1];
    let prev = pages[pages.len() - 2];
    let last_h = (last.1 - last.0) as f64;
    let combined = (last.1 - prev.0) as f64;
    if last_h < target * lim.tail && combined <= target * lim.absorb && prev.1 <= last.0 + 1 {
        let n = pages.len();
        pages[n - 2] = (prev.0, last.1);
        pages.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Density profile of alternating staff systems and whitespace.
    fn system_density(h: usize, system_h: usize, gap_h: usize) -> Vec<f32> {
        let mut density = vec![0.0f32; h];
        let mut y = gap_h;
        while y + system_h < h {
            for row in density.iter_mut().skip(y).take(system_h) {
                *row = 0.08;
            }
            y += system_h + gap_h;
        }
        density
    }

    #[test]
    fn test_target_page_height_clamped() {
        assert_eq!(target_page_height(700, 1.0 / 2.0_f64.sqrt()), 990);
        assert_eq!(target_page_height(100, 0.707), 900);
        assert_eq!(target_page_height(10_000, 0.707), 2600);
    }

    #[test]
    fn test_short_image_is_single_page() {
        let density = vec![0.05f32; 800];
        let pages = split_rows(&density, FillMode::Performance, 900);
        assert_eq!(pages, vec![(0, 800)]);
    }

    #[test]
    fn test_whitespace_slicing_covers_every_row() {
        // No active bands (all density below threshold floor).
        let density = vec![0.0f32; 4000];
        for mode in [FillMode::Performance, FillMode::Balanced] {
            let pages = split_rows(&density, mode, 1000);
            let total: usize = pages.iter().map(|(s, e)| e - s).sum();
            assert_eq!(total, 4000, "rows lost in {mode:?}");
            for window in pages.windows(2) {
                assert_eq!(window[0].1, window[1].0, "pages must tile exactly");
            }
        }
    }

    #[test]
    fn test_band_packing_respects_hard_limit() {
        let density = system_density(6000, 180, 60);
        let target = 1200u32;
        let pages = split_rows(&density, FillMode::Performance, target);
        assert!(pages.len() >= 3);
        for &(s, e) in &pages {
            assert!(
                (e - s) as f64 <= target as f64 * 1.32 + 1.0,
                "page {s}..{e} too tall"
            );
        }
        // No overlapping rows between consecutive pages.
        for window in pages.windows(2) {
            assert!(window[0].1 <= window[1].0);
        }
    }

    #[test]
    fn test_cuts_avoid_dense_rows() {
        let density = system_density(5000, 200, 80);
        let pages = split_rows(&density, FillMode::Performance, 1100);
        let threshold = blank_threshold(&density);
        for window in pages.windows(2) {
            let cut = window[0].1;
            // Either the cut row is clean, or it tiles with the next page
            // start (band boundaries always land in gaps here).
            assert!(
                density[cut.min(density.len() - 1)] <= threshold * 1.25 + 0.06,
                "cut at dense row {cut}"
            );
        }
    }

    #[test]
    fn test_short_tail_merges_into_previous_page() {
        // Whitespace profile sized to leave a tiny tail.
        let density = vec![0.0f32; 2100];
        let pages = split_rows(&density, FillMode::Performance, 1000);
        let last = pages.last().unwrap();
        assert!(
            (last.1 - last.0) as f64 >= 1000.0 * 0.42 || pages.len() == 1,
            "short tail should have been merged: {pages:?}"
        );
        let total: usize = pages.iter().map(|(s, e)| e - s).sum();
        assert_eq!(total, 2100);
    }

    #[test]
    fn test_active_bands_extraction() {
        let mut density = vec![0.0f32; 100];
        for row in density.iter_mut().skip(10).take(20) {
            *row = 0.1;
        }
        for row in density.iter_mut().skip(50).take(3) {
            *row = 0.1;
        }
        let bands = active_bands(&density, 0.01, 6);
        assert_eq!(bands, vec![(10, 30)]);
    }
}
