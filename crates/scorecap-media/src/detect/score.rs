//! Candidate scoring.
//!
//! A weighted sum of geometric and content cues, clamped to [0, 1]. The
//! weights are fixed; the per-layout targets come from the detection
//! profile.

use image::GrayImage;
use scorecap_models::{DetectionProfile, Quad};

use crate::imgops;

const W_AREA: f64 = 0.16;
const W_ASPECT: f64 = 0.14;
const W_LINES: f64 = 0.20;
const W_BRIGHTNESS: f64 = 0.10;
const W_TEMPORAL: f64 = 0.16;
const W_CENTER: f64 = 0.12;
const W_BOUNDARY: f64 = 0.08;
const W_LAYOUT: f64 = 0.12;
const W_BOTTOM_BIAS: f64 = 0.06;

/// Brightness target for score paper, in [0, 1].
const BRIGHTNESS_TARGET: f64 = 0.78;

/// Per-frame maps shared by every candidate of that frame.
pub struct FrameContext {
    pub gray: GrayImage,
    /// Adaptive-inverse foreground opened with a horizontal kernel of
    /// length w/12; highlights staff-line structure.
    pub line_map: GrayImage,
    pub width: f64,
    pub height: f64,
}

impl FrameContext {
    pub fn new(gray: GrayImage) -> Self {
        let (w, h) = gray.dimensions();
        let inverse = imgops::adaptive_inverse(&gray, 31, 7.0);
        let kernel_w = (w / 12).max(3);
        let line_map = imgops::open_rect(&inverse, kernel_w, 1);
        Self {
            gray,
            line_map,
            width: w as f64,
            height: h as f64,
        }
    }

    fn region_stats(&self, quad: &Quad) -> RegionStats {
        let (x0, y0, x1, y1) = quad.bounding_box();
        let x0 = x0.clamp(0.0, self.width as f32) as u32;
        let y0 = y0.clamp(0.0, self.height as f32) as u32;
        let x1 = (x1.clamp(0.0, self.width as f32) as u32).max(x0 + 1);
        let y1 = (y1.clamp(0.0, self.height as f32) as u32).max(y0 + 1);

        let mut brightness_sum = 0u64;
        let mut line_count = 0u64;
        let mut count = 0u64;
        for y in y0..y1.min(self.gray.height()) {
            for x in x0..x1.min(self.gray.width()) {
                brightness_sum += self.gray.get_pixel(x, y)[0] as u64;
                if self.line_map.get_pixel(x, y)[0] > 0 {
                    line_count += 1;
                }
                count += 1;
            }
        }
        let count = count.max(1);
        RegionStats {
            brightness: brightness_sum as f64 / count as f64 / 255.0,
            line_density: line_count as f64 / count as f64,
        }
    }
}

struct RegionStats {
    brightness: f64,
    line_density: f64,
}

fn closeness(value: f64, target: f64, tolerance: f64) -> f64 {
    if tolerance <= 0.0 {
        return 0.0;
    }
    (1.0 - (value - target).abs() / tolerance).clamp(0.0, 1.0)
}

/// Score a candidate region for one frame.
pub fn score_candidate(
    quad: &Quad,
    profile: &DetectionProfile,
    ctx: &FrameContext,
    prev: Option<&Quad>,
) -> f64 {
    let (x0, y0, x1, y1) = quad.bounding_box();
    let bw = (x1 - x0).max(1.0) as f64;
    let bh = (y1 - y0).max(1.0) as f64;
    let frame_area = (ctx.width * ctx.height).max(1.0);

    let area_ratio = (bw * bh) / frame_area;
    let aspect = bw / bh;
    let center_y = ((y0 + y1) as f64 / 2.0) / ctx.height.max(1.0);

    let area_score = closeness(area_ratio, profile.area_target, profile.area_tolerance);
    let aspect_score = closeness(
        aspect,
        profile.page_aspect_target,
        profile.page_aspect_tolerance,
    )
    .max(closeness(
        aspect,
        profile.strip_aspect_target,
        profile.strip_aspect_tolerance,
    ));

    let stats = ctx.region_stats(quad);
    let line_score = (stats.line_density / 0.05).clamp(0.0, 1.0);
    let brightness_score = (1.0 - (stats.brightness - BRIGHTNESS_TARGET).abs() / 0.35).clamp(0.0, 1.0);

    let temporal_score = prev.map(|p| quad.bbox_iou(p) as f64).unwrap_or(0.0);
    let center_score = closeness(center_y, profile.center_y_target, profile.center_y_tolerance);

    // Penalize regions glued to the frame border on several sides.
    let edge_eps = (ctx.width.min(ctx.height) * 0.01).max(2.0) as f32;
    let mut touching = 0;
    if x0 <= edge_eps {
        touching += 1;
    }
    if y0 <= edge_eps {
        touching += 1;
    }
    if x1 >= ctx.width as f32 - edge_eps {
        touching += 1;
    }
    if y1 >= ctx.height as f32 - edge_eps {
        touching += 1;
    }
    let boundary_penalty = touching as f64 / 4.0;

    let layout_bonus = if profile.prefer_bottom {
        // Bottom-strip affinity: wide and low.
        let strip = ((aspect - 2.5) / 2.0).clamp(0.0, 1.0);
        let low = ((center_y - 0.55) / 0.3).clamp(0.0, 1.0);
        (strip + low) / 2.0
    } else {
        // Full-page affinity: big and roughly page shaped.
        let big = ((area_ratio - 0.3) / 0.4).clamp(0.0, 1.0);
        let pagey = closeness(aspect, profile.page_aspect_target, 1.0);
        (big + pagey) / 2.0
    };
    let bottom_bias = if profile.prefer_bottom {
        center_y.clamp(0.0, 1.0)
    } else {
        0.0
    };

    let score = W_AREA * area_score
        + W_ASPECT * aspect_score
        + W_LINES * line_score
        + W_BRIGHTNESS * brightness_score
        + W_TEMPORAL * temporal_score
        + W_CENTER * center_score
        - W_BOUNDARY * boundary_penalty
        + W_LAYOUT * layout_bonus
        + W_BOTTOM_BIAS * bottom_bias;
    score.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;
    use scorecap_models::LayoutMode;

    /// Gray frame with a bright sheet and staff-like dark lines inside it.
    fn sheet_frame(w: u32, h: u32, x0: u32, y0: u32, sw: u32, sh: u32) -> GrayImage {
        let mut img = GrayImage::from_pixel(w, h, Luma([25]));
        for y in y0..(y0 + sh).min(h) {
            for x in x0..(x0 + sw).min(w) {
                img.put_pixel(x, y, Luma([235]));
            }
        }
        for line in 0..6u32 {
            let y = y0 + sh * (line + 1) / 8;
            if y >= h {
                continue;
            }
            for x in x0..(x0 + sw).min(w) {
                img.put_pixel(x, y, Luma([30]));
            }
        }
        img
    }

    #[test]
    fn test_sheet_region_outscores_background() {
        let gray = sheet_frame(640, 360, 100, 60, 440, 240);
        let ctx = FrameContext::new(gray);
        let profile = LayoutMode::FullScroll.profile();

        let on_sheet = Quad::from_rect(100.0, 60.0, 440.0, 240.0);
        let off_sheet = Quad::from_rect(0.0, 0.0, 90.0, 50.0);
        let s_on = score_candidate(&on_sheet, profile, &ctx, None);
        let s_off = score_candidate(&off_sheet, profile, &ctx, None);
        assert!(s_on > s_off, "{s_on} <= {s_off}");
        assert!(s_on > profile.confidence_threshold);
    }

    #[test]
    fn test_temporal_iou_rewards_stability() {
        let gray = sheet_frame(640, 360, 100, 60, 440, 240);
        let ctx = FrameContext::new(gray);
        let profile = LayoutMode::FullScroll.profile();
        let quad = Quad::from_rect(100.0, 60.0, 440.0, 240.0);

        let cold = score_candidate(&quad, profile, &ctx, None);
        let warm = score_candidate(&quad, profile, &ctx, Some(&quad));
        assert!(warm > cold);
    }

    #[test]
    fn test_score_is_clamped() {
        let gray = sheet_frame(320, 180, 10, 10, 300, 160);
        let ctx = FrameContext::new(gray);
        let profile = LayoutMode::BottomBar.profile();
        let quad = Quad::from_rect(0.0, 0.0, 320.0, 180.0);
        let score = score_candidate(&quad, profile, &ctx, Some(&quad));
        assert!((0.0..=1.0).contains(&score));
    }
}
