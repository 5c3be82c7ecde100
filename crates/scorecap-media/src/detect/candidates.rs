//! Per-frame region candidate generation.

use image::{GrayImage, RgbImage};
use imageproc::contours::{find_contours, BorderType};
use imageproc::geometry::{approximate_polygon_dp, min_area_rect};
use imageproc::point::Point as IPoint;
use scorecap_models::{DetectionProfile, LayoutMode, Point, Quad};

use crate::imgops;

/// Where a candidate came from; used only for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateSource {
    ContourPolygon,
    RotatedRect,
    Synthetic,
}

#[derive(Debug, Clone)]
pub struct Candidate {
    pub quad: Quad,
    pub source: CandidateSource,
}

/// Edge map for contour extraction: blur, Canny, dilate.
pub fn edge_map(gray: &GrayImage) -> GrayImage {
    let blurred = imageproc::filter::gaussian_blur_f32(gray, 1.1);
    let edges = imageproc::edges::canny(&blurred, 40.0, 140.0);
    imgops::dilate_rect(&edges, 3, 3)
}

/// Shoelace area of a closed polygon.
fn polygon_area(points: &[IPoint<i32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let mut sum = 0i64;
    for i in 0..points.len() {
        let a = points[i];
        let b = points[(i + 1) % points.len()];
        sum += a.x as i64 * b.y as i64 - b.x as i64 * a.y as i64;
    }
    (sum.abs() as f64) / 2.0
}

/// Perimeter of a closed polygon.
fn polygon_perimeter(points: &[IPoint<i32>]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }
    let mut total = 0.0;
    for i in 0..points.len() {
        let a = points[i];
        let b = points[(i + 1) % points.len()];
        let dx = (a.x - b.x) as f64;
        let dy = (a.y - b.y) as f64;
        total += (dx * dx + dy * dy).sqrt();
    }
    total
}

/// All cross products of consecutive edges share a sign.
fn is_convex_quad(points: &[IPoint<i32>]) -> bool {
    if points.len() != 4 {
        return false;
    }
    let mut sign = 0i64;
    for i in 0..4 {
        let a = points[i];
        let b = points[(i + 1) % 4];
        let c = points[(i + 2) % 4];
        let cross = (b.x - a.x) as i64 * (c.y - b.y) as i64
            - (b.y - a.y) as i64 * (c.x - b.x) as i64;
        if cross == 0 {
            continue;
        }
        let s = cross.signum();
        if sign == 0 {
            sign = s;
        } else if s != sign {
            return false;
        }
    }
    sign != 0
}

fn quad_from_ipoints(points: &[IPoint<i32>]) -> Quad {
    Quad::ordered([
        Point::new(points[0].x as f32, points[0].y as f32),
        Point::new(points[1].x as f32, points[1].y as f32),
        Point::new(points[2].x as f32, points[2].y as f32),
        Point::new(points[3].x as f32, points[3].y as f32),
    ])
}

/// Contour-driven candidates from the edge map.
pub fn contour_candidates(gray: &GrayImage, profile: &DetectionProfile) -> Vec<Candidate> {
    let (w, h) = gray.dimensions();
    let frame_area = (w as f64) * (h as f64);
    if frame_area <= 0.0 {
        return Vec::new();
    }
    let edges = edge_map(gray);
    let contours = find_contours::<i32>(&edges);

    let mut out = Vec::new();
    for contour in &contours {
        if contour.border_type != BorderType::Outer || contour.points.len() < 4 {
            continue;
        }
        let area = polygon_area(&contour.points);
        let area_ratio = area / frame_area;
        if area_ratio < profile.min_area_ratio() || area_ratio > 0.995 {
            continue;
        }

        let perimeter = polygon_perimeter(&contour.points);
        let approx = approximate_polygon_dp(&contour.points, 0.02 * perimeter, true);
        if approx.len() == 4 && is_convex_quad(&approx) {
            out.push(Candidate {
                quad: quad_from_ipoints(&approx),
                source: CandidateSource::ContourPolygon,
            });
            continue;
        }

        let rect = min_area_rect(&contour.points);
        let side_a = {
            let dx = (rect[0].x - rect[1].x) as f64;
            let dy = (rect[0].y - rect[1].y) as f64;
            (dx * dx + dy * dy).sqrt()
        };
        let side_b = {
            let dx = (rect[1].x - rect[2].x) as f64;
            let dy = (rect[1].y - rect[2].y) as f64;
            (dx * dx + dy * dy).sqrt()
        };
        if side_a < 1.0 || side_b < 1.0 {
            continue;
        }
        let box_area = side_a * side_b;
        let fill = area / box_area.max(1.0);
        let aspect = side_a / side_b;
        if fill > 0.35 && fill < 1.2 && aspect > 0.45 && aspect < profile.max_aspect() {
            out.push(Candidate {
                quad: quad_from_ipoints(&rect),
                source: CandidateSource::RotatedRect,
            });
        }
    }
    out
}

/// Layout-specific synthetic candidate.
pub fn synthetic_candidate(
    img: &RgbImage,
    gray: &GrayImage,
    profile: &DetectionProfile,
) -> Option<Candidate> {
    match profile.key {
        LayoutMode::BottomBar => bottom_band_candidate(gray),
        _ => bright_page_candidate(img, gray),
    }
}

/// Longest bright horizontal band in the lower 55 % of the frame.
fn bottom_band_candidate(gray: &GrayImage) -> Option<Candidate> {
    let (w, h) = gray.dimensions();
    if h < 8 || w < 8 {
        return None;
    }
    let profile_rows = crate::imgops::shift::row_profile(gray, 1.0);

    // Moving-average smoothing over 9 rows.
    let smoothed: Vec<f32> = (0..profile_rows.len())
        .map(|i| {
            let lo = i.saturating_sub(4);
            let hi = (i + 5).min(profile_rows.len());
            profile_rows[lo..hi].iter().sum::<f32>() / (hi - lo) as f32
        })
        .collect();

    let start_row = ((h as f64) * 0.45) as usize;
    let mut best: Option<(usize, usize)> = None;
    let mut run_start: Option<usize> = None;
    for y in start_row..=smoothed.len() {
        let bright = y < smoothed.len() && smoothed[y] / 255.0 > 0.54;
        match (bright, run_start) {
            (true, None) => run_start = Some(y),
            (false, Some(s)) => {
                let len = y - s;
                if best.map(|(bs, be)| len > be - bs).unwrap_or(true) {
                    best = Some((s, y));
                }
                run_start = None;
            }
            _ => {}
        }
    }

    let (y0, y1) = best?;
    if y1 - y0 < 4 {
        return None;
    }
    let inset = w as f32 * 0.02;
    Some(Candidate {
        quad: Quad::from_rect(
            inset,
            y0 as f32,
            w as f32 - 2.0 * inset,
            (y1 - y0) as f32,
        ),
        source: CandidateSource::Synthetic,
    })
}

/// Otsu-thresholded bright page region for full-scroll and page-turn frames.
fn bright_page_candidate(_img: &RgbImage, gray: &GrayImage) -> Option<Candidate> {
    let (w, h) = gray.dimensions();
    let frame_area = (w as f64) * (h as f64);
    if frame_area <= 0.0 {
        return None;
    }

    let mut level = imageproc::contrast::otsu_level(gray);
    if level < 5 || level > 250 {
        level = 180;
    }
    let binary = imageproc::contrast::threshold(gray, level);
    let closed = imgops::close_rect(&binary, 11, 11);
    let contours = find_contours::<i32>(&closed);

    let mut best: Option<(f64, Quad)> = None;
    for contour in &contours {
        if contour.border_type != BorderType::Outer || contour.points.len() < 4 {
            continue;
        }
        let area = polygon_area(&contour.points);
        let ratio = area / frame_area;
        if ratio <= 0.28 || ratio >= 0.99 {
            continue;
        }
        let (min_x, max_x) = contour
            .points
            .iter()
            .fold((i32::MAX, i32::MIN), |(lo, hi), p| (lo.min(p.x), hi.max(p.x)));
        let (min_y, max_y) = contour
            .points
            .iter()
            .fold((i32::MAX, i32::MIN), |(lo, hi), p| (lo.min(p.y), hi.max(p.y)));
        let bw = (max_x - min_x).max(1) as f64;
        let bh = (max_y - min_y).max(1) as f64;
        let aspect = bw / bh;
        if aspect <= 0.7 || aspect >= 2.8 {
            continue;
        }
        if best.as_ref().map(|(a, _)| area > *a).unwrap_or(true) {
            best = Some((
                area,
                Quad::from_rect(min_x as f32, min_y as f32, bw as f32, bh as f32),
            ));
        }
    }

    best.map(|(_, quad)| Candidate {
        quad,
        source: CandidateSource::Synthetic,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    /// Frame with a bright sheet region over a dark backdrop.
    fn frame_with_sheet(w: u32, h: u32, x0: u32, y0: u32, sw: u32, sh: u32) -> RgbImage {
        let mut img = RgbImage::from_pixel(w, h, Rgb([18, 18, 24]));
        for y in y0..(y0 + sh).min(h) {
            for x in x0..(x0 + sw).min(w) {
                img.put_pixel(x, y, Rgb([240, 240, 236]));
            }
        }
        img
    }

    #[test]
    fn test_bright_page_candidate_finds_sheet() {
        let img = frame_with_sheet(640, 360, 80, 40, 480, 280);
        let gray = imgops::to_gray(&img);
        let profile = LayoutMode::FullScroll.profile();
        let candidate = synthetic_candidate(&img, &gray, profile).expect("candidate");
        let (x0, y0, x1, y1) = candidate.quad.bounding_box();
        assert!(x0 >= 60.0 && x0 <= 100.0, "x0={x0}");
        assert!(y0 >= 20.0 && y0 <= 60.0, "y0={y0}");
        assert!(x1 >= 540.0 && x1 <= 580.0, "x1={x1}");
        assert!(y1 >= 300.0 && y1 <= 340.0, "y1={y1}");
    }

    #[test]
    fn test_bottom_band_candidate_stays_low() {
        // Bright strip across the bottom quarter only.
        let img = frame_with_sheet(640, 360, 0, 280, 640, 70);
        let gray = imgops::to_gray(&img);
        let profile = LayoutMode::BottomBar.profile();
        let candidate = synthetic_candidate(&img, &gray, profile).expect("candidate");
        let (_, y0, _, y1) = candidate.quad.bounding_box();
        let center_y = (y0 + y1) / 2.0 / 360.0;
        assert!(center_y > 0.55, "center_y={center_y}");
    }

    #[test]
    fn test_contour_candidates_on_sheet_frame() {
        let img = frame_with_sheet(640, 360, 80, 40, 480, 280);
        let gray = imgops::to_gray(&img);
        let profile = LayoutMode::FullScroll.profile();
        let candidates = contour_candidates(&gray, profile);
        assert!(!candidates.is_empty(), "expected at least one candidate");
        let hit = candidates.iter().any(|c| {
            let (x0, y0, x1, y1) = c.quad.bounding_box();
            (x0 - 80.0).abs() < 20.0
                && (y0 - 40.0).abs() < 20.0
                && (x1 - 560.0).abs() < 20.0
                && (y1 - 320.0).abs() < 20.0
        });
        assert!(hit, "no candidate matched the sheet bounds");
    }

    #[test]
    fn test_convexity_check() {
        let convex = [
            IPoint::new(0, 0),
            IPoint::new(10, 0),
            IPoint::new(10, 10),
            IPoint::new(0, 10),
        ];
        assert!(is_convex_quad(&convex));
        let concave = [
            IPoint::new(0, 0),
            IPoint::new(10, 0),
            IPoint::new(2, 2),
            IPoint::new(0, 10),
        ];
        assert!(!is_convex_quad(&concave));
    }

    #[test]
    fn test_polygon_area() {
        let square = [
            IPoint::new(0, 0),
            IPoint::new(10, 0),
            IPoint::new(10, 10),
            IPoint::new(0, 10),
        ];
        assert_eq!(polygon_area(&square), 100.0);
    }

    #[test]
    fn test_synthetic_none_on_dark_frame() {
        let img = RgbImage::from_pixel(320, 180, Rgb([10, 10, 10]));
        let gray = imgops::to_gray(&img);
        let profile = LayoutMode::FullScroll.profile();
        assert!(synthetic_candidate(&img, &gray, profile).is_none());
    }
}
