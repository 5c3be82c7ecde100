//! Quadrilateral score regions.

use serde::{Deserialize, Serialize};

/// A point in image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point.
    pub fn distance(&self, other: &Point) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// An ordered 4-point region enclosing score content.
///
/// Canonical corner order is top-left, top-right, bottom-right, bottom-left.
/// `Quad::ordered` establishes that order; all pipeline stages assume it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Quad(pub [Point; 4]);

impl Quad {
    /// Canonicalize corner order: TL = argmin(x+y), BR = argmax(x+y),
    /// TR = argmin(y-x), BL = argmax(y-x).
    pub fn ordered(points: [Point; 4]) -> Self {
        let sum = |p: &Point| p.x + p.y;
        let diff = |p: &Point| p.y - p.x;

        let tl = *argmin_by(&points, sum);
        let br = *argmax_by(&points, sum);
        let tr = *argmin_by(&points, diff);
        let bl = *argmax_by(&points, diff);
        Quad([tl, tr, br, bl])
    }

    /// Build an ordered quad from an axis-aligned rectangle.
    pub fn from_rect(x: f32, y: f32, w: f32, h: f32) -> Self {
        Quad([
            Point::new(x, y),
            Point::new(x + w, y),
            Point::new(x + w, y + h),
            Point::new(x, y + h),
        ])
    }

    pub fn top_left(&self) -> Point {
        self.0[0]
    }

    pub fn top_right(&self) -> Point {
        self.0[1]
    }

    pub fn bottom_right(&self) -> Point {
        self.0[2]
    }

    pub fn bottom_left(&self) -> Point {
        self.0[3]
    }

    /// Width along the top and bottom edges.
    pub fn edge_widths(&self) -> (f32, f32) {
        (
            self.top_left().distance(&self.top_right()),
            self.bottom_left().distance(&self.bottom_right()),
        )
    }

    /// Height along the left and right edges.
    pub fn edge_heights(&self) -> (f32, f32) {
        (
            self.top_left().distance(&self.bottom_left()),
            self.top_right().distance(&self.bottom_right()),
        )
    }

    /// Axis-aligned bounding box as (x0, y0, x1, y1).
    pub fn bounding_box(&self) -> (f32, f32, f32, f32) {
        let xs = self.0.iter().map(|p| p.x);
        let ys = self.0.iter().map(|p| p.y);
        let x0 = xs.clone().fold(f32::INFINITY, f32::min);
        let x1 = xs.fold(f32::NEG_INFINITY, f32::max);
        let y0 = ys.clone().fold(f32::INFINITY, f32::min);
        let y1 = ys.fold(f32::NEG_INFINITY, f32::max);
        (x0, y0, x1, y1)
    }

    /// Clamp every corner into `[0, w] x [0, h]`.
    pub fn clipped(&self, w: f32, h: f32) -> Quad {
        let mut out = *self;
        for p in out.0.iter_mut() {
            p.x = p.x.clamp(0.0, w);
            p.y = p.y.clamp(0.0, h);
        }
        out
    }

    /// Intersection-over-union of the axis-aligned bounding boxes.
    pub fn bbox_iou(&self, other: &Quad) -> f32 {
        let (ax0, ay0, ax1, ay1) = self.bounding_box();
        let (bx0, by0, bx1, by1) = other.bounding_box();

        let ix = (ax1.min(bx1) - ax0.max(bx0)).max(0.0);
        let iy = (ay1.min(by1) - ay0.max(by0)).max(0.0);
        let inter = ix * iy;
        let area_a = (ax1 - ax0).max(0.0) * (ay1 - ay0).max(0.0);
        let area_b = (bx1 - bx0).max(0.0) * (by1 - by0).max(0.0);
        let union = area_a + area_b - inter;
        if union <= 0.0 {
            return 0.0;
        }
        inter / union
    }

    /// Component-wise median of a history of quads.
    pub fn component_median(history: &[Quad]) -> Option<Quad> {
        if history.is_empty() {
            return None;
        }
        let mut points = [Point::new(0.0, 0.0); 4];
        for (i, point) in points.iter_mut().enumerate() {
            let mut xs: Vec<f32> = history.iter().map(|q| q.0[i].x).collect();
            let mut ys: Vec<f32> = history.iter().map(|q| q.0[i].y).collect();
            xs.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            ys.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            point.x = xs[xs.len() / 2];
            point.y = ys[ys.len() / 2];
        }
        Some(Quad(points))
    }

    /// Parse a `[[x, y]; 4]` wire payload into an ordered quad.
    pub fn from_wire(raw: &[[f32; 2]]) -> Option<Quad> {
        if raw.len() != 4 {
            return None;
        }
        let points = [
            Point::new(raw[0][0], raw[0][1]),
            Point::new(raw[1][0], raw[1][1]),
            Point::new(raw[2][0], raw[2][1]),
            Point::new(raw[3][0], raw[3][1]),
        ];
        Some(Quad::ordered(points))
    }
}

fn argmin_by<'a>(points: &'a [Point; 4], key: impl Fn(&Point) -> f32) -> &'a Point {
    points
        .iter()
        .min_by(|a, b| {
            key(a)
                .partial_cmp(&key(b))
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .unwrap_or(&points[0])
}

fn argmax_by<'a>(points: &'a [Point; 4], key: impl Fn(&Point) -> f32) -> &'a Point {
    points
        .iter()
        .max_by(|a, b| {
            key(a)
                .partial_cmp(&key(b))
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .unwrap_or(&points[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shuffled_quad() -> [Point; 4] {
        [
            Point::new(1180.0, 150.0),
            Point::new(100.0, 600.0),
            Point::new(100.0, 150.0),
            Point::new(1180.0, 600.0),
        ]
    }

    #[test]
    fn test_order_points_canonical() {
        let quad = Quad::ordered(shuffled_quad());
        assert_eq!(quad.top_left(), Point::new(100.0, 150.0));
        assert_eq!(quad.top_right(), Point::new(1180.0, 150.0));
        assert_eq!(quad.bottom_right(), Point::new(1180.0, 600.0));
        assert_eq!(quad.bottom_left(), Point::new(100.0, 600.0));
    }

    #[test]
    fn test_order_points_idempotent() {
        let once = Quad::ordered(shuffled_quad());
        let twice = Quad::ordered(once.0);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_bbox_iou_identity_and_disjoint() {
        let a = Quad::from_rect(0.0, 0.0, 100.0, 100.0);
        assert!((a.bbox_iou(&a) - 1.0).abs() < 1e-6);

        let b = Quad::from_rect(200.0, 200.0, 50.0, 50.0);
        assert_eq!(a.bbox_iou(&b), 0.0);
    }

    #[test]
    fn test_component_median() {
        let history = vec![
            Quad::from_rect(0.0, 0.0, 100.0, 100.0),
            Quad::from_rect(10.0, 10.0, 100.0, 100.0),
            Quad::from_rect(20.0, 20.0, 100.0, 100.0),
        ];
        let median = Quad::component_median(&history).unwrap();
        assert_eq!(median.top_left(), Point::new(10.0, 10.0));
    }

    #[test]
    fn test_from_wire_orders_points() {
        let quad = Quad::from_wire(&[
            [750.0, 1140.0],
            [50.0, 60.0],
            [750.0, 60.0],
            [50.0, 1140.0],
        ])
        .unwrap();
        assert_eq!(quad.top_left(), Point::new(50.0, 60.0));
        assert_eq!(quad.bottom_right(), Point::new(750.0, 1140.0));
    }

    #[test]
    fn test_clipped() {
        let quad = Quad::from_rect(-10.0, -5.0, 2000.0, 900.0);
        let clipped = quad.clipped(1280.0, 720.0);
        assert_eq!(clipped.top_left(), Point::new(0.0, 0.0));
        assert_eq!(clipped.bottom_right(), Point::new(1280.0, 720.0));
    }
}
