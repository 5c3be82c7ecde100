//! Per-frame detection records.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::geometry::Quad;

/// The detector's output for one extracted frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub frame_path: PathBuf,
    /// Ordered region (TL, TR, BR, BL) in image pixels, when one was found.
    pub region: Option<Quad>,
    /// Confidence in [0, 1]; manual mode always reports 1.0.
    pub score: f64,
    pub frame_index: usize,
}

impl DetectionRecord {
    pub fn new(frame_path: PathBuf, region: Option<Quad>, score: f64, frame_index: usize) -> Self {
        Self {
            frame_path,
            region,
            score: score.clamp(0.0, 1.0),
            frame_index,
        }
    }
}
