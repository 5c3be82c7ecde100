//! Per-job option bundle.
//!
//! Options are validated once at job creation; the pipeline treats the
//! bundle as immutable afterwards.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use validator::Validate;

use crate::layout::LayoutHint;

/// Validation failure for a job option bundle.
#[derive(Debug, Error)]
pub enum OptionsError {
    #[error("{0}")]
    Invalid(String),
}

/// Frame sampling sensitivity, mapped to a capture fps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CaptureSensitivity {
    Low,
    #[default]
    Medium,
    High,
}

impl CaptureSensitivity {
    /// Sampling rate used when no explicit fps is given.
    pub fn fps(&self) -> f64 {
        match self {
            CaptureSensitivity::Low => 0.6,
            CaptureSensitivity::Medium => 1.0,
            CaptureSensitivity::High => 1.8,
        }
    }
}

/// Temporal deduplication preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DedupLevel {
    Aggressive,
    #[default]
    Normal,
    Sensitive,
}

impl DedupLevel {
    /// Pick the preset value for this level from an (aggressive, normal,
    /// sensitive) triple.
    pub fn pick(&self, aggressive: f64, normal: f64, sensitive: f64) -> f64 {
        match self {
            DedupLevel::Aggressive => aggressive,
            DedupLevel::Normal => normal,
            DedupLevel::Sensitive => sensitive,
        }
    }
}

/// Region detection mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DetectMode {
    #[default]
    Auto,
    Manual,
}

/// Pagination fill strategy for the sheet finalizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FillMode {
    /// Fill pages fuller, extending into the hard limit to absorb underfill.
    #[default]
    Performance,
    /// Conservative cap with no underfill extension.
    Balanced,
}

/// Requested export container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    Png,
    Jpg,
    Pdf,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ExtractOptions {
    /// Explicit sampling fps; overrides the sensitivity mapping.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fps: Option<f64>,
    #[serde(default)]
    pub capture_sensitivity: CaptureSensitivity,
    /// Optional capture window start, seconds.
    #[validate(range(min = 0.0))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_sec: Option<f64>,
    /// Optional capture window end, seconds. Must exceed start when both set.
    #[validate(range(min = 0.0))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_sec: Option<f64>,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            fps: None,
            capture_sensitivity: CaptureSensitivity::Medium,
            start_sec: None,
            end_sec: None,
        }
    }
}

impl ExtractOptions {
    /// Resolve the sampling fps: explicit value if positive, else the
    /// sensitivity mapping.
    pub fn capture_fps(&self) -> f64 {
        match self.fps {
            Some(fps) if fps > 0.0 => fps,
            _ => self.capture_sensitivity.fps(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DetectOptions {
    #[serde(default)]
    pub mode: DetectMode,
    /// Manual 4-point region, required in manual mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roi: Option<Vec<[f32; 2]>>,
    #[serde(default)]
    pub layout_hint: LayoutHint,
    /// Tri-state bottom-strip preference; see layout resolution.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefer_bottom: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RectifyOptions {
    /// Apply CLAHE contrast normalization and a gentle unsharp mask.
    pub auto: bool,
    /// Optional override region applied to frames without a detection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manual_points: Option<Vec<[f32; 2]>>,
}

impl Default for RectifyOptions {
    fn default() -> Self {
        Self {
            auto: true,
            manual_points: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct StitchOptions {
    #[serde(default)]
    pub enable: bool,
    #[validate(range(min = 0.0, max = 1.0))]
    #[serde(default = "default_overlap_threshold")]
    pub overlap_threshold: f64,
    #[serde(default)]
    pub layout_hint: LayoutHint,
    #[serde(default)]
    pub dedup_level: DedupLevel,
}

fn default_overlap_threshold() -> f64 {
    0.2
}

impl Default for StitchOptions {
    fn default() -> Self {
        Self {
            enable: false,
            overlap_threshold: default_overlap_threshold(),
            layout_hint: LayoutHint::Auto,
            dedup_level: DedupLevel::Normal,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct UpscaleOptions {
    #[serde(default)]
    pub enable: bool,
    #[validate(range(min = 1.0, max = 4.0))]
    #[serde(default = "default_upscale_scale")]
    pub scale: f64,
    #[serde(default = "default_true")]
    pub gpu_only: bool,
}

fn default_upscale_scale() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

impl Default for UpscaleOptions {
    fn default() -> Self {
        Self {
            enable: false,
            scale: default_upscale_scale(),
            gpu_only: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportOptions {
    #[serde(default = "default_formats")]
    pub formats: Vec<ExportFormat>,
    #[serde(default)]
    pub include_raw_frames: bool,
    #[serde(default)]
    pub fill_mode: FillMode,
}

fn default_formats() -> Vec<ExportFormat> {
    vec![ExportFormat::Png, ExportFormat::Pdf]
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            formats: default_formats(),
            include_raw_frames: false,
            fill_mode: FillMode::Performance,
        }
    }
}

impl ExportOptions {
    pub fn wants(&self, format: ExportFormat) -> bool {
        self.formats.contains(&format)
    }
}

/// The immutable option bundle attached to a job.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct JobOptions {
    #[serde(default)]
    pub extract: ExtractOptions,
    #[serde(default)]
    pub detect: DetectOptions,
    #[serde(default)]
    pub rectify: RectifyOptions,
    #[serde(default)]
    pub stitch: StitchOptions,
    #[serde(default)]
    pub upscale: UpscaleOptions,
    #[serde(default)]
    pub export: ExportOptions,
}

impl JobOptions {
    /// Validate every sub-bundle, including cross-field constraints that
    /// the derive cannot express.
    pub fn validate(&self) -> Result<(), OptionsError> {
        self.extract
            .validate()
            .map_err(|e| OptionsError::Invalid(e.to_string()))?;
        if let (Some(start), Some(end)) = (self.extract.start_sec, self.extract.end_sec) {
            if end <= start {
                return Err(OptionsError::Invalid(
                    "end_sec must be greater than start_sec".to_string(),
                ));
            }
        }
        if let Some(fps) = self.extract.fps {
            if fps <= 0.0 {
                return Err(OptionsError::Invalid("fps must be positive".to_string()));
            }
        }

        match self.detect.mode {
            DetectMode::Manual => {
                let roi = self.detect.roi.as_ref().ok_or_else(|| {
                    OptionsError::Invalid("roi is required when detect mode is manual".to_string())
                })?;
                if roi.len() != 4 {
                    return Err(OptionsError::Invalid(
                        "roi must be 4 points: [[x, y], ...]".to_string(),
                    ));
                }
            }
            DetectMode::Auto => {}
        }
        if let Some(points) = self.rectify.manual_points.as_ref() {
            if points.len() != 4 {
                return Err(OptionsError::Invalid(
                    "manual_points must be 4 points: [[x, y], ...]".to_string(),
                ));
            }
        }

        self.stitch
            .validate()
            .map_err(|e| OptionsError::Invalid(e.to_string()))?;
        self.upscale
            .validate()
            .map_err(|e| OptionsError::Invalid(e.to_string()))?;
        if self.upscale.enable && self.upscale.scale <= 1.0 {
            return Err(OptionsError::Invalid(
                "scale must be greater than 1.0 when upscale is enabled".to_string(),
            ));
        }
        if self.export.formats.is_empty() {
            return Err(OptionsError::Invalid(
                "at least one export format is required".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_sensitivity_fps_mapping() {
        assert_eq!(CaptureSensitivity::Low.fps(), 0.6);
        assert_eq!(CaptureSensitivity::Medium.fps(), 1.0);
        assert_eq!(CaptureSensitivity::High.fps(), 1.8);
    }

    #[test]
    fn test_explicit_fps_wins_over_sensitivity() {
        let mut rng = rand::rng();
        for _ in 0..64 {
            let fps: f64 = rng.random_range(0.1..30.0);
            let opts = ExtractOptions {
                fps: Some(fps),
                capture_sensitivity: CaptureSensitivity::High,
                ..Default::default()
            };
            assert_eq!(opts.capture_fps(), fps);
        }
        let opts = ExtractOptions::default();
        assert_eq!(opts.capture_fps(), 1.0);
    }

    #[test]
    fn test_window_validation() {
        let mut options = JobOptions::default();
        options.extract.start_sec = Some(5.0);
        options.extract.end_sec = Some(3.0);
        assert!(options.validate().is_err());

        options.extract.end_sec = Some(8.0);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_manual_mode_requires_roi() {
        let mut options = JobOptions::default();
        options.detect.mode = DetectMode::Manual;
        assert!(options.validate().is_err());

        options.detect.roi = Some(vec![
            [100.0, 150.0],
            [1180.0, 150.0],
            [1180.0, 600.0],
            [100.0, 600.0],
        ]);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_upscale_scale_bounds() {
        let mut options = JobOptions::default();
        options.upscale.enable = true;
        options.upscale.scale = 1.0;
        assert!(options.validate().is_err());

        options.upscale.scale = 4.5;
        assert!(options.validate().is_err());

        options.upscale.scale = 2.0;
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_empty_formats_rejected() {
        let mut options = JobOptions::default();
        options.export.formats.clear();
        assert!(options.validate().is_err());
    }
}
