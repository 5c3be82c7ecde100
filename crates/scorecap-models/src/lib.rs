//! Shared data models for the scorecap backend.
//!
//! This crate provides Serde-serializable types for:
//! - Jobs, their lifecycle and public snapshots
//! - The per-job option bundle and its validation
//! - Quadrilateral score regions and corner canonicalization
//! - Layout modes and their detection tuning profiles

pub mod detection;
pub mod geometry;
pub mod job;
pub mod layout;
pub mod options;
pub mod source;

pub use detection::DetectionRecord;
pub use geometry::{Point, Quad};
pub use job::{Job, JobId, JobSnapshot, JobStatus, LOG_TAIL_LINES};
pub use layout::{
    resolve_layout_hint, DetectionProfile, FallbackMode, LayoutHint, LayoutMode,
};
pub use options::{
    CaptureSensitivity, DedupLevel, DetectMode, DetectOptions, ExportFormat, ExportOptions,
    ExtractOptions, FillMode, JobOptions, OptionsError, RectifyOptions, StitchOptions,
    UpscaleOptions,
};
pub use source::{Source, SourceKind};
