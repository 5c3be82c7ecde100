//! Layout modes and detection tuning profiles.

use serde::{Deserialize, Serialize};

use crate::source::SourceKind;

/// User-facing layout hint, including the unresolved `auto` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LayoutHint {
    #[default]
    Auto,
    BottomBar,
    FullScroll,
    PageTurn,
}

/// Resolved capture layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutMode {
    /// YouTube-style strip along the bottom of the frame.
    BottomBar,
    /// The whole frame scrolls vertically.
    FullScroll,
    /// Discrete page flips.
    PageTurn,
}

impl LayoutMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LayoutMode::BottomBar => "bottom_bar",
            LayoutMode::FullScroll => "full_scroll",
            LayoutMode::PageTurn => "page_turn",
        }
    }
}

/// Fallback region strategy when no candidate clears the confidence floor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackMode {
    Bottom,
    Center,
    FullPage,
}

/// Immutable tuning vector for one layout kind.
#[derive(Debug, Clone, Copy)]
pub struct DetectionProfile {
    pub key: LayoutMode,
    pub prefer_bottom: bool,
    pub confidence_threshold: f64,
    pub area_target: f64,
    pub area_tolerance: f64,
    pub page_aspect_target: f64,
    pub page_aspect_tolerance: f64,
    pub strip_aspect_target: f64,
    pub strip_aspect_tolerance: f64,
    pub center_y_target: f64,
    pub center_y_tolerance: f64,
    pub fallback_mode: FallbackMode,
}

impl DetectionProfile {
    /// Smallest contour area ratio worth scoring for this layout.
    pub fn min_area_ratio(&self) -> f64 {
        (self.area_target - self.area_tolerance).clamp(0.02, 0.5)
    }

    /// Widest aspect ratio a rotated-rect candidate may have.
    pub fn max_aspect(&self) -> f64 {
        self.strip_aspect_target + self.strip_aspect_tolerance
    }

    /// Region history length used for temporal smoothing.
    pub fn history_len(&self) -> usize {
        match self.key {
            LayoutMode::PageTurn => 3,
            _ => 5,
        }
    }
}

const BOTTOM_BAR_PROFILE: DetectionProfile = DetectionProfile {
    key: LayoutMode::BottomBar,
    prefer_bottom: true,
    confidence_threshold: 0.42,
    area_target: 0.24,
    area_tolerance: 0.34,
    page_aspect_target: 1.35,
    page_aspect_tolerance: 1.1,
    strip_aspect_target: 4.5,
    strip_aspect_tolerance: 3.6,
    center_y_target: 0.81,
    center_y_tolerance: 0.34,
    fallback_mode: FallbackMode::Bottom,
};

const FULL_SCROLL_PROFILE: DetectionProfile = DetectionProfile {
    key: LayoutMode::FullScroll,
    prefer_bottom: false,
    confidence_threshold: 0.36,
    area_target: 0.64,
    area_tolerance: 0.38,
    page_aspect_target: 1.6,
    page_aspect_tolerance: 1.25,
    strip_aspect_target: 3.0,
    strip_aspect_tolerance: 2.4,
    center_y_target: 0.52,
    center_y_tolerance: 0.45,
    fallback_mode: FallbackMode::FullPage,
};

const PAGE_TURN_PROFILE: DetectionProfile = DetectionProfile {
    key: LayoutMode::PageTurn,
    prefer_bottom: false,
    confidence_threshold: 0.34,
    area_target: 0.62,
    area_tolerance: 0.4,
    page_aspect_target: 1.55,
    page_aspect_tolerance: 1.35,
    strip_aspect_target: 2.8,
    strip_aspect_tolerance: 2.2,
    center_y_target: 0.52,
    center_y_tolerance: 0.48,
    fallback_mode: FallbackMode::FullPage,
};

impl LayoutMode {
    pub fn profile(&self) -> &'static DetectionProfile {
        match self {
            LayoutMode::BottomBar => &BOTTOM_BAR_PROFILE,
            LayoutMode::FullScroll => &FULL_SCROLL_PROFILE,
            LayoutMode::PageTurn => &PAGE_TURN_PROFILE,
        }
    }

    /// Remap the user overlap threshold into this layout's operating band.
    ///
    /// Monotone non-decreasing in the raw value; the output stays inside the
    /// advertised band. Page-turn sources never stitch, so the band collapses
    /// to the similarity regime handled by the page splitter.
    pub fn effective_overlap_threshold(&self, raw: f64) -> f64 {
        let raw = raw.clamp(0.0, 1.0);
        let (lo, hi) = self.overlap_band();
        lo + raw * (hi - lo)
    }

    /// The advertised (low, high) band of the effective overlap threshold.
    pub fn overlap_band(&self) -> (f64, f64) {
        match self {
            LayoutMode::FullScroll => (0.62, 0.94),
            LayoutMode::BottomBar => (0.55, 0.90),
            LayoutMode::PageTurn => (0.88, 0.98),
        }
    }
}

/// Resolve the effective layout for a job.
///
/// Precedence: an explicit layout hint wins over `prefer_bottom`; both win
/// over source-kind inference (stream sources default to the bottom strip,
/// local files to a full scroll).
pub fn resolve_layout_hint(
    hint: LayoutHint,
    source_kind: SourceKind,
    prefer_bottom: Option<bool>,
) -> LayoutMode {
    match hint {
        LayoutHint::BottomBar => return LayoutMode::BottomBar,
        LayoutHint::FullScroll => return LayoutMode::FullScroll,
        LayoutHint::PageTurn => return LayoutMode::PageTurn,
        LayoutHint::Auto => {}
    }
    match prefer_bottom {
        Some(true) => return LayoutMode::BottomBar,
        Some(false) => return LayoutMode::FullScroll,
        None => {}
    }
    match source_kind {
        SourceKind::Youtube => LayoutMode::BottomBar,
        SourceKind::File => LayoutMode::FullScroll,
    }
}
