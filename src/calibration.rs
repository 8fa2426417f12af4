//! Scale calibration from reference objects of known size.
//!
//! When a reference object (a credit card by default) is detected, its
//! bounding box yields a millimeters-per-pixel estimate. Successive estimates
//! are blended with a fixed-weight exponential moving average so that
//! per-frame box jitter does not make the scale wander.
//!
//! Calibration never expires on its own. Callers that want a staleness
//! policy read `last_calibration_at` and call `reset`.

use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::detect::Detection;

/// Weight of the previous scale in the moving average.
pub const SMOOTHING_RETAIN: f64 = 0.9;
/// Weight of the new candidate scale in the moving average.
pub const SMOOTHING_BLEND: f64 = 0.1;

/// Known physical size of a reference object class.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReferenceObjectSpec {
    pub class: String,
    pub width_mm: f64,
    pub height_mm: f64,
    /// `width_mm * height_mm`. Not used by calibration.
    pub area_mm2: f64,
}

impl ReferenceObjectSpec {
    pub fn new(class: &str, width_mm: f64, height_mm: f64) -> Self {
        Self {
            class: class.to_string(),
            width_mm,
            height_mm,
            area_mm2: width_mm * height_mm,
        }
    }
}

/// Built-in reference table: ISO/IEC 7810 ID-1 card.
pub fn builtin_references() -> Vec<ReferenceObjectSpec> {
    vec![ReferenceObjectSpec::new("credit card", 85.6, 53.98)]
}

/// Calibration result owned by `CalibrationEngine`.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CalibrationState {
    pub mm_per_pixel: Option<f64>,
    pub is_calibrated: bool,
    pub calibration_object_class: Option<String>,
    #[serde(skip)]
    pub last_calibration_at: Option<Instant>,
}

pub struct CalibrationEngine {
    references: Vec<ReferenceObjectSpec>,
    state: CalibrationState,
}

impl CalibrationEngine {
    pub fn new() -> Self {
        Self::with_references(builtin_references())
    }

    pub fn with_references(references: Vec<ReferenceObjectSpec>) -> Self {
        Self {
            references,
            state: CalibrationState::default(),
        }
    }

    pub fn references(&self) -> &[ReferenceObjectSpec] {
        &self.references
    }

    fn reference_for(&self, class: &str) -> Option<&ReferenceObjectSpec> {
        self.references.iter().find(|spec| spec.class == class)
    }

    /// Calibrate from a frame's detections, timestamped with `Instant::now()`.
    pub fn update(&mut self, detections: &[Detection]) -> bool {
        self.update_at(detections, Instant::now())
    }

    /// Calibrate from a frame's detections.
    ///
    /// Uses the first detection (in the given, confidence-ranked order) whose
    /// class is a reference object and whose box has non-zero width and
    /// height. Degenerate boxes are skipped as if absent. Returns `false`,
    /// leaving state untouched, when no usable reference is present.
    pub fn update_at(&mut self, detections: &[Detection], now: Instant) -> bool {
        let found = detections.iter().find_map(|det| {
            let spec = self.reference_for(&det.class)?;
            if det.bbox.is_degenerate() {
                log::debug!(
                    "skipping degenerate {} box {}x{}",
                    det.class,
                    det.bbox.width,
                    det.bbox.height
                );
                return None;
            }
            let from_width = spec.width_mm / f64::from(det.bbox.width);
            let from_height = spec.height_mm / f64::from(det.bbox.height);
            Some((spec.class.clone(), (from_width + from_height) / 2.0))
        });

        let Some((class, candidate)) = found else {
            return false;
        };
        if !candidate.is_finite() || candidate <= 0.0 {
            return false;
        }

        let smoothed = match self.state.mm_per_pixel {
            Some(previous) => previous * SMOOTHING_RETAIN + candidate * SMOOTHING_BLEND,
            None => candidate,
        };
        log::debug!(
            "calibrated from {}: candidate={:.4} mm/px, smoothed={:.4} mm/px",
            class,
            candidate,
            smoothed
        );

        self.state.mm_per_pixel = Some(smoothed);
        self.state.is_calibrated = true;
        self.state.calibration_object_class = Some(class);
        self.state.last_calibration_at = Some(now);
        true
    }

    /// Read-only snapshot of the current state.
    pub fn status(&self) -> CalibrationState {
        self.state.clone()
    }

    pub fn is_calibrated(&self) -> bool {
        self.state.is_calibrated
    }

    /// Forget the current scale. Idempotent.
    pub fn reset(&mut self) {
        self.state = CalibrationState::default();
    }
}

impl Default for CalibrationEngine {
    fn default() -> Self {
        Self::new()
    }
}
