//! Raw detections -> canonical `Detection`s.

use crate::detect::{BoundingBox, Detection, RawDetection};
use crate::round2;

/// Lowest accepted confidence threshold.
pub const MIN_CONFIDENCE_THRESHOLD: f32 = 0.1;
/// Highest accepted confidence threshold.
pub const MAX_CONFIDENCE_THRESHOLD: f32 = 1.0;

pub fn clamp_threshold(threshold: f32) -> f32 {
    if threshold.is_nan() {
        return MIN_CONFIDENCE_THRESHOLD;
    }
    threshold.clamp(MIN_CONFIDENCE_THRESHOLD, MAX_CONFIDENCE_THRESHOLD)
}

/// Filter, round and rank one frame's raw detections.
///
/// - scores below `threshold` (or not finite) are dropped
/// - confidence is rounded to two decimals, half away from zero (`round2`);
///   an entry whose rounded confidence falls below the threshold is dropped
///   as well, so every output satisfies `threshold <= confidence <= 1.0`
/// - box fields are rounded to the nearest integer, negatives become 0
/// - output is stably sorted by confidence, highest first
///
/// `threshold` is clamped to `[0.1, 1.0]`.
pub fn normalize(raw: &[RawDetection], threshold: f32) -> Vec<Detection> {
    let threshold = clamp_threshold(threshold);

    let mut detections: Vec<Detection> = raw
        .iter()
        .filter(|det| det.score.is_finite() && det.score >= threshold)
        .filter_map(|det| {
            let confidence = round2(f64::from(det.score.min(1.0))) as f32;
            if confidence < threshold {
                return None;
            }
            Some(Detection {
                class: det.class.clone(),
                confidence,
                bbox: BoundingBox {
                    x: round_px(det.left),
                    y: round_px(det.top),
                    width: round_px(det.width),
                    height: round_px(det.height),
                },
            })
        })
        .collect();

    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    detections
}

fn round_px(value: f32) -> u32 {
    if !value.is_finite() || value <= 0.0 {
        return 0;
    }
    // `as` saturates at u32::MAX.
    value.round() as u32
}
