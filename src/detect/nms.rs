//! Non-maximum suppression for backends that emit raw anchor predictions.

use super::result::RawDetection;

pub const DEFAULT_IOU_THRESHOLD: f32 = 0.45;

/// Intersection over union of two boxes. Empty or disjoint boxes give 0.
pub fn iou(a: &RawDetection, b: &RawDetection) -> f32 {
    let x1 = a.left.max(b.left);
    let y1 = a.top.max(b.top);
    let x2 = (a.left + a.width).min(b.left + b.width);
    let y2 = (a.top + a.height).min(b.top + b.height);
    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = a.width.max(0.0) * a.height.max(0.0) + b.width.max(0.0) * b.height.max(0.0)
        - intersection;
    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

/// Greedy per-class suppression, highest score first.
///
/// A box is dropped when it overlaps an already kept box of the same class
/// by more than `iou_threshold`. Output is sorted by score, descending.
pub fn suppress_overlaps(
    mut detections: Vec<RawDetection>,
    iou_threshold: f32,
) -> Vec<RawDetection> {
    detections.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut kept: Vec<RawDetection> = Vec::with_capacity(detections.len());
    for det in detections {
        let overlaps = kept
            .iter()
            .any(|k| k.class == det.class && iou(k, &det) > iou_threshold);
        if !overlaps {
            kept.push(det);
        }
    }
    kept
}
