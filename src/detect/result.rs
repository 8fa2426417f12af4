use serde::{Deserialize, Serialize};

/// Detection as reported by a backend, before normalization.
///
/// Geometry is in source pixels and may be fractional, negative or extend
/// past the frame edges.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    pub class: String,
    /// Nominally in `0.0..=1.0`.
    pub score: f32,
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
}

impl RawDetection {
    pub fn new(class: impl Into<String>, score: f32, bbox: [f32; 4]) -> Self {
        let [left, top, width, height] = bbox;
        Self {
            class: class.into(),
            score,
            left,
            top,
            width,
            height,
        }
    }
}

/// Integer pixel bounding box. Every field is non-negative by construction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn is_degenerate(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Canonical detection produced by `normalize`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class: String,
    /// Rounded to two decimals, within `[threshold, 1.0]`.
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// Options forwarded to the backend on every sample.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DetectOptions {
    pub min_score: f32,
    /// Result-count cap. Backends enforce it; the scheduler does not.
    pub max_results: usize,
}

impl Default for DetectOptions {
    fn default() -> Self {
        Self {
            min_score: 0.5,
            max_results: 10,
        }
    }
}
