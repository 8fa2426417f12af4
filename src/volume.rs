//! Shape-model volume inference.
//!
//! A calibrated scale turns a detection's pixel box into millimeters; the
//! class's shape model then picks a volume formula. Average dimensions on
//! `ShapeModel` are descriptive only: the formula always uses the measured
//! box, never the class average.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::calibration::CalibrationState;
use crate::detect::Detection;
use crate::round2;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShapeKind {
    Sphere,
    Cylinder,
    Hemisphere,
    /// Anything a table entry does not name. Estimated as a box.
    #[serde(other)]
    Unspecified,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShapeModel {
    pub class: String,
    pub shape: ShapeKind,
    pub avg_diameter_mm: f64,
    /// Cylinders only.
    #[serde(default)]
    pub avg_height_mm: Option<f64>,
}

impl ShapeModel {
    pub fn new(class: &str, shape: ShapeKind, avg_diameter_mm: f64) -> Self {
        Self {
            class: class.to_string(),
            shape,
            avg_diameter_mm,
            avg_height_mm: None,
        }
    }

    pub fn cylinder(class: &str, avg_diameter_mm: f64, avg_height_mm: f64) -> Self {
        Self {
            class: class.to_string(),
            shape: ShapeKind::Cylinder,
            avg_diameter_mm,
            avg_height_mm: Some(avg_height_mm),
        }
    }
}

pub fn builtin_shapes() -> Vec<ShapeModel> {
    vec![
        ShapeModel::new("apple", ShapeKind::Sphere, 75.0),
        ShapeModel::new("orange", ShapeKind::Sphere, 70.0),
        ShapeModel::new("sports ball", ShapeKind::Sphere, 220.0),
        ShapeModel::cylinder("cup", 80.0, 95.0),
        ShapeModel::cylinder("bottle", 70.0, 250.0),
        ShapeModel::cylinder("can", 66.0, 122.0),
        ShapeModel::new("bowl", ShapeKind::Hemisphere, 150.0),
    ]
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeError {
    NotCalibrated,
    UnknownClass,
}

/// Per-detection result. `error` is `None` exactly when the measurements are
/// present.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct VolumeEstimate {
    pub volume_cm3: Option<f64>,
    pub real_width_mm: Option<f64>,
    pub real_height_mm: Option<f64>,
    pub error: Option<VolumeError>,
}

impl VolumeEstimate {
    fn failed(error: VolumeError) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Estimator over a shape table.
#[derive(Clone, Debug)]
pub struct VolumeEstimator {
    shapes: Vec<ShapeModel>,
}

impl VolumeEstimator {
    pub fn new() -> Self {
        Self::with_shapes(builtin_shapes())
    }

    pub fn with_shapes(shapes: Vec<ShapeModel>) -> Self {
        Self { shapes }
    }

    pub fn shapes(&self) -> &[ShapeModel] {
        &self.shapes
    }

    pub fn shape_for(&self, class: &str) -> Option<&ShapeModel> {
        self.shapes.iter().find(|model| model.class == class)
    }

    pub fn estimate(&self, detection: &Detection, calibration: &CalibrationState) -> VolumeEstimate {
        let mm_per_pixel = match calibration.mm_per_pixel {
            Some(scale) if calibration.is_calibrated => scale,
            _ => return VolumeEstimate::failed(VolumeError::NotCalibrated),
        };
        let Some(model) = self.shape_for(&detection.class) else {
            return VolumeEstimate::failed(VolumeError::UnknownClass);
        };

        let real_width_mm = f64::from(detection.bbox.width) * mm_per_pixel;
        let real_height_mm = f64::from(detection.bbox.height) * mm_per_pixel;
        let volume = shape_volume_cm3(model.shape, real_width_mm / 10.0, real_height_mm / 10.0);

        VolumeEstimate {
            volume_cm3: Some(round2(volume)),
            real_width_mm: Some(round2(real_width_mm)),
            real_height_mm: Some(round2(real_height_mm)),
            error: None,
        }
    }
}

impl Default for VolumeEstimator {
    fn default() -> Self {
        Self::new()
    }
}

/// Estimate with the built-in shape table.
pub fn estimate(detection: &Detection, calibration: &CalibrationState) -> VolumeEstimate {
    VolumeEstimator::new().estimate(detection, calibration)
}

fn shape_volume_cm3(shape: ShapeKind, width_cm: f64, height_cm: f64) -> f64 {
    let r = width_cm / 2.0;
    match shape {
        ShapeKind::Sphere => 4.0 / 3.0 * PI * r.powi(3),
        ShapeKind::Cylinder => PI * r.powi(2) * height_cm,
        ShapeKind::Hemisphere => 2.0 / 3.0 * PI * r.powi(3),
        ShapeKind::Unspecified => {
            let depth = (width_cm + height_cm) / 2.0;
            width_cm * height_cm * depth
        }
    }
}
