use anyhow::{anyhow, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{DetectOptions, RawDetection};
use crate::frame::Frame;

/// Width the default scene is laid out for. Boxes scale with the frame width.
const SCENE_REFERENCE_WIDTH: f32 = 640.0;

/// An object placed in the synthetic scene, in 640px-wide coordinates.
#[derive(Clone, Debug)]
pub struct SceneObject {
    pub class: String,
    pub score: f32,
    pub bbox: [f32; 4],
}

impl SceneObject {
    pub fn new(class: &str, score: f32, bbox: [f32; 4]) -> Self {
        Self {
            class: class.to_string(),
            score,
            bbox,
        }
    }
}

/// Synthetic detector: a table-top scene with a credit card next to a few
/// everyday objects.
///
/// Every call perturbs box edges by up to `jitter_px` and scores by up to
/// 0.03, which is the per-frame noise calibration smoothing exists for.
pub struct SceneBackend {
    objects: Vec<SceneObject>,
    jitter_px: f32,
    rng: StdRng,
}

impl SceneBackend {
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_entropy())
    }

    /// Deterministic scene for reproducible runs.
    pub fn with_seed(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(rng: StdRng) -> Self {
        Self {
            objects: default_scene(),
            jitter_px: 2.0,
            rng,
        }
    }

    pub fn with_objects(mut self, objects: Vec<SceneObject>) -> Self {
        self.objects = objects;
        self
    }

    /// Remove every object of `class` from the scene.
    pub fn without_class(mut self, class: &str) -> Self {
        self.objects.retain(|object| object.class != class);
        self
    }

    pub fn with_jitter(mut self, jitter_px: f32) -> Self {
        self.jitter_px = jitter_px.max(0.0);
        self
    }

    fn jitter(&mut self, amplitude: f32) -> f32 {
        if amplitude > 0.0 {
            self.rng.gen_range(-amplitude..=amplitude)
        } else {
            0.0
        }
    }
}

impl Default for SceneBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn default_scene() -> Vec<SceneObject> {
    vec![
        SceneObject::new("credit card", 0.92, [40.0, 300.0, 200.0, 126.0]),
        SceneObject::new("apple", 0.88, [300.0, 220.0, 100.0, 96.0]),
        SceneObject::new("cup", 0.81, [430.0, 150.0, 120.0, 140.0]),
        SceneObject::new("bowl", 0.64, [260.0, 60.0, 180.0, 90.0]),
        SceneObject::new("book", 0.58, [20.0, 40.0, 150.0, 210.0]),
    ]
}

impl DetectorBackend for SceneBackend {
    fn name(&self) -> &'static str {
        "scene"
    }

    fn detect(&mut self, frame: &Frame, options: DetectOptions) -> Result<Vec<RawDetection>> {
        if frame.width == 0 || frame.height == 0 {
            return Err(anyhow!("empty frame {}x{}", frame.width, frame.height));
        }
        let scale = frame.width as f32 / SCENE_REFERENCE_WIDTH;
        let jitter_px = self.jitter_px;

        let objects = self.objects.clone();
        let mut detections = Vec::with_capacity(objects.len());
        for object in objects {
            let score = (object.score + self.jitter(0.03)).clamp(0.0, 1.0);
            if score < options.min_score {
                continue;
            }
            let [left, top, width, height] = object.bbox;
            detections.push(RawDetection::new(
                object.class,
                score,
                [
                    left * scale + self.jitter(jitter_px),
                    top * scale + self.jitter(jitter_px),
                    width * scale + self.jitter(jitter_px),
                    height * scale + self.jitter(jitter_px),
                ],
            ));
            if detections.len() >= options.max_results {
                break;
            }
        }
        Ok(detections)
    }
}
