#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::nms::{suppress_overlaps, DEFAULT_IOU_THRESHOLD};
use crate::detect::result::{DetectOptions, RawDetection};
use crate::frame::Frame;

/// Tract-based backend for YOLO-style ONNX detectors.
///
/// Expects a single output of shape `[1, 4 + classes, anchors]` where the
/// first four rows are `cx, cy, w, h` in input pixels and the remaining rows
/// are per-class scores. Overlapping anchors of the same class are merged
/// with non-maximum suppression. The model input must match the frame size;
/// resizing belongs to the frame source.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>,
    width: u32,
    height: u32,
    labels: Vec<String>,
    iou_threshold: f32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        width: u32,
        height: u32,
        labels: Vec<String>,
    ) -> Result<Self> {
        if labels.is_empty() {
            return Err(anyhow!("tract backend needs at least one class label"));
        }
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            width,
            height,
            labels,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
        })
    }

    pub fn with_iou_threshold(mut self, iou_threshold: f32) -> Self {
        self.iou_threshold = iou_threshold;
        self
    }

    fn build_input(&self, frame: &Frame) -> Result<Tensor> {
        if frame.width != self.width || frame.height != self.height {
            return Err(anyhow!(
                "frame size {}x{} does not match model input {}x{}",
                frame.width,
                frame.height,
                self.width,
                self.height
            ));
        }
        if !frame.is_rgb() {
            return Err(anyhow!(
                "expected {}x{} RGB frame, received {} bytes",
                frame.width,
                frame.height,
                frame.byte_len()
            ));
        }

        let pixels = frame.pixels();
        let width = frame.width as usize;
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, frame.height as usize, width),
            |(_, channel, y, x)| {
                let idx = (y * width + x) * 3 + channel;
                pixels[idx] as f32 / 255.0
            },
        );

        Ok(input.into_tensor())
    }
}

/// Decode a `[1, 4 + classes, anchors]` output into per-object detections.
fn decode_output(
    view: tract_ndarray::ArrayViewD<'_, f32>,
    labels: &[String],
    options: DetectOptions,
    iou_threshold: f32,
) -> Result<Vec<RawDetection>> {
    let shape = view.shape().to_vec();
    if shape.len() != 3 || shape[0] != 1 || shape[1] != 4 + labels.len() {
        return Err(anyhow!(
            "unexpected output shape {:?} for {} classes",
            shape,
            labels.len()
        ));
    }

    let mut candidates = Vec::new();
    for anchor in 0..shape[2] {
        let (class_idx, score) = (0..labels.len())
            .map(|c| (c, view[[0, 4 + c, anchor]]))
            .fold((0, f32::NEG_INFINITY), |best, cur| {
                if cur.1 > best.1 {
                    cur
                } else {
                    best
                }
            });
        if !score.is_finite() || score < options.min_score {
            continue;
        }
        let cx = view[[0, 0, anchor]];
        let cy = view[[0, 1, anchor]];
        let w = view[[0, 2, anchor]];
        let h = view[[0, 3, anchor]];
        candidates.push(RawDetection::new(
            labels[class_idx].clone(),
            score,
            [cx - w / 2.0, cy - h / 2.0, w, h],
        ));
    }

    let mut detections = suppress_overlaps(candidates, iou_threshold);
    detections.truncate(options.max_results);
    Ok(detections)
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &Frame, options: DetectOptions) -> Result<Vec<RawDetection>> {
        let input = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        decode_output(view, &self.labels, options, self.iou_threshold)
    }
}
