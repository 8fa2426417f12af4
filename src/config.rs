use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::calibration::{builtin_references, ReferenceObjectSpec};
use crate::detect::DEFAULT_IOU_THRESHOLD;
use crate::normalize::clamp_threshold;
use crate::pacing::DEFAULT_REFRESH_HZ;
use crate::scheduler::{
    clamp_interval_ms, clamp_max_detections, DEFAULT_CONFIDENCE_THRESHOLD,
    DEFAULT_DETECTION_INTERVAL_MS, DEFAULT_MAX_DETECTIONS,
};
use crate::volume::{builtin_shapes, ShapeKind, ShapeModel};

const DEFAULT_BACKEND: &str = "scene";
const DEFAULT_SOURCE_URL: &str = "stub://table_camera";
const DEFAULT_SOURCE_WIDTH: u32 = 640;
const DEFAULT_SOURCE_HEIGHT: u32 = 480;

#[derive(Debug, Deserialize, Default)]
struct MeasureConfigFile {
    backend: Option<String>,
    source: Option<SourceConfigFile>,
    detection: Option<DetectionConfigFile>,
    snapshot_path: Option<PathBuf>,
    model: Option<ModelConfigFile>,
    #[serde(default)]
    reference_objects: Vec<ReferenceObjectFile>,
    #[serde(default)]
    shape_models: Vec<ShapeModelFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    url: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    refresh_hz: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    interval_ms: Option<u64>,
    confidence_threshold: Option<f32>,
    max_detections: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct ModelConfigFile {
    path: PathBuf,
    #[serde(default)]
    labels: Vec<String>,
    iou_threshold: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct ReferenceObjectFile {
    class: String,
    width_mm: f64,
    height_mm: f64,
}

#[derive(Debug, Deserialize)]
struct ShapeModelFile {
    class: String,
    shape: ShapeKind,
    avg_diameter_mm: f64,
    avg_height_mm: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct MeasureConfig {
    pub backend: String,
    pub source: SourceSettings,
    pub detection: DetectionSettings,
    /// Append snapshots as JSON lines when set.
    pub snapshot_path: Option<PathBuf>,
    /// ONNX detector, used by builds with the `backend-tract` feature.
    pub model: Option<ModelSettings>,
    /// Built-ins merged with file entries; file entries win by class label.
    pub reference_objects: Vec<ReferenceObjectSpec>,
    pub shape_models: Vec<ShapeModel>,
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub refresh_hz: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelSettings {
    pub path: PathBuf,
    /// Class labels in model output order.
    pub labels: Vec<String>,
    /// Same-class boxes overlapping more than this are merged.
    pub iou_threshold: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectionSettings {
    pub interval_ms: u64,
    pub confidence_threshold: f32,
    pub max_detections: usize,
}

impl Default for MeasureConfig {
    fn default() -> Self {
        // The empty file has no fallible parts.
        Self::from_file(MeasureConfigFile::default())
    }
}

impl MeasureConfig {
    /// Defaults, then `$SCALECAM_CONFIG` (JSON, or TOML for `.toml` paths),
    /// then `SCALECAM_*` environment overrides, then validation.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SCALECAM_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: MeasureConfigFile) -> Self {
        let source = file.source.unwrap_or_default();
        let detection = file.detection.unwrap_or_default();

        let mut reference_objects = builtin_references();
        for entry in file.reference_objects {
            reference_objects.retain(|spec| spec.class != entry.class);
            reference_objects.push(ReferenceObjectSpec::new(
                &entry.class,
                entry.width_mm,
                entry.height_mm,
            ));
        }

        let mut shape_models = builtin_shapes();
        for entry in file.shape_models {
            shape_models.retain(|model| model.class != entry.class);
            shape_models.push(ShapeModel {
                class: entry.class,
                shape: entry.shape,
                avg_diameter_mm: entry.avg_diameter_mm,
                avg_height_mm: entry.avg_height_mm,
            });
        }

        Self {
            backend: file
                .backend
                .unwrap_or_else(|| DEFAULT_BACKEND.to_string()),
            source: SourceSettings {
                url: source
                    .url
                    .unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string()),
                width: source.width.unwrap_or(DEFAULT_SOURCE_WIDTH),
                height: source.height.unwrap_or(DEFAULT_SOURCE_HEIGHT),
                refresh_hz: source.refresh_hz.unwrap_or(DEFAULT_REFRESH_HZ),
            },
            detection: DetectionSettings {
                interval_ms: detection
                    .interval_ms
                    .unwrap_or(DEFAULT_DETECTION_INTERVAL_MS),
                confidence_threshold: detection
                    .confidence_threshold
                    .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
                max_detections: detection.max_detections.unwrap_or(DEFAULT_MAX_DETECTIONS),
            },
            snapshot_path: file.snapshot_path,
            model: file.model.map(|model| ModelSettings {
                path: model.path,
                labels: model.labels,
                iou_threshold: model.iou_threshold.unwrap_or(DEFAULT_IOU_THRESHOLD),
            }),
            reference_objects,
            shape_models,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(backend) = std::env::var("SCALECAM_BACKEND") {
            if !backend.trim().is_empty() {
                self.backend = backend.trim().to_string();
            }
        }
        if let Ok(url) = std::env::var("SCALECAM_SOURCE_URL") {
            if !url.trim().is_empty() {
                self.source.url = url;
            }
        }
        if let Ok(path) = std::env::var("SCALECAM_SNAPSHOT_PATH") {
            if !path.trim().is_empty() {
                self.snapshot_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(path) = std::env::var("SCALECAM_MODEL_PATH") {
            if !path.trim().is_empty() {
                let path = PathBuf::from(path);
                match self.model.as_mut() {
                    Some(model) => model.path = path,
                    None => {
                        self.model = Some(ModelSettings {
                            path,
                            labels: Vec::new(),
                            iou_threshold: DEFAULT_IOU_THRESHOLD,
                        })
                    }
                }
            }
        }
        if let Ok(interval) = std::env::var("SCALECAM_DETECTION_INTERVAL_MS") {
            self.detection.interval_ms = interval.trim().parse().map_err(|_| {
                anyhow!("SCALECAM_DETECTION_INTERVAL_MS must be an integer number of milliseconds")
            })?;
        }
        if let Ok(threshold) = std::env::var("SCALECAM_CONFIDENCE_THRESHOLD") {
            self.detection.confidence_threshold = threshold
                .trim()
                .parse()
                .map_err(|_| anyhow!("SCALECAM_CONFIDENCE_THRESHOLD must be a number"))?;
        }
        if let Ok(max) = std::env::var("SCALECAM_MAX_DETECTIONS") {
            self.detection.max_detections = max
                .trim()
                .parse()
                .map_err(|_| anyhow!("SCALECAM_MAX_DETECTIONS must be an integer"))?;
        }
        Ok(())
    }

    /// Out-of-range tuning values are clamped; malformed tables are errors.
    fn validate(&mut self) -> Result<()> {
        self.detection.interval_ms = clamp_interval_ms(self.detection.interval_ms);
        self.detection.confidence_threshold =
            clamp_threshold(self.detection.confidence_threshold);
        self.detection.max_detections = clamp_max_detections(self.detection.max_detections);

        if self.source.width == 0 || self.source.height == 0 {
            return Err(anyhow!("source width and height must be greater than zero"));
        }
        if self.source.refresh_hz == 0 {
            return Err(anyhow!("source refresh_hz must be greater than zero"));
        }

        if let Some(model) = &self.model {
            if model.labels.is_empty() {
                return Err(anyhow!(
                    "model {} needs class labels in output order",
                    model.path.display()
                ));
            }
            for label in &model.labels {
                crate::validate_class_label(label)?;
            }
            let iou = model.iou_threshold;
            if iou.is_nan() || iou <= 0.0 || iou > 1.0 {
                return Err(anyhow!(
                    "model iou_threshold must be in (0, 1], got {}",
                    iou
                ));
            }
        }

        for spec in &self.reference_objects {
            crate::validate_class_label(&spec.class)?;
            if !positive(spec.width_mm) || !positive(spec.height_mm) {
                return Err(anyhow!(
                    "reference object {:?} needs positive width_mm and height_mm",
                    spec.class
                ));
            }
        }
        for model in &self.shape_models {
            crate::validate_class_label(&model.class)?;
            if model.avg_diameter_mm.is_nan() || model.avg_diameter_mm < 0.0 {
                return Err(anyhow!(
                    "shape model {:?} has an invalid avg_diameter_mm",
                    model.class
                ));
            }
        }
        Ok(())
    }
}

fn positive(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

fn read_config_file(path: &Path) -> Result<MeasureConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
