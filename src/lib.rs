//! scalecam: rulerless size and volume estimation
//!
//! This crate turns a stream of per-frame object detections into real-world
//! size and volume estimates without a physical ruler.
//!
//! # Architecture
//!
//! Each processed sampling tick flows one way:
//!
//! 1. **Scheduling**: `DetectionScheduler` decides when to pull a detection
//!    batch from a `DetectorBackend` and tracks detections per second.
//! 2. **Normalization**: raw detections are filtered by confidence, rounded to
//!    integer pixel geometry and ranked by confidence.
//! 3. **Calibration**: a reference object of known size (a credit card by
//!    default) yields a smoothed millimeters-per-pixel scale.
//! 4. **Volume inference**: per-class shape models convert bounding boxes into
//!    an estimated volume in cubic centimeters.
//! 5. **Publication**: a `Snapshot` is handed to a `SnapshotObserver`.
//!
//! # Module Structure
//!
//! - `frame`, `ingest`: frames and the sources that produce them
//! - `detect`: detector backend trait, registry and backends
//! - `normalize`, `calibration`, `volume`: the measurement core
//! - `scheduler`, `pacing`: the tick state machine and frame pacing
//! - `sink`: snapshot observers (log, JSON lines, channel)
//! - `config`: file + environment configuration

use anyhow::{anyhow, Result};
use std::sync::OnceLock;

pub mod calibration;
pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod normalize;
pub mod pacing;
pub mod scheduler;
pub mod sink;
pub mod volume;

pub use calibration::{CalibrationEngine, CalibrationState, ReferenceObjectSpec};
pub use config::MeasureConfig;
pub use detect::{
    BackendRegistry, BoundingBox, DetectOptions, Detection, DetectorBackend, RawDetection,
    SceneBackend, StubBackend,
};
pub use frame::Frame;
pub use ingest::{FrameSource, StubConfig, StubSource};
pub use normalize::normalize;
pub use pacing::{FramePacer, IntervalPacer};
pub use scheduler::{
    Clock, DetectionScheduler, DetectionStats, ManualClock, SchedulerState, Snapshot, StopHandle,
    SystemClock, TickOutcome,
};
pub use sink::{
    ChannelObserver, FanoutObserver, JsonLinesObserver, LogObserver, ObserverEvent,
    SnapshotObserver,
};
pub use volume::{estimate, ShapeKind, ShapeModel, VolumeError, VolumeEstimate, VolumeEstimator};

/// Rounds to two decimal places, half away from zero.
///
/// `f64::round` rounds half-way cases away from zero, so `0.125 -> 0.13` and
/// `-0.125 -> -0.13`. Inputs that are not exactly representable round
/// according to their binary value (`1.005` is stored slightly below and
/// becomes `1.0`).
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// -------------------- Class Label Discipline --------------------

/// Class labels are matched verbatim against model output, so table entries
/// must already be in the model's lowercase vocabulary.
///
/// Allowed: "credit card", "apple", "wine-glass", "cup_2"
/// Disallowed: uppercase, leading whitespace, punctuation outside [ _-].
pub fn validate_class_label(label: &str) -> Result<()> {
    static CLASS_LABEL_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = CLASS_LABEL_RE.get_or_init(|| {
        regex::Regex::new(r"^[a-z0-9][a-z0-9 _-]{0,63}$").expect("class label pattern")
    });

    if !re.is_match(label) {
        return Err(anyhow!(
            "class label {:?} must match ^[a-z0-9][a-z0-9 _-]{{0,63}}$",
            label
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round2_rounds_half_away_from_zero() {
        assert_eq!(round2(0.125), 0.13);
        assert_eq!(round2(-0.125), -0.13);
        assert_eq!(round2(0.875), 0.88);
        assert_eq!(round2(65.4498), 65.45);
        assert_eq!(round2(3.0), 3.0);
    }

    #[test]
    fn class_labels_follow_model_vocabulary() {
        assert!(validate_class_label("credit card").is_ok());
        assert!(validate_class_label("wine-glass").is_ok());
        assert!(validate_class_label("cup_2").is_ok());
        assert!(validate_class_label("Credit Card").is_err());
        assert!(validate_class_label(" apple").is_err());
        assert!(validate_class_label("").is_err());
        assert!(validate_class_label("apple/pear").is_err());
    }
}
