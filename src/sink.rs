//! Snapshot observers.
//!
//! The scheduler publishes structured `Snapshot`s; presentation belongs to
//! the consumer. Observers cannot fail the scheduler: sink errors are logged
//! and dropped.

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::mpsc::{self, Receiver, Sender};

use crate::scheduler::Snapshot;
use crate::volume::VolumeError;

pub trait SnapshotObserver {
    /// Called once per processed sample.
    fn on_snapshot(&mut self, snapshot: &Snapshot);

    /// Called when a sample failed. The scheduler keeps running.
    fn on_detection_error(&mut self, error: &anyhow::Error) {
        log::warn!("detection sample failed: {:#}", error);
    }
}

/// Logs each snapshot at `debug`, volume estimates at `info`.
#[derive(Debug, Default)]
pub struct LogObserver {
    snapshots: u64,
}

impl LogObserver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotObserver for LogObserver {
    fn on_snapshot(&mut self, snapshot: &Snapshot) {
        self.snapshots += 1;
        log::debug!(
            "sample #{} frame={} detections={} fps={} mm_per_px={:?}",
            snapshot.sample,
            snapshot.frame_sequence,
            snapshot.detections.len(),
            snapshot.stats.fps,
            snapshot.calibration.mm_per_pixel
        );
        for (det, est) in snapshot.detections.iter().zip(&snapshot.estimates) {
            match (est.error, est.volume_cm3) {
                (None, Some(volume)) => log::info!(
                    "{} ({:.2}): {:.2} x {:.2} mm, ~{:.2} cm3",
                    det.class,
                    det.confidence,
                    est.real_width_mm.unwrap_or_default(),
                    est.real_height_mm.unwrap_or_default(),
                    volume
                ),
                (Some(VolumeError::NotCalibrated), _) => {
                    log::debug!("{}: waiting for a reference object", det.class)
                }
                _ => {}
            }
        }
    }
}

/// Writes one JSON object per snapshot, newline-delimited.
pub struct JsonLinesObserver<W: Write> {
    writer: W,
    written: u64,
}

impl<W: Write> JsonLinesObserver<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, written: 0 }
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_line(&mut self, snapshot: &Snapshot) -> Result<()> {
        serde_json::to_writer(&mut self.writer, snapshot)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

impl JsonLinesObserver<BufWriter<std::fs::File>> {
    /// Append to `path`, creating it if needed.
    pub fn append_to(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open snapshot file {}", path.display()))?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> SnapshotObserver for JsonLinesObserver<W> {
    fn on_snapshot(&mut self, snapshot: &Snapshot) {
        match self.write_line(snapshot) {
            Ok(()) => self.written += 1,
            Err(e) => log::warn!("snapshot write failed: {:#}", e),
        }
    }
}

/// Event forwarded by `ChannelObserver`.
#[derive(Clone, Debug)]
pub enum ObserverEvent {
    Snapshot(Snapshot),
    DetectionError(String),
}

/// Forwards snapshots and sample failures over an mpsc channel.
pub struct ChannelObserver {
    tx: Sender<ObserverEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, Receiver<ObserverEvent>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: ObserverEvent) {
        if self.tx.send(event).is_err() {
            log::debug!("snapshot receiver dropped");
        }
    }
}

impl SnapshotObserver for ChannelObserver {
    fn on_snapshot(&mut self, snapshot: &Snapshot) {
        self.send(ObserverEvent::Snapshot(snapshot.clone()));
    }

    fn on_detection_error(&mut self, error: &anyhow::Error) {
        self.send(ObserverEvent::DetectionError(format!("{:#}", error)));
    }
}

/// Delivers every event to each inner observer, in order.
#[derive(Default)]
pub struct FanoutObserver {
    observers: Vec<Box<dyn SnapshotObserver>>,
}

impl FanoutObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, observer: Box<dyn SnapshotObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl SnapshotObserver for FanoutObserver {
    fn on_snapshot(&mut self, snapshot: &Snapshot) {
        for observer in &mut self.observers {
            observer.on_snapshot(snapshot);
        }
    }

    fn on_detection_error(&mut self, error: &anyhow::Error) {
        for observer in &mut self.observers {
            observer.on_detection_error(error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::CalibrationState;
    use crate::detect::{BoundingBox, Detection};
    use crate::scheduler::DetectionStats;
    use crate::volume::VolumeEstimate;

    fn snapshot() -> Snapshot {
        Snapshot {
            sample: 3,
            frame_sequence: 7,
            detections: vec![Detection {
                class: "apple".to_string(),
                confidence: 0.88,
                bbox: BoundingBox {
                    x: 1,
                    y: 2,
                    width: 100,
                    height: 96,
                },
            }],
            estimates: vec![VolumeEstimate {
                volume_cm3: Some(65.45),
                real_width_mm: Some(50.0),
                real_height_mm: Some(48.0),
                error: None,
            }],
            calibration: CalibrationState {
                mm_per_pixel: Some(0.5),
                is_calibrated: true,
                calibration_object_class: Some("credit card".to_string()),
                last_calibration_at: None,
            },
            calibration_age_ms: Some(120),
            stats: DetectionStats {
                is_active: true,
                fps: 10,
                last_detection_count: 1,
                confidence_threshold: 0.5,
                detection_interval_ms: 100,
            },
        }
    }

    #[test]
    fn json_lines_writes_one_object_per_snapshot() {
        let mut observer = JsonLinesObserver::new(Vec::new());
        observer.on_snapshot(&snapshot());
        observer.on_snapshot(&snapshot());
        assert_eq!(observer.written(), 2);

        let out = String::from_utf8(observer.into_inner()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);

        let value: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(value["sample"], 3);
        assert_eq!(value["detections"][0]["class"], "apple");
        assert_eq!(value["estimates"][0]["volume_cm3"], 65.45);
        assert_eq!(value["estimates"][0]["error"], serde_json::Value::Null);
        assert_eq!(value["calibration"]["mm_per_pixel"], 0.5);
        assert_eq!(value["calibration_age_ms"], 120);
        assert!(value["calibration"].get("last_calibration_at").is_none());
    }

    #[test]
    fn volume_errors_serialize_in_snake_case() {
        let mut snap = snapshot();
        snap.estimates[0] = VolumeEstimate {
            error: Some(VolumeError::NotCalibrated),
            ..VolumeEstimate::default()
        };
        let value = serde_json::to_value(&snap).unwrap();
        assert_eq!(value["estimates"][0]["error"], "not_calibrated");
    }

    #[test]
    fn fanout_delivers_to_every_observer() {
        let (first, rx1) = ChannelObserver::new();
        let (second, rx2) = ChannelObserver::new();
        let mut fanout = FanoutObserver::new()
            .with(Box::new(first))
            .with(Box::new(second));
        assert_eq!(fanout.len(), 2);

        fanout.on_snapshot(&snapshot());
        fanout.on_detection_error(&anyhow::anyhow!("camera unplugged"));

        for rx in [rx1, rx2] {
            assert!(matches!(rx.try_recv().unwrap(), ObserverEvent::Snapshot(_)));
            match rx.try_recv().unwrap() {
                ObserverEvent::DetectionError(message) => assert_eq!(message, "camera unplugged"),
                other => panic!("unexpected event {:?}", other),
            }
        }
    }

    #[test]
    fn channel_observer_survives_dropped_receiver() {
        let (mut observer, rx) = ChannelObserver::new();
        drop(rx);
        observer.on_snapshot(&snapshot());
    }
}
