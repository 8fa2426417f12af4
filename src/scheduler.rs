//! Detection scheduler: the per-frame tick state machine.
//!
//! The host calls `tick` once per display frame (or runs `run` with a
//! `FramePacer`). Each tick:
//!
//! 1. rolls the one-second FPS window when it has elapsed
//! 2. if the sampling interval has elapsed, pulls a frame, calls the backend,
//!    normalizes the result, updates calibration, estimates volumes and
//!    publishes a `Snapshot`
//!
//! The backend call is synchronous inside `tick`, so at most one call is in
//! flight and its result is consumed before the next sample starts. A
//! backend call that never returns stalls the loop; there is no timeout.

use anyhow::{anyhow, Result};
use serde::Serialize;
use std::cell::Cell;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::calibration::{CalibrationEngine, CalibrationState};
use crate::detect::{DetectOptions, Detection, RawDetection, SharedBackend};
use crate::ingest::FrameSource;
use crate::normalize::{clamp_threshold, normalize};
use crate::pacing::FramePacer;
use crate::sink::SnapshotObserver;
use crate::volume::{VolumeEstimate, VolumeEstimator};

pub const DEFAULT_DETECTION_INTERVAL_MS: u64 = 100;
pub const MIN_DETECTION_INTERVAL_MS: u64 = 50;
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
pub const DEFAULT_MAX_DETECTIONS: usize = 10;
pub const MIN_MAX_DETECTIONS: usize = 1;
pub const MAX_MAX_DETECTIONS: usize = 50;

const FPS_WINDOW: Duration = Duration::from_millis(1000);

pub fn clamp_interval_ms(interval_ms: u64) -> u64 {
    interval_ms.max(MIN_DETECTION_INTERVAL_MS)
}

pub fn clamp_max_detections(max_detections: usize) -> usize {
    max_detections.clamp(MIN_MAX_DETECTIONS, MAX_MAX_DETECTIONS)
}

/// Monotonic time source. Injected so tests can drive time by hand.
pub trait Clock {
    fn now(&self) -> Instant;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Hand-driven clock. Clones share the same time.
#[derive(Clone, Debug)]
pub struct ManualClock {
    now: Rc<Cell<Instant>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Rc::new(Cell::new(Instant::now())),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }

    pub fn advance_ms(&self, ms: u64) {
        self.advance(Duration::from_millis(ms));
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.now.get()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    Running,
}

/// Scheduler bookkeeping, overwritten every tick.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DetectionStats {
    pub is_active: bool,
    /// Samples taken during the last completed one-second window.
    pub fps: u32,
    pub last_detection_count: usize,
    pub confidence_threshold: f32,
    pub detection_interval_ms: u64,
}

/// Everything one processed sample produced.
#[derive(Clone, Debug, Serialize)]
pub struct Snapshot {
    /// 1-based count of successful samples since construction.
    pub sample: u64,
    pub frame_sequence: u64,
    pub detections: Vec<Detection>,
    /// One estimate per entry in `detections`, same order.
    pub estimates: Vec<VolumeEstimate>,
    pub calibration: CalibrationState,
    /// Time since the last successful calibration, when calibrated.
    pub calibration_age_ms: Option<u64>,
    pub stats: DetectionStats,
}

/// What a single `tick` did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// Scheduler is not running.
    Idle,
    /// A stop was requested through a `StopHandle`; the scheduler is now idle.
    Stopped,
    /// Running, sampling interval not yet elapsed.
    Waiting,
    /// A sample was processed and a snapshot published.
    Sampled { detections: usize },
    /// The frame source or backend failed; reported to the observer.
    Failed,
}

/// Thread-safe stop request, e.g. for a Ctrl-C handler.
///
/// The request is honored at the start of the next running tick, before any
/// work. While idle it stays pending until `start` clears it.
#[derive(Clone, Debug)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn request_stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

pub struct DetectionScheduler<C: Clock = SystemClock> {
    backend: SharedBackend,
    observer: Box<dyn SnapshotObserver>,
    clock: C,
    calibration: CalibrationEngine,
    estimator: VolumeEstimator,
    state: SchedulerState,
    stop_flag: Arc<AtomicBool>,
    detection_interval_ms: u64,
    confidence_threshold: f32,
    max_detections: usize,
    samples_in_window: u32,
    fps_window_start: Instant,
    last_sample_at: Option<Instant>,
    stats: DetectionStats,
    last_snapshot: Option<Snapshot>,
    samples_total: u64,
    failures_total: u64,
}

impl DetectionScheduler<SystemClock> {
    pub fn new(backend: SharedBackend, observer: Box<dyn SnapshotObserver>) -> Self {
        Self::with_clock(backend, observer, SystemClock)
    }
}

impl<C: Clock> DetectionScheduler<C> {
    pub fn with_clock(backend: SharedBackend, observer: Box<dyn SnapshotObserver>, clock: C) -> Self {
        let now = clock.now();
        Self {
            backend,
            observer,
            clock,
            calibration: CalibrationEngine::new(),
            estimator: VolumeEstimator::new(),
            state: SchedulerState::Idle,
            stop_flag: Arc::new(AtomicBool::new(false)),
            detection_interval_ms: DEFAULT_DETECTION_INTERVAL_MS,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            max_detections: DEFAULT_MAX_DETECTIONS,
            samples_in_window: 0,
            fps_window_start: now,
            last_sample_at: None,
            stats: DetectionStats {
                is_active: false,
                fps: 0,
                last_detection_count: 0,
                confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
                detection_interval_ms: DEFAULT_DETECTION_INTERVAL_MS,
            },
            last_snapshot: None,
            samples_total: 0,
            failures_total: 0,
        }
    }

    pub fn with_calibration(mut self, calibration: CalibrationEngine) -> Self {
        self.calibration = calibration;
        self
    }

    pub fn with_estimator(mut self, estimator: VolumeEstimator) -> Self {
        self.estimator = estimator;
        self
    }

    // -------------------- State machine --------------------

    /// Idle -> Running. No-op when already running.
    pub fn start(&mut self) {
        if self.state == SchedulerState::Running {
            log::debug!("scheduler already running");
            return;
        }
        let now = self.clock.now();
        self.state = SchedulerState::Running;
        self.stop_flag.store(false, Ordering::SeqCst);
        self.samples_in_window = 0;
        self.fps_window_start = now;
        self.last_sample_at = None;
        self.stats.is_active = true;
        log::info!(
            "detection scheduler started (interval={}ms, threshold={:.2}, max_detections={})",
            self.detection_interval_ms,
            self.confidence_threshold,
            self.max_detections
        );
    }

    /// Running -> Idle. Clears the last snapshot; later ticks do nothing
    /// until `start` is called again. Safe to call in any state.
    pub fn stop(&mut self) {
        self.last_snapshot = None;
        self.stats.is_active = false;
        self.stats.fps = 0;
        if self.state == SchedulerState::Idle {
            return;
        }
        self.state = SchedulerState::Idle;
        log::info!(
            "detection scheduler stopped after {} samples ({} failed)",
            self.samples_total,
            self.failures_total
        );
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            flag: Arc::clone(&self.stop_flag),
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == SchedulerState::Running
    }

    /// One scheduling step. Call once per display frame.
    pub fn tick(&mut self, source: &mut dyn FrameSource) -> TickOutcome {
        if self.state == SchedulerState::Idle {
            return TickOutcome::Idle;
        }
        if self.stop_flag.swap(false, Ordering::SeqCst) {
            self.stop();
            return TickOutcome::Stopped;
        }

        let now = self.clock.now();
        if now.duration_since(self.fps_window_start) >= FPS_WINDOW {
            self.stats.fps = self.samples_in_window;
            self.samples_in_window = 0;
            self.fps_window_start = now;
            log::debug!("detection fps={}", self.stats.fps);
        }

        let interval = Duration::from_millis(self.detection_interval_ms);
        let due = self
            .last_sample_at
            .map_or(true, |last| now.duration_since(last) >= interval);
        if !due {
            return TickOutcome::Waiting;
        }

        // Only successful samples start a new interval; a failure is retried
        // on the next tick.
        match self.sample(source) {
            Ok((frame_sequence, raw)) => {
                self.last_sample_at = Some(now);
                self.samples_in_window += 1;
                let count = self.process(frame_sequence, &raw, now);
                TickOutcome::Sampled { detections: count }
            }
            Err(e) => {
                self.failures_total += 1;
                self.observer.on_detection_error(&e);
                TickOutcome::Failed
            }
        }
    }

    /// Start (if idle) and tick until stopped, waiting on `pacer` between ticks.
    pub fn run(&mut self, source: &mut dyn FrameSource, pacer: &mut dyn FramePacer) {
        self.start();
        loop {
            if matches!(self.tick(source), TickOutcome::Stopped | TickOutcome::Idle) {
                break;
            }
            pacer.wait_next_frame();
        }
    }

    fn sample(&mut self, source: &mut dyn FrameSource) -> Result<(u64, Vec<RawDetection>)> {
        let frame = source.next_frame()?;
        let options = DetectOptions {
            min_score: self.confidence_threshold,
            max_results: self.max_detections,
        };
        let mut backend = self
            .backend
            .lock()
            .map_err(|_| anyhow!("detector backend lock poisoned"))?;
        let raw = backend.detect(&frame, options)?;
        Ok((frame.sequence, raw))
    }

    fn process(&mut self, frame_sequence: u64, raw: &[RawDetection], now: Instant) -> usize {
        let detections = normalize(raw, self.confidence_threshold);
        let was_calibrated = self.calibration.is_calibrated();
        if self.calibration.update_at(&detections, now) && !was_calibrated {
            log::info!(
                "calibrated: {:.4} mm/px from {}",
                self.calibration.status().mm_per_pixel.unwrap_or_default(),
                self.calibration
                    .status()
                    .calibration_object_class
                    .unwrap_or_default()
            );
        }
        let calibration = self.calibration.status();
        let estimates = detections
            .iter()
            .map(|det| self.estimator.estimate(det, &calibration))
            .collect();

        self.samples_total += 1;
        self.stats.last_detection_count = detections.len();
        let count = detections.len();
        let calibration_age_ms = calibration
            .last_calibration_at
            .map(|at| now.saturating_duration_since(at).as_millis() as u64);

        let snapshot = Snapshot {
            sample: self.samples_total,
            frame_sequence,
            detections,
            estimates,
            calibration,
            calibration_age_ms,
            stats: self.stats.clone(),
        };
        self.observer.on_snapshot(&snapshot);
        self.last_snapshot = Some(snapshot);
        count
    }

    // -------------------- Configuration --------------------

    /// Clamped to at least 50ms.
    pub fn set_detection_interval_ms(&mut self, interval_ms: u64) {
        let clamped = clamp_interval_ms(interval_ms);
        if clamped != interval_ms {
            log::debug!("detection interval {}ms clamped to {}ms", interval_ms, clamped);
        }
        self.detection_interval_ms = clamped;
        self.stats.detection_interval_ms = clamped;
    }

    /// Clamped to `[0.1, 1.0]`.
    pub fn set_confidence_threshold(&mut self, threshold: f32) {
        let clamped = clamp_threshold(threshold);
        if clamped != threshold {
            log::debug!("confidence threshold {} clamped to {}", threshold, clamped);
        }
        self.confidence_threshold = clamped;
        self.stats.confidence_threshold = clamped;
    }

    /// Clamped to `[1, 50]`; passed to the backend as a result cap.
    pub fn set_max_detections(&mut self, max_detections: usize) {
        let clamped = clamp_max_detections(max_detections);
        if clamped != max_detections {
            log::debug!("max detections {} clamped to {}", max_detections, clamped);
        }
        self.max_detections = clamped;
    }

    pub fn detection_interval_ms(&self) -> u64 {
        self.detection_interval_ms
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.confidence_threshold
    }

    pub fn max_detections(&self) -> usize {
        self.max_detections
    }

    // -------------------- Read access --------------------

    pub fn stats(&self) -> DetectionStats {
        self.stats.clone()
    }

    pub fn last_snapshot(&self) -> Option<&Snapshot> {
        self.last_snapshot.as_ref()
    }

    pub fn calibration(&self) -> CalibrationState {
        self.calibration.status()
    }

    /// Drop the current scale; the next reference sighting recalibrates.
    pub fn reset_calibration(&mut self) {
        self.calibration.reset();
    }

    pub fn samples_total(&self) -> u64 {
        self.samples_total
    }

    pub fn failures_total(&self) -> u64 {
        self.failures_total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::StubBackend;
    use crate::ingest::{StubConfig, StubSource};
    use crate::sink::{ChannelObserver, ObserverEvent};
    use std::sync::mpsc::Receiver;
    use std::sync::Mutex;

    fn card() -> RawDetection {
        RawDetection::new("credit card", 0.93, [40.0, 300.0, 200.0, 126.0])
    }

    fn apple() -> RawDetection {
        RawDetection::new("apple", 0.88, [300.0, 220.0, 100.0, 96.0])
    }

    fn source() -> StubSource {
        let mut source = StubSource::new(StubConfig {
            url: "stub://scheduler".to_string(),
            width: 8,
            height: 8,
        });
        source.connect().unwrap();
        source
    }

    fn scheduler(
        backend: StubBackend,
    ) -> (
        DetectionScheduler<ManualClock>,
        ManualClock,
        Receiver<ObserverEvent>,
    ) {
        let clock = ManualClock::new();
        let (observer, rx) = ChannelObserver::new();
        let backend: SharedBackend = Arc::new(Mutex::new(backend));
        let scheduler = DetectionScheduler::with_clock(backend, Box::new(observer), clock.clone());
        (scheduler, clock, rx)
    }

    #[test]
    fn idle_scheduler_does_not_sample() {
        let (mut sched, _clock, rx) = scheduler(StubBackend::new());
        let mut src = source();
        assert_eq!(sched.tick(&mut src), TickOutcome::Idle);
        assert!(rx.try_recv().is_err());
        assert_eq!(src.frames_captured(), 0);
    }

    #[test]
    fn samples_respect_interval() {
        let (mut sched, clock, _rx) = scheduler(StubBackend::new());
        let mut src = source();
        sched.start();

        assert!(matches!(sched.tick(&mut src), TickOutcome::Sampled { .. }));
        clock.advance_ms(16);
        assert_eq!(sched.tick(&mut src), TickOutcome::Waiting);
        clock.advance_ms(84);
        assert!(matches!(sched.tick(&mut src), TickOutcome::Sampled { .. }));
        assert_eq!(sched.samples_total(), 2);
    }

    #[test]
    fn fps_counts_samples_per_window() {
        let (mut sched, clock, _rx) = scheduler(StubBackend::new());
        let mut src = source();
        sched.start();

        // 100 Hz ticks for one second at the default 100ms interval.
        for _ in 0..100 {
            sched.tick(&mut src);
            clock.advance_ms(10);
        }
        assert_eq!(sched.stats().fps, 0);
        sched.tick(&mut src);
        assert_eq!(sched.stats().fps, 10);
    }

    #[test]
    fn failures_are_reported_and_scheduler_keeps_running() {
        let mut backend = StubBackend::new();
        backend.push_failure("inference timeout");
        backend.push_detections(vec![card()]);
        let (mut sched, clock, rx) = scheduler(backend);
        let mut src = source();
        sched.start();

        assert_eq!(sched.tick(&mut src), TickOutcome::Failed);
        match rx.try_recv().unwrap() {
            ObserverEvent::DetectionError(message) => {
                assert!(message.contains("inference timeout"))
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(sched.is_running());

        clock.advance_ms(100);
        assert_eq!(sched.tick(&mut src), TickOutcome::Sampled { detections: 1 });
        assert_eq!(sched.failures_total(), 1);
    }

    #[test]
    fn failed_sample_is_retried_on_next_tick() {
        let mut backend = StubBackend::new();
        backend.push_failure("camera busy").push_detections(vec![apple()]);
        let (mut sched, clock, _rx) = scheduler(backend);
        let mut src = source();
        sched.start();

        assert_eq!(sched.tick(&mut src), TickOutcome::Failed);
        clock.advance_ms(16);
        assert_eq!(sched.tick(&mut src), TickOutcome::Sampled { detections: 1 });
        // The success starts a fresh interval.
        clock.advance_ms(16);
        assert_eq!(sched.tick(&mut src), TickOutcome::Waiting);
        assert_eq!(sched.failures_total(), 1);
        assert_eq!(sched.samples_total(), 1);
    }

    #[test]
    fn max_detections_caps_backend_results() {
        let backend = StubBackend::new().with_fallback(vec![card(), apple(), card()]);
        let (mut sched, clock, _rx) = scheduler(backend);
        let mut src = source();
        sched.set_max_detections(1);
        sched.start();

        assert_eq!(sched.tick(&mut src), TickOutcome::Sampled { detections: 1 });

        sched.set_max_detections(2);
        clock.advance_ms(100);
        assert_eq!(sched.tick(&mut src), TickOutcome::Sampled { detections: 2 });
    }

    #[test]
    fn confidence_threshold_reaches_backend() {
        // card 0.93, apple 0.88
        let backend = StubBackend::new().with_fallback(vec![card(), apple()]);
        let (mut sched, clock, _rx) = scheduler(backend);
        let mut src = source();
        sched.set_confidence_threshold(0.9);
        sched.start();

        assert_eq!(sched.tick(&mut src), TickOutcome::Sampled { detections: 1 });
        assert_eq!(
            sched.last_snapshot().unwrap().detections[0].class,
            "credit card"
        );

        sched.set_confidence_threshold(0.95);
        clock.advance_ms(100);
        assert_eq!(sched.tick(&mut src), TickOutcome::Sampled { detections: 0 });
    }

    #[test]
    fn snapshot_carries_calibration_and_estimates() {
        let mut backend = StubBackend::new();
        backend.push_detections(vec![apple(), card()]);
        let (mut sched, _clock, rx) = scheduler(backend);
        let mut src = source();
        sched.start();
        sched.tick(&mut src);

        let snapshot = match rx.try_recv().unwrap() {
            ObserverEvent::Snapshot(snapshot) => snapshot,
            other => panic!("unexpected event {:?}", other),
        };
        assert_eq!(snapshot.detections.len(), 2);
        assert_eq!(snapshot.detections[0].class, "credit card");
        assert_eq!(snapshot.estimates.len(), 2);
        assert!(snapshot.calibration.is_calibrated);
        assert_eq!(snapshot.calibration_age_ms, Some(0));
        // Reference object has no shape model.
        assert_eq!(
            snapshot.estimates[0].error,
            Some(crate::volume::VolumeError::UnknownClass)
        );
        assert!(snapshot.estimates[1].is_ok());
        assert_eq!(snapshot.stats.last_detection_count, 2);
        assert!(sched.last_snapshot().is_some());
    }

    #[test]
    fn stop_clears_snapshot_and_blocks_ticks() {
        let backend = StubBackend::new().with_fallback(vec![card()]);
        let (mut sched, clock, _rx) = scheduler(backend);
        let mut src = source();
        sched.start();
        sched.tick(&mut src);
        assert!(sched.last_snapshot().is_some());

        sched.stop();
        assert!(sched.last_snapshot().is_none());
        assert!(!sched.stats().is_active);
        clock.advance_ms(500);
        assert_eq!(sched.tick(&mut src), TickOutcome::Idle);
        sched.stop();
        assert_eq!(sched.state(), SchedulerState::Idle);
    }

    #[test]
    fn stop_handle_is_honored_before_sampling() {
        let (mut sched, _clock, _rx) = scheduler(StubBackend::new());
        let mut src = source();
        let handle = sched.stop_handle();
        sched.start();

        handle.request_stop();
        assert_eq!(sched.tick(&mut src), TickOutcome::Stopped);
        assert_eq!(src.frames_captured(), 0);
        assert_eq!(sched.tick(&mut src), TickOutcome::Idle);

        sched.start();
        assert!(!handle.is_stop_requested());
        assert!(matches!(sched.tick(&mut src), TickOutcome::Sampled { .. }));
    }

    #[test]
    fn stop_request_while_idle_is_not_reported_as_stopped() {
        let (mut sched, _clock, _rx) = scheduler(StubBackend::new());
        let mut src = source();
        sched.stop_handle().request_stop();

        assert_eq!(sched.tick(&mut src), TickOutcome::Idle);
        assert_eq!(sched.tick(&mut src), TickOutcome::Idle);

        sched.start();
        assert!(matches!(sched.tick(&mut src), TickOutcome::Sampled { .. }));
    }

    #[test]
    fn start_twice_is_a_noop() {
        let (mut sched, clock, _rx) = scheduler(StubBackend::new());
        let mut src = source();
        sched.start();
        sched.tick(&mut src);
        clock.advance_ms(20);
        sched.start();
        // The second start must not reset the sampling clock.
        assert_eq!(sched.tick(&mut src), TickOutcome::Waiting);
    }

    #[test]
    fn setters_clamp() {
        let (mut sched, _clock, _rx) = scheduler(StubBackend::new());
        sched.set_detection_interval_ms(10);
        assert_eq!(sched.detection_interval_ms(), 50);
        assert_eq!(sched.stats().detection_interval_ms, 50);
        sched.set_detection_interval_ms(250);
        assert_eq!(sched.detection_interval_ms(), 250);

        sched.set_confidence_threshold(0.01);
        assert_eq!(sched.confidence_threshold(), 0.1);
        sched.set_confidence_threshold(3.0);
        assert_eq!(sched.confidence_threshold(), 1.0);

        sched.set_max_detections(0);
        assert_eq!(sched.max_detections(), 1);
        sched.set_max_detections(500);
        assert_eq!(sched.max_detections(), 50);
    }

    #[test]
    fn run_stops_when_handle_fires() {
        struct StopAfter {
            remaining: u32,
            handle: StopHandle,
        }
        impl FramePacer for StopAfter {
            fn wait_next_frame(&mut self) {
                if self.remaining == 0 {
                    self.handle.request_stop();
                } else {
                    self.remaining -= 1;
                }
            }
        }

        let (mut sched, _clock, _rx) = scheduler(StubBackend::new());
        let mut src = source();
        let mut pacer = StopAfter {
            remaining: 3,
            handle: sched.stop_handle(),
        };
        sched.run(&mut src, &mut pacer);
        assert_eq!(sched.state(), SchedulerState::Idle);
        // Manual clock never advances: only the first tick samples.
        assert_eq!(sched.samples_total(), 1);
    }
}
