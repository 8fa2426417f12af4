//! measured - rulerless measurement daemon
//!
//! This daemon:
//! 1. Loads configuration (`SCALECAM_CONFIG` plus `SCALECAM_*` overrides)
//! 2. Opens the configured frame source and detector backend
//! 3. Ticks the detection scheduler once per display refresh
//! 4. Logs sizes and volumes, optionally appending snapshots as JSON lines
//! 5. Stops cleanly on Ctrl-C

use anyhow::{anyhow, Result};
use std::time::{Duration, Instant};

use scalecam::{
    ingest, BackendRegistry, CalibrationEngine, DetectionScheduler, FanoutObserver, FramePacer,
    IntervalPacer, JsonLinesObserver, LogObserver, MeasureConfig, TickOutcome, VolumeEstimator,
};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = MeasureConfig::load()?;

    let mut registry = BackendRegistry::with_builtin();
    register_model(&mut registry, &cfg)?;
    let backend = registry.resolve(Some(&cfg.backend))?;
    backend
        .lock()
        .map_err(|_| anyhow!("detector backend lock poisoned"))?
        .warm_up()?;
    log::info!(
        "detector backend: {} (available: {})",
        cfg.backend,
        registry.list().join(", ")
    );

    let mut source = ingest::open_source(&cfg.source.url, cfg.source.width, cfg.source.height)?;

    let mut observer = FanoutObserver::new().with(Box::new(LogObserver::new()));
    if let Some(path) = &cfg.snapshot_path {
        observer = observer.with(Box::new(JsonLinesObserver::append_to(path)?));
        log::info!("appending snapshots to {}", path.display());
    }

    let calibration = CalibrationEngine::with_references(cfg.reference_objects.clone());
    let estimator = VolumeEstimator::with_shapes(cfg.shape_models.clone());
    log::info!(
        "reference objects: {}",
        calibration
            .references()
            .iter()
            .map(|spec| format!("{} ({}x{} mm)", spec.class, spec.width_mm, spec.height_mm))
            .collect::<Vec<_>>()
            .join(", ")
    );
    log::info!(
        "shape models: {}",
        estimator
            .shapes()
            .iter()
            .map(|model| format!("{} ({:?})", model.class, model.shape))
            .collect::<Vec<_>>()
            .join(", ")
    );

    let mut scheduler = DetectionScheduler::new(backend, Box::new(observer))
        .with_calibration(calibration)
        .with_estimator(estimator);
    scheduler.set_detection_interval_ms(cfg.detection.interval_ms);
    scheduler.set_confidence_threshold(cfg.detection.confidence_threshold);
    scheduler.set_max_detections(cfg.detection.max_detections);

    let stop = scheduler.stop_handle();
    ctrlc::set_handler(move || {
        stop.request_stop();
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    let mut pacer = IntervalPacer::from_hz(cfg.source.refresh_hz);
    let mut last_health_log = Instant::now();

    log::info!(
        "measured running. source={} {}x{} @ {} Hz",
        cfg.source.url,
        cfg.source.width,
        cfg.source.height,
        cfg.source.refresh_hz
    );
    scheduler.start();
    loop {
        if matches!(
            scheduler.tick(source.as_mut()),
            TickOutcome::Stopped | TickOutcome::Idle
        ) {
            break;
        }

        if last_health_log.elapsed() >= Duration::from_secs(5) {
            let stats = scheduler.stats();
            let calibration = scheduler.calibration();
            log::info!(
                "source health={} frames={} fps={} samples={} failures={} mm_per_px={}",
                source.is_healthy(),
                source.frames_captured(),
                stats.fps,
                scheduler.samples_total(),
                scheduler.failures_total(),
                calibration
                    .mm_per_pixel
                    .map(|scale| format!("{:.4}", scale))
                    .unwrap_or_else(|| "uncalibrated".to_string())
            );
            last_health_log = Instant::now();
        }

        pacer.wait_next_frame();
    }

    log::info!(
        "shutdown complete: {} samples, {} failed",
        scheduler.samples_total(),
        scheduler.failures_total()
    );
    Ok(())
}

#[cfg(feature = "backend-tract")]
fn register_model(registry: &mut BackendRegistry, cfg: &MeasureConfig) -> Result<()> {
    if let Some(model) = &cfg.model {
        registry.register(scalecam::detect::TractBackend::new(
            &model.path,
            cfg.source.width,
            cfg.source.height,
            model.labels.clone(),
        )?
        .with_iou_threshold(model.iou_threshold));
        log::info!("loaded ONNX model {}", model.path.display());
    }
    Ok(())
}

#[cfg(not(feature = "backend-tract"))]
fn register_model(_registry: &mut BackendRegistry, cfg: &MeasureConfig) -> Result<()> {
    if let Some(model) = &cfg.model {
        log::warn!(
            "ignoring model {}: built without the backend-tract feature",
            model.path.display()
        );
    }
    Ok(())
}
