//! measure_demo - deterministic end-to-end run over the synthetic scene
//!
//! Simulated time: the scheduler runs on a manual clock advanced by one
//! display frame per tick, so a multi-second run finishes immediately.

use anyhow::{Context, Result};
use clap::Parser;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use scalecam::detect::SharedBackend;
use scalecam::{
    ChannelObserver, DetectionScheduler, FanoutObserver, JsonLinesObserver, ManualClock,
    ObserverEvent, SceneBackend, StubConfig, StubSource, TickOutcome, VolumeEstimate,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Simulated run length in seconds.
    #[arg(long, default_value_t = 5)]
    seconds: u64,
    /// Simulated display refresh rate.
    #[arg(long, default_value_t = 60)]
    refresh_hz: u32,
    /// Detection sampling interval (clamped to at least 50ms).
    #[arg(long, default_value_t = 100)]
    interval_ms: u64,
    /// Confidence threshold (clamped to [0.1, 1.0]).
    #[arg(long, default_value_t = 0.5)]
    threshold: f32,
    /// Maximum detections per sample (clamped to [1, 50]).
    #[arg(long, default_value_t = 10)]
    max_detections: usize,
    /// Box edge jitter in pixels.
    #[arg(long, default_value_t = 2.0)]
    jitter: f32,
    /// Leave the credit card out of the scene.
    #[arg(long)]
    no_reference: bool,
    /// Write every snapshot to this file as JSON lines.
    #[arg(long)]
    out: Option<PathBuf>,
    /// Optional deterministic seed for the synthetic scene.
    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    stage("build synthetic scene + source");
    let mut scene = match args.seed {
        Some(seed) => SceneBackend::with_seed(seed),
        None => SceneBackend::new(),
    }
    .with_jitter(args.jitter);
    if args.no_reference {
        scene = scene.without_class("credit card");
    }
    let backend: SharedBackend = Arc::new(Mutex::new(scene));

    let mut source = StubSource::new(StubConfig {
        url: "stub://demo_table".to_string(),
        width: 640,
        height: 480,
    });
    source.connect()?;

    let (channel, rx) = ChannelObserver::new();
    let mut observer = FanoutObserver::new().with(Box::new(channel));
    if let Some(path) = &args.out {
        let file = File::create(path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        observer = observer.with(Box::new(JsonLinesObserver::new(BufWriter::new(file))));
    }

    let clock = ManualClock::new();
    let mut scheduler = DetectionScheduler::with_clock(backend, Box::new(observer), clock.clone());
    scheduler.set_detection_interval_ms(args.interval_ms);
    scheduler.set_confidence_threshold(args.threshold);
    scheduler.set_max_detections(args.max_detections);

    stage("run scheduler");
    let refresh_hz = args.refresh_hz.max(1);
    let frame_period = std::time::Duration::from_secs(1) / refresh_hz;
    let total_ticks = args.seconds * u64::from(refresh_hz);
    scheduler.start();
    for _ in 0..total_ticks {
        if matches!(
            scheduler.tick(&mut source),
            TickOutcome::Stopped | TickOutcome::Idle
        ) {
            break;
        }
        clock.advance(frame_period);
    }
    let stats = scheduler.stats();
    let calibration = scheduler.calibration();
    let samples = scheduler.samples_total();
    let failures = scheduler.failures_total();
    scheduler.stop();
    // Closes the JSON lines writer.
    drop(scheduler);

    stage("collect results");
    let mut latest: BTreeMap<String, VolumeEstimate> = BTreeMap::new();
    let mut snapshots = 0u64;
    let mut errors = Vec::new();
    for event in rx.try_iter() {
        match event {
            ObserverEvent::Snapshot(snapshot) => {
                snapshots += 1;
                for (det, est) in snapshot.detections.iter().zip(snapshot.estimates) {
                    latest.insert(det.class.clone(), est);
                }
            }
            ObserverEvent::DetectionError(message) => errors.push(message),
        }
    }

    println!("demo summary:");
    println!("  ticks simulated: {}", total_ticks);
    println!("  samples processed: {} ({} failed)", samples, failures);
    println!("  snapshots published: {}", snapshots);
    println!("  detection fps (last window): {}", stats.fps);
    match (calibration.mm_per_pixel, &calibration.calibration_object_class) {
        (Some(scale), Some(class)) => {
            println!("  calibration: {:.4} mm/px from {}", scale, class)
        }
        _ => println!("  calibration: none (no reference object seen)"),
    }
    println!("  latest estimates:");
    for (class, est) in &latest {
        match (est.volume_cm3, est.error) {
            (Some(volume), _) => println!(
                "    {}: {:.2} x {:.2} mm, ~{:.2} cm3",
                class,
                est.real_width_mm.unwrap_or_default(),
                est.real_height_mm.unwrap_or_default(),
                volume
            ),
            (None, Some(error)) => println!("    {}: {:?}", class, error),
            (None, None) => println!("    {}: -", class),
        }
    }
    for message in errors.iter().take(3) {
        println!("  sample error: {}", message);
    }
    if let Some(path) = &args.out {
        println!("  snapshots written to: {}", path.display());
    }
    println!("next steps:");
    println!("  cargo run --bin measure_demo -- --seed 7 --no-reference");
    println!("  SCALECAM_SNAPSHOT_PATH=snapshots.jsonl cargo run --bin measured");

    Ok(())
}

fn stage(msg: &str) {
    eprintln!("demo: {}", msg);
}
