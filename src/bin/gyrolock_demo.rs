//! gyrolock-demo - simulated camera and IMU driving a live tracker
//!
//! The device sweeps left and right past a single target. A camera thread
//! pushes frames, an IMU thread pushes noisy rotation vectors, and the main
//! thread drains observer notifications until the run ends or Ctrl-C.

use anyhow::{anyhow, Result};
use clap::Parser;
use crossbeam_channel::RecvTimeoutError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use gyro_lock::{
    ChannelObserver, DetectionBox, FieldOfView, Frame, PushFrameSource, PushOrientationSource,
    Rect, ScriptedBackend, StaticIntrinsics, Tracker, TrackerConfig, TrackerEvent,
};

const FRAME_WIDTH: u32 = 640;
const FRAME_HEIGHT: u32 = 480;
const HORIZONTAL_FOV_DEG: f32 = 64.0;
const VERTICAL_FOV_DEG: f32 = 48.0;
/// Where the target sits in the image when the device faces azimuth 0.
const TARGET_AT_REST: Rect = Rect {
    left: 280.0,
    top: 200.0,
    right: 360.0,
    bottom: 280.0,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Run length in seconds.
    #[arg(long, default_value_t = 20)]
    seconds: u64,
    /// Camera frames per second.
    #[arg(long, default_value_t = 15)]
    fps: u32,
    /// Orientation samples per second.
    #[arg(long, default_value_t = 50)]
    imu_hz: u32,
    /// Peak sweep angle in degrees either side of the target.
    #[arg(long, default_value_t = 45.0)]
    sweep_deg: f32,
    /// Seconds for one full left-right sweep.
    #[arg(long, default_value_t = 8.0)]
    sweep_period_s: f32,
    /// Label to lock onto. Falls back to the configured target, then "cup".
    #[arg(long)]
    target: Option<String>,
    /// Tracker config file (JSON, or TOML by extension).
    #[arg(long, env = "GYROLOCK_CONFIG")]
    config: Option<PathBuf>,
    /// Seed for IMU noise.
    #[arg(long)]
    seed: Option<u64>,
}

/// Simulated device heading, shared by both producer threads.
#[derive(Clone, Copy)]
struct Sweep {
    started: Instant,
    peak_deg: f32,
    period_s: f32,
}

impl Sweep {
    fn azimuth_deg(&self) -> f32 {
        let t = self.started.elapsed().as_secs_f32();
        self.peak_deg * (std::f32::consts::TAU * t / self.period_s).sin()
    }
}

/// What inference would see at the current heading.
fn visible_detections(label: &str, azimuth_deg: f32) -> Vec<DetectionBox> {
    let pixels_per_degree = FRAME_WIDTH as f32 / HORIZONTAL_FOV_DEG;
    let rect = TARGET_AT_REST.translate(-azimuth_deg * pixels_per_degree, 0.0);
    if rect.is_outside_frame(FRAME_WIDTH, FRAME_HEIGHT) {
        return Vec::new();
    }
    vec![
        DetectionBox::new(label, 0.82, rect),
        DetectionBox::new("bottle", 0.71, rect.translate(150.0, 20.0)),
    ]
}

/// Three-component rotation vector for a pure azimuth turn.
fn rotation_vector(azimuth_deg: f32) -> [f32; 3] {
    let half = (-azimuth_deg / 2.0).to_radians();
    [0.0, 0.0, half.sin()]
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    if args.fps == 0 || args.imu_hz == 0 {
        return Err(anyhow!("fps and imu-hz must be >= 1"));
    }
    if args.sweep_period_s.is_nan() || args.sweep_period_s <= 0.0 {
        return Err(anyhow!("sweep-period-s must be positive"));
    }

    let mut config = match &args.config {
        Some(path) => TrackerConfig::load_from(path)?,
        None => TrackerConfig::load()?,
    };
    if let Some(target) = args.target.clone() {
        config = config.with_target(target);
    }
    let label = config
        .target_label
        .clone()
        .unwrap_or_else(|| "cup".to_string());
    config = config.with_target(label.clone());

    let engine = ScriptedBackend::new();
    let camera = PushFrameSource::new();
    let imu = PushOrientationSource::new();
    let (observer, events) = ChannelObserver::unbounded();
    let tracker = Tracker::builder(config, engine.clone())
        .intrinsics(StaticIntrinsics::new(FieldOfView::new(
            HORIZONTAL_FOV_DEG,
            VERTICAL_FOV_DEG,
        )))
        .orientation_source(Arc::new(imu.clone()))
        .observer(Arc::new(observer))
        .build();
    tracker.attach_camera(&camera)?;

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || stop.store(true, Ordering::SeqCst))
            .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;
    }

    let sweep = Sweep {
        started: Instant::now(),
        peak_deg: args.sweep_deg,
        period_s: args.sweep_period_s,
    };
    let deadline = sweep.started + Duration::from_secs(args.seconds);

    let camera_thread = {
        let stop = Arc::clone(&stop);
        let interval = Duration::from_secs_f64(1.0 / f64::from(args.fps));
        let label = label.clone();
        thread::spawn(move || {
            while !stop.load(Ordering::SeqCst) && Instant::now() < deadline {
                engine.set_steady(visible_detections(&label, sweep.azimuth_deg()));
                camera.emit(&Frame::metadata_only(FRAME_WIDTH, FRAME_HEIGHT, "back"));
                thread::sleep(interval);
            }
        })
    };

    let imu_thread = {
        let stop = Arc::clone(&stop);
        let interval = Duration::from_secs_f64(1.0 / f64::from(args.imu_hz));
        let mut rng = match args.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        thread::spawn(move || {
            while !stop.load(Ordering::SeqCst) && Instant::now() < deadline {
                let noise: f32 = rng.gen_range(-0.3..0.3);
                imu.emit(&rotation_vector(sweep.azimuth_deg() + noise));
                thread::sleep(interval);
            }
        })
    };

    log::info!(
        "demo running for {}s looking for {} (Ctrl-C to stop)",
        args.seconds,
        label
    );
    let (mut locks, mut updates) = (0usize, 0usize);
    while !stop.load(Ordering::SeqCst) && Instant::now() < deadline {
        match events.recv_timeout(Duration::from_millis(100)) {
            Ok(TrackerEvent::LockAcquired { detection, .. }) => {
                locks += 1;
                log::info!(
                    "lock #{} on {} ({:.2}) at azimuth {:.1}",
                    locks,
                    detection.label,
                    detection.confidence,
                    sweep.azimuth_deg()
                );
            }
            Ok(TrackerEvent::LockLost) => {
                let azimuth = tracker
                    .latest_orientation()
                    .map(|o| o.azimuth.to_degrees())
                    .unwrap_or_default();
                log::info!("lock lost at measured azimuth {:.1}", azimuth);
            }
            Ok(TrackerEvent::BoxUpdated {
                detection: Some(detection),
                ..
            }) => {
                updates += 1;
                let r = detection.rect;
                log::info!(
                    "box {} -> ({:.0}, {:.0}, {:.0}, {:.0})",
                    detection.label,
                    r.left,
                    r.top,
                    r.right,
                    r.bottom
                );
            }
            Ok(_) => {}
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    stop.store(true, Ordering::SeqCst);
    tracker.shutdown();
    if camera_thread.join().is_err() || imu_thread.join().is_err() {
        return Err(anyhow!("producer thread panicked"));
    }
    log::info!(
        "demo finished: {} locks, {} box updates, final state {:?}",
        locks,
        updates,
        tracker.current_state()
    );
    Ok(())
}
