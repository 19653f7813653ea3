use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::{Builder, NamedTempFile};

use gyro_lock::TrackerConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "GYROLOCK_CONFIG",
        "GYROLOCK_TARGET",
        "GYROLOCK_CAMERA_ID",
        "GYROLOCK_CONFIDENCE_FLOOR",
        "GYROLOCK_SMOOTHING_ALPHA",
        "GYROLOCK_UPDATE_INTERVAL_MS",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_defaults_without_file_or_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = TrackerConfig::load().expect("load config");
    assert_eq!(cfg, TrackerConfig::default());
    assert_eq!(cfg.camera_id, "back");
    assert_eq!(cfg.target_label, None);
    assert_eq!(cfg.default_horizontal_fov_deg, 60.0);
    assert_eq!(cfg.default_vertical_fov_deg, 45.0);
}

#[test]
fn loads_json_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "target_label": "cup",
        "camera_id": "wide",
        "matching": { "confidence_floor": 0.7, "locked_confidence": 0.95 },
        "smoothing": { "alpha": 0.3, "update_interval_ms": 100 },
        "calibration": {
            "fallback_pixels_per_degree": 15.0,
            "default_horizontal_fov_deg": 70.0
        }
    }"#;
    file.write_all(json.as_bytes()).expect("write config");

    std::env::set_var("GYROLOCK_CONFIG", file.path());
    std::env::set_var("GYROLOCK_TARGET", "bottle");
    std::env::set_var("GYROLOCK_UPDATE_INTERVAL_MS", "400");

    let cfg = TrackerConfig::load().expect("load config");
    assert_eq!(cfg.target_label.as_deref(), Some("bottle"));
    assert_eq!(cfg.camera_id, "wide");
    assert_eq!(cfg.confidence_floor, 0.7);
    assert_eq!(cfg.locked_confidence, 0.95);
    assert_eq!(cfg.smoothing_alpha, 0.3);
    assert_eq!(cfg.update_interval, Duration::from_millis(400));
    assert_eq!(cfg.fallback_pixels_per_degree, 15.0);
    assert_eq!(cfg.default_horizontal_fov_deg, 70.0);
    assert_eq!(cfg.default_vertical_fov_deg, 45.0);

    clear_env();
}

#[test]
fn loads_toml_by_extension() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    let toml = r#"
target_label = "mug"

[smoothing]
alpha = 0.5
"#;
    file.write_all(toml.as_bytes()).expect("write config");

    let cfg = TrackerConfig::load_from(file.path()).expect("load config");
    assert_eq!(cfg.target_label.as_deref(), Some("mug"));
    assert_eq!(cfg.smoothing_alpha, 0.5);
    assert_eq!(cfg.confidence_floor, 0.6);
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("GYROLOCK_SMOOTHING_ALPHA", "1.5");
    let err = TrackerConfig::load().expect_err("alpha out of range");
    assert!(err.to_string().contains("alpha"));

    clear_env();
    std::env::set_var("GYROLOCK_CONFIDENCE_FLOOR", "high");
    assert!(TrackerConfig::load().is_err());

    clear_env();
    std::env::set_var("GYROLOCK_UPDATE_INTERVAL_MS", "0");
    assert!(TrackerConfig::load().is_err());

    clear_env();
}

#[test]
fn reports_unreadable_and_malformed_files() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("GYROLOCK_CONFIG", "/nonexistent/gyrolock.json");
    let err = TrackerConfig::load().expect_err("missing file");
    assert!(err.to_string().contains("failed to read config file"));

    let mut file = NamedTempFile::new().expect("temp config");
    file.write_all(b"{ not json").expect("write config");
    std::env::set_var("GYROLOCK_CONFIG", file.path());
    let err = TrackerConfig::load().expect_err("malformed file");
    assert!(err.to_string().contains("invalid config file"));

    clear_env();
}
