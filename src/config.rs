use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::{
    DEFAULT_CONFIDENCE_FLOOR, DEFAULT_SMOOTHING_ALPHA, DEFAULT_UPDATE_INTERVAL_MS,
    LOCKED_CONFIDENCE,
};

const DEFAULT_FALLBACK_PIXELS_PER_DEGREE: f32 = 20.0;
const DEFAULT_HORIZONTAL_FOV_DEG: f32 = 60.0;
const DEFAULT_VERTICAL_FOV_DEG: f32 = 45.0;
const DEFAULT_CAMERA_ID: &str = "back";

#[derive(Debug, Deserialize, Default)]
struct TrackerConfigFile {
    target_label: Option<String>,
    camera_id: Option<String>,
    matching: Option<MatchingConfigFile>,
    smoothing: Option<SmoothingConfigFile>,
    calibration: Option<CalibrationConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct MatchingConfigFile {
    confidence_floor: Option<f32>,
    locked_confidence: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct SmoothingConfigFile {
    alpha: Option<f32>,
    update_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct CalibrationConfigFile {
    fallback_pixels_per_degree: Option<f32>,
    default_horizontal_fov_deg: Option<f32>,
    default_vertical_fov_deg: Option<f32>,
}

/// Tracker tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerConfig {
    /// Label to lock onto. Without one the tracker scans but never locks.
    pub target_label: Option<String>,
    /// Camera identity used for intrinsics lookup.
    pub camera_id: String,
    pub confidence_floor: f32,
    pub locked_confidence: f32,
    pub smoothing_alpha: f32,
    pub update_interval: Duration,
    pub fallback_pixels_per_degree: f32,
    pub default_horizontal_fov_deg: f32,
    pub default_vertical_fov_deg: f32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            target_label: None,
            camera_id: DEFAULT_CAMERA_ID.to_string(),
            confidence_floor: DEFAULT_CONFIDENCE_FLOOR,
            locked_confidence: LOCKED_CONFIDENCE,
            smoothing_alpha: DEFAULT_SMOOTHING_ALPHA,
            update_interval: Duration::from_millis(DEFAULT_UPDATE_INTERVAL_MS),
            fallback_pixels_per_degree: DEFAULT_FALLBACK_PIXELS_PER_DEGREE,
            default_horizontal_fov_deg: DEFAULT_HORIZONTAL_FOV_DEG,
            default_vertical_fov_deg: DEFAULT_VERTICAL_FOV_DEG,
        }
    }
}

impl TrackerConfig {
    /// Defaults, then the file named by `GYROLOCK_CONFIG`, then env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("GYROLOCK_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load a specific file, ignoring `GYROLOCK_CONFIG` but still applying env overrides.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut cfg = Self::from_file(read_config_file(path)?);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn with_target(mut self, label: impl Into<String>) -> Self {
        self.target_label = Some(label.into());
        self
    }

    fn from_file(file: TrackerConfigFile) -> Self {
        let defaults = Self::default();
        let matching = file.matching.unwrap_or_default();
        let smoothing = file.smoothing.unwrap_or_default();
        let calibration = file.calibration.unwrap_or_default();
        Self {
            target_label: file.target_label.filter(|label| !label.trim().is_empty()),
            camera_id: file.camera_id.unwrap_or(defaults.camera_id),
            confidence_floor: matching
                .confidence_floor
                .unwrap_or(defaults.confidence_floor),
            locked_confidence: matching
                .locked_confidence
                .unwrap_or(defaults.locked_confidence),
            smoothing_alpha: smoothing.alpha.unwrap_or(defaults.smoothing_alpha),
            update_interval: smoothing
                .update_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.update_interval),
            fallback_pixels_per_degree: calibration
                .fallback_pixels_per_degree
                .unwrap_or(defaults.fallback_pixels_per_degree),
            default_horizontal_fov_deg: calibration
                .default_horizontal_fov_deg
                .unwrap_or(defaults.default_horizontal_fov_deg),
            default_vertical_fov_deg: calibration
                .default_vertical_fov_deg
                .unwrap_or(defaults.default_vertical_fov_deg),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(target) = std::env::var("GYROLOCK_TARGET") {
            if !target.trim().is_empty() {
                self.target_label = Some(target.trim().to_string());
            }
        }
        if let Ok(camera_id) = std::env::var("GYROLOCK_CAMERA_ID") {
            if !camera_id.trim().is_empty() {
                self.camera_id = camera_id;
            }
        }
        if let Ok(floor) = std::env::var("GYROLOCK_CONFIDENCE_FLOOR") {
            self.confidence_floor = floor
                .trim()
                .parse()
                .map_err(|_| anyhow!("GYROLOCK_CONFIDENCE_FLOOR must be a number in [0, 1]"))?;
        }
        if let Ok(alpha) = std::env::var("GYROLOCK_SMOOTHING_ALPHA") {
            self.smoothing_alpha = alpha
                .trim()
                .parse()
                .map_err(|_| anyhow!("GYROLOCK_SMOOTHING_ALPHA must be a number in (0, 1]"))?;
        }
        if let Ok(interval) = std::env::var("GYROLOCK_UPDATE_INTERVAL_MS") {
            let millis: u64 = interval.trim().parse().map_err(|_| {
                anyhow!("GYROLOCK_UPDATE_INTERVAL_MS must be an integer number of milliseconds")
            })?;
            self.update_interval = Duration::from_millis(millis);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.confidence_floor) {
            return Err(anyhow!(
                "confidence_floor must be within [0, 1], got {}",
                self.confidence_floor
            ));
        }
        if !(0.0..=1.0).contains(&self.locked_confidence) {
            return Err(anyhow!(
                "locked_confidence must be within [0, 1], got {}",
                self.locked_confidence
            ));
        }
        if !(self.smoothing_alpha > 0.0 && self.smoothing_alpha <= 1.0) {
            return Err(anyhow!(
                "smoothing alpha must be within (0, 1], got {}",
                self.smoothing_alpha
            ));
        }
        if self.update_interval.is_zero() {
            return Err(anyhow!("update interval must be greater than zero"));
        }
        for (name, value) in [
            ("fallback_pixels_per_degree", self.fallback_pixels_per_degree),
            ("default_horizontal_fov_deg", self.default_horizontal_fov_deg),
            ("default_vertical_fov_deg", self.default_vertical_fov_deg),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(anyhow!("{} must be a positive number, got {}", name, value));
            }
        }
        if self.camera_id.trim().is_empty() {
            return Err(anyhow!("camera_id must not be empty"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<TrackerConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = TrackerConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.confidence_floor, 0.6);
        assert_eq!(cfg.smoothing_alpha, 0.2);
        assert_eq!(cfg.update_interval, Duration::from_millis(250));
        assert_eq!(cfg.fallback_pixels_per_degree, 20.0);
    }

    #[test]
    fn rejects_out_of_range_values() {
        let mut cfg = TrackerConfig::default();
        cfg.smoothing_alpha = 0.0;
        assert!(cfg.validate().is_err());

        let mut cfg = TrackerConfig::default();
        cfg.confidence_floor = 1.2;
        assert!(cfg.validate().is_err());

        let mut cfg = TrackerConfig::default();
        cfg.update_interval = Duration::ZERO;
        assert!(cfg.validate().is_err());

        let mut cfg = TrackerConfig::default();
        cfg.fallback_pixels_per_degree = f32::NAN;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let file: TrackerConfigFile =
            serde_json::from_str(r#"{ "smoothing": { "alpha": 0.5 } }"#).unwrap();
        let cfg = TrackerConfig::from_file(file);
        assert_eq!(cfg.smoothing_alpha, 0.5);
        assert_eq!(cfg.update_interval, Duration::from_millis(250));
        assert_eq!(cfg.target_label, None);
    }
}
