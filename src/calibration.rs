//! Field-of-view calibration.
//!
//! Maps angular device rotation to a linear pixel shift in the image plane:
//! `pixels_per_degree_x = width / horizontal_fov`, and likewise for Y.
//! Calibration never fails outward. Missing intrinsics fall back to default
//! angles, lookup errors fall back to fixed pixels-per-degree constants.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::config::TrackerConfig;

/// Pixels-per-degree mapping for the current camera and resolution.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub pixels_per_degree_x: f32,
    pub pixels_per_degree_y: f32,
}

impl Calibration {
    pub fn uniform(pixels_per_degree: f32) -> Self {
        Self {
            pixels_per_degree_x: pixels_per_degree,
            pixels_per_degree_y: pixels_per_degree,
        }
    }
}

/// Camera field of view in degrees. Either axis may be unknown.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldOfView {
    pub horizontal_deg: Option<f32>,
    pub vertical_deg: Option<f32>,
}

impl FieldOfView {
    pub fn new(horizontal_deg: f32, vertical_deg: f32) -> Self {
        Self {
            horizontal_deg: Some(horizontal_deg),
            vertical_deg: Some(vertical_deg),
        }
    }

    pub fn horizontal_only(horizontal_deg: f32) -> Self {
        Self {
            horizontal_deg: Some(horizontal_deg),
            vertical_deg: None,
        }
    }
}

/// Camera intrinsics lookup.
pub trait IntrinsicsProvider: Send + Sync {
    fn field_of_view(&self, camera_id: &str) -> Result<FieldOfView>;
}

/// Intrinsics provider answering the same field of view for every camera.
#[derive(Clone, Copy, Debug, Default)]
pub struct StaticIntrinsics {
    pub fov: FieldOfView,
}

impl StaticIntrinsics {
    pub fn new(fov: FieldOfView) -> Self {
        Self { fov }
    }
}

impl IntrinsicsProvider for StaticIntrinsics {
    fn field_of_view(&self, _camera_id: &str) -> Result<FieldOfView> {
        Ok(self.fov)
    }
}

#[derive(Clone, Debug, PartialEq)]
struct CalibrationKey {
    camera_id: String,
    width: u32,
    height: u32,
}

/// Derives and caches pixels-per-degree.
///
/// The result only depends on `(camera_id, width, height)`, so repeated calls
/// with an unchanged key return the cached mapping without consulting the
/// intrinsics provider again.
pub struct FovCalibrator {
    provider: Option<Box<dyn IntrinsicsProvider>>,
    fallback_pixels_per_degree: f32,
    default_horizontal_fov_deg: f32,
    default_vertical_fov_deg: f32,
    cached: Option<(CalibrationKey, Calibration)>,
}

impl FovCalibrator {
    pub fn new(provider: Option<Box<dyn IntrinsicsProvider>>, config: &TrackerConfig) -> Self {
        Self {
            provider,
            fallback_pixels_per_degree: config.fallback_pixels_per_degree,
            default_horizontal_fov_deg: config.default_horizontal_fov_deg,
            default_vertical_fov_deg: config.default_vertical_fov_deg,
            cached: None,
        }
    }

    /// Calibration for a frame of `width` x `height` from `camera_id`.
    pub fn calibrate(&mut self, camera_id: &str, width: u32, height: u32) -> Calibration {
        let key = CalibrationKey {
            camera_id: camera_id.to_string(),
            width,
            height,
        };
        if let Some((cached_key, calibration)) = &self.cached {
            if *cached_key == key {
                return *calibration;
            }
        }

        let calibration = self.compute(camera_id, width, height);
        self.cached = Some((key, calibration));
        calibration
    }

    fn compute(&self, camera_id: &str, width: u32, height: u32) -> Calibration {
        let fallback = Calibration::uniform(self.fallback_pixels_per_degree);
        if width == 0 || height == 0 {
            log::debug!("calibration skipped for {}x{} frame, using fallback", width, height);
            return fallback;
        }

        let fov = match &self.provider {
            Some(provider) => match provider.field_of_view(camera_id) {
                Ok(fov) => fov,
                Err(e) => {
                    log::warn!(
                        "field-of-view lookup failed for camera {}: {}; using {} px/deg",
                        camera_id,
                        e,
                        self.fallback_pixels_per_degree
                    );
                    return fallback;
                }
            },
            None => {
                log::debug!("no intrinsics provider, using {} px/deg", self.fallback_pixels_per_degree);
                return fallback;
            }
        };

        let (w, h) = (width as f32, height as f32);
        let (horizontal, vertical) = match (positive(fov.horizontal_deg), positive(fov.vertical_deg)) {
            (Some(horizontal), Some(vertical)) => (horizontal, vertical),
            (Some(horizontal), None) => (horizontal, horizontal * h / w),
            (None, Some(vertical)) => (self.default_horizontal_fov_deg, vertical),
            (None, None) => (self.default_horizontal_fov_deg, self.default_vertical_fov_deg),
        };

        let calibration = Calibration {
            pixels_per_degree_x: w / horizontal,
            pixels_per_degree_y: h / vertical,
        };
        log::debug!(
            "FOV: H={}° V={}° -> px/deg X={} Y={}",
            horizontal,
            vertical,
            calibration.pixels_per_degree_x,
            calibration.pixels_per_degree_y
        );
        calibration
    }
}

fn positive(value: Option<f32>) -> Option<f32> {
    value.filter(|v| v.is_finite() && *v > 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FailingIntrinsics;

    impl IntrinsicsProvider for FailingIntrinsics {
        fn field_of_view(&self, camera_id: &str) -> Result<FieldOfView> {
            Err(anyhow!("camera {} has no characteristics", camera_id))
        }
    }

    struct CountingIntrinsics {
        calls: Arc<AtomicUsize>,
    }

    impl IntrinsicsProvider for CountingIntrinsics {
        fn field_of_view(&self, _camera_id: &str) -> Result<FieldOfView> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(FieldOfView::new(64.0, 48.0))
        }
    }

    fn calibrator(provider: Option<Box<dyn IntrinsicsProvider>>) -> FovCalibrator {
        FovCalibrator::new(provider, &TrackerConfig::default())
    }

    #[test]
    fn both_axes_from_intrinsics() {
        let mut cal = calibrator(Some(Box::new(StaticIntrinsics::new(FieldOfView::new(
            64.0, 48.0,
        )))));
        let c = cal.calibrate("back", 640, 480);
        assert_eq!(c.pixels_per_degree_x, 10.0);
        assert_eq!(c.pixels_per_degree_y, 10.0);
    }

    #[test]
    fn vertical_derived_from_horizontal_and_aspect() {
        let mut cal = calibrator(Some(Box::new(StaticIntrinsics::new(
            FieldOfView::horizontal_only(80.0),
        ))));
        let c = cal.calibrate("back", 1600, 900);
        // vertical = 80 * 900 / 1600 = 45
        assert_eq!(c.pixels_per_degree_x, 20.0);
        assert_eq!(c.pixels_per_degree_y, 20.0);
    }

    #[test]
    fn missing_angles_default_to_sixty_by_forty_five() {
        let mut cal = calibrator(Some(Box::new(StaticIntrinsics::default())));
        let c = cal.calibrate("back", 1280, 720);
        assert!((c.pixels_per_degree_x - 1280.0 / 60.0).abs() < 1e-4);
        assert!((c.pixels_per_degree_y - 720.0 / 45.0).abs() < 1e-4);
    }

    #[test]
    fn non_positive_angles_count_as_missing() {
        let mut cal = calibrator(Some(Box::new(StaticIntrinsics::new(FieldOfView::new(
            -5.0, 0.0,
        )))));
        let c = cal.calibrate("back", 600, 450);
        assert_eq!(c.pixels_per_degree_x, 10.0);
        assert_eq!(c.pixels_per_degree_y, 10.0);
    }

    #[test]
    fn lookup_failure_falls_back_to_constants() {
        let mut cal = calibrator(Some(Box::new(FailingIntrinsics)));
        assert_eq!(cal.calibrate("back", 640, 480), Calibration::uniform(20.0));
    }

    #[test]
    fn no_provider_and_zero_size_fall_back() {
        let mut cal = calibrator(None);
        assert_eq!(cal.calibrate("back", 640, 480), Calibration::uniform(20.0));

        let mut cal = calibrator(Some(Box::new(StaticIntrinsics::new(FieldOfView::new(
            64.0, 48.0,
        )))));
        assert_eq!(cal.calibrate("back", 0, 0), Calibration::uniform(20.0));
    }

    #[test]
    fn recalibrates_only_when_key_changes() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut cal = calibrator(Some(Box::new(CountingIntrinsics {
            calls: Arc::clone(&calls),
        })));

        let a = cal.calibrate("back", 640, 480);
        let b = cal.calibrate("back", 640, 480);
        assert_eq!(a, b);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let c = cal.calibrate("back", 1280, 960);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(c.pixels_per_degree_x, 20.0);

        assert_eq!(cal.calibrate("front", 1280, 960), c);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
