//! Lock session: state captured at lock time and the per-update projection.
//!
//! On every accepted update the lock-time rectangle is translated by the
//! orientation delta since lock, converted to pixels:
//!
//! ```text
//! shift_x = -(azimuth - azimuth0)° * pixels_per_degree_x
//! shift_y =  (pitch   - pitch0)°   * pixels_per_degree_y
//! ```
//!
//! Turning the device right moves the target left in the image, hence the sign
//! on X. Only translation is modelled; roll and distance changes are ignored.
//! The smoothed rectangle then moves a fraction `alpha` of the way toward the
//! projected one.

use std::time::Duration;

use crate::calibration::Calibration;
use crate::detect::DetectionBox;
use crate::orientation::OrientationSample;
use crate::rate_limit::RateLimiter;
use crate::{Rect, LOCKED_CONFIDENCE};

/// Result of offering an update to a session.
#[derive(Clone, Debug, PartialEq)]
pub enum UpdateOutcome {
    /// Smoothing was applied; carries the new box.
    Updated(DetectionBox),
    /// Nothing changed (rate-limited, no estimate, or baseline just captured);
    /// carries the last known box.
    Held(DetectionBox),
    /// The projected rectangle no longer overlaps the frame. The session is over.
    Exited { projected: Rect },
}

/// State owned by the tracker while LOCKED.
#[derive(Clone, Debug)]
pub struct LockSession {
    label: String,
    initial_rect: Rect,
    initial_orientation: Option<OrientationSample>,
    smoothed_rect: Rect,
    frame_width: u32,
    frame_height: u32,
    calibration: Calibration,
    alpha: f32,
    locked_confidence: f32,
    limiter: RateLimiter,
    updates_applied: u64,
}

impl LockSession {
    /// Starts a session from the matched detection.
    ///
    /// `baseline` is the orientation at lock time, if one is known. Without it,
    /// the first sample offered to `update` becomes the baseline.
    pub fn new(
        matched: &DetectionBox,
        baseline: Option<OrientationSample>,
        frame_width: u32,
        frame_height: u32,
        calibration: Calibration,
        alpha: f32,
        update_interval: Duration,
    ) -> Self {
        Self {
            label: matched.label.clone(),
            initial_rect: matched.rect,
            initial_orientation: baseline,
            smoothed_rect: matched.rect,
            frame_width,
            frame_height,
            calibration,
            alpha,
            locked_confidence: LOCKED_CONFIDENCE,
            limiter: RateLimiter::new(update_interval),
            updates_applied: 0,
        }
    }

    /// Overrides the confidence reported on boxes emitted while locked.
    pub fn with_locked_confidence(mut self, confidence: f32) -> Self {
        self.locked_confidence = confidence;
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn initial_rect(&self) -> Rect {
        self.initial_rect
    }

    pub fn initial_orientation(&self) -> Option<OrientationSample> {
        self.initial_orientation
    }

    pub fn smoothed_rect(&self) -> Rect {
        self.smoothed_rect
    }

    pub fn frame_size(&self) -> (u32, u32) {
        (self.frame_width, self.frame_height)
    }

    pub fn calibration(&self) -> Calibration {
        self.calibration
    }

    /// Wall-clock time of the last applied update.
    pub fn last_update_ms(&self) -> Option<u64> {
        self.limiter.last_accepted_ms()
    }

    pub fn updates_applied(&self) -> u64 {
        self.updates_applied
    }

    /// The box to display right now.
    pub fn current_box(&self) -> DetectionBox {
        DetectionBox::new(self.label.as_str(), self.locked_confidence, self.smoothed_rect)
    }

    /// Frame resolution or calibration changed while locked.
    pub fn set_frame(&mut self, width: u32, height: u32, calibration: Calibration) {
        self.frame_width = width;
        self.frame_height = height;
        self.calibration = calibration;
    }

    /// Pre-smoothing target rectangle for `current`, or `None` until a baseline exists.
    pub fn project(&self, current: &OrientationSample) -> Option<Rect> {
        let baseline = self.initial_orientation?;
        let delta_azimuth = (current.azimuth - baseline.azimuth).to_degrees();
        let delta_pitch = (current.pitch - baseline.pitch).to_degrees();

        let shift_x = -delta_azimuth * self.calibration.pixels_per_degree_x;
        let shift_y = delta_pitch * self.calibration.pixels_per_degree_y;
        Some(self.initial_rect.translate(shift_x, shift_y))
    }

    /// Offer an orientation estimate at wall-clock `now_ms`.
    pub fn update(&mut self, current: Option<OrientationSample>, now_ms: u64) -> UpdateOutcome {
        let Some(current) = current else {
            return UpdateOutcome::Held(self.current_box());
        };
        if self.initial_orientation.is_none() {
            self.initial_orientation = Some(current);
            log::debug!("lock baseline captured for {}", self.label);
            return UpdateOutcome::Held(self.current_box());
        }
        if !self.limiter.try_acquire(now_ms) {
            return UpdateOutcome::Held(self.current_box());
        }

        let Some(target) = self.project(&current) else {
            return UpdateOutcome::Held(self.current_box());
        };
        if target.is_outside_frame(self.frame_width, self.frame_height) {
            return UpdateOutcome::Exited { projected: target };
        }

        self.smoothed_rect.smooth_toward(&target, self.alpha);
        self.updates_applied += 1;
        UpdateOutcome::Updated(self.current_box())
    }
}
