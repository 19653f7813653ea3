//! Gyro Lock
//!
//! This crate locks onto a target object in a live camera feed and keeps its
//! on-screen position up to date without re-running inference every frame.
//!
//! # Architecture
//!
//! A single detection pass anchors the lock; afterwards the box is moved by
//! projecting orientation deltas from the device IMU into pixel offsets.
//!
//! 1. **SCANNING**: every frame goes through the inference engine and the matcher.
//! 2. **LOCKED**: frames only recalibrate the field of view; both frames and
//!    orientation samples drive rate-limited, smoothed projection updates.
//! 3. **Exit**: once the projected box leaves the frame entirely, the lock is
//!    dropped and scanning resumes.
//!
//! # Module Structure
//!
//! - `frame`: camera frames and the restricted view handed to inference
//! - `detect`: detection boxes, inference engine trait, target matcher
//! - `orientation`: rotation vector to azimuth/pitch/roll, latest-sample slot
//! - `calibration`: pixels-per-degree from camera field of view
//! - `session`: lock-time state, projection and smoothing
//! - `tracker`: the SCANNING/LOCKED state machine
//! - `sensor`, `observer`: push-based inputs and outbound notifications

use serde::{Deserialize, Serialize};

pub mod calibration;
pub mod config;
pub mod detect;
pub mod frame;
pub mod observer;
pub mod orientation;
pub mod rate_limit;
pub mod replay;
pub mod sensor;
pub mod session;
pub mod tracker;

pub use calibration::{
    Calibration, FieldOfView, FovCalibrator, IntrinsicsProvider, StaticIntrinsics,
};
pub use config::TrackerConfig;
pub use detect::{match_target, DetectionBox, InferenceEngine, ScriptedBackend};
pub use frame::{Frame, FrameView};
pub use observer::{ChannelObserver, TrackerEvent, TrackerObserver};
pub use orientation::{estimate_orientation, OrientationSample, OrientationSlot};
pub use rate_limit::{Clock, ManualClock, RateLimiter, SystemClock};
pub use sensor::{
    FrameSink, FrameSource, OrientationSink, OrientationSource, PushFrameSource,
    PushOrientationSource, Subscription,
};
pub use session::{LockSession, UpdateOutcome};
pub use tracker::{FrameOutcome, SampleOutcome, Tracker, TrackerBuilder};

/// Minimum confidence a detection needs before the tracker will lock onto it.
pub const DEFAULT_CONFIDENCE_FLOOR: f32 = 0.6;

/// Exponential smoothing weight applied on every accepted update.
pub const DEFAULT_SMOOTHING_ALPHA: f32 = 0.2;

/// Minimum spacing between accepted smoothing updates (~4 Hz).
pub const DEFAULT_UPDATE_INTERVAL_MS: u64 = 250;

/// Confidence reported for boxes emitted while locked. The label is not re-verified.
pub const LOCKED_CONFIDENCE: f32 = 0.9;

// -------------------- Geometry --------------------

/// Axis-aligned rectangle in source-frame pixel coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl Rect {
    pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }

    /// Shifts all four edges uniformly. Size is preserved.
    pub fn translate(&self, dx: f32, dy: f32) -> Self {
        Self {
            left: self.left + dx,
            top: self.top + dy,
            right: self.right + dx,
            bottom: self.bottom + dy,
        }
    }

    /// True when the rectangle shares no area with `[0, 0, width, height]`.
    ///
    /// Edge contact still counts as overlap. An unknown (zero) frame size never
    /// reports an exit.
    pub fn is_outside_frame(&self, width: u32, height: u32) -> bool {
        if width == 0 || height == 0 {
            return false;
        }
        let (w, h) = (width as f32, height as f32);
        self.right < 0.0 || self.left > w || self.bottom < 0.0 || self.top > h
    }

    /// One exponential-moving-average step toward `target`, edge by edge.
    pub fn smooth_toward(&mut self, target: &Rect, alpha: f32) {
        self.left += (target.left - self.left) * alpha;
        self.top += (target.top - self.top) * alpha;
        self.right += (target.right - self.right) * alpha;
        self.bottom += (target.bottom - self.bottom) * alpha;
    }
}

// -------------------- Tracking State --------------------

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackingState {
    #[default]
    Scanning,
    Locked,
}
