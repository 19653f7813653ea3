//! SCANNING/LOCKED state machine.
//!
//! Two producers drive the tracker concurrently: camera frames
//! (`process_frame`) and raw rotation vectors (`on_orientation_sample`).
//! All session state lives behind one mutex, so a frame-triggered and a
//! sample-triggered update never interleave. The latest orientation estimate
//! is published to a lock-free slot before that mutex is taken.
//!
//! Lock order is `sensor_sub` before `core`. Inference runs with neither held,
//! and observers are called with no tracker lock held.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::calibration::{FovCalibrator, IntrinsicsProvider};
use crate::config::TrackerConfig;
use crate::detect::{match_target, DetectionBox, InferenceEngine};
use crate::frame::Frame;
use crate::observer::{Dispatcher, TrackerEvent, TrackerObserver};
use crate::orientation::{estimate_orientation, OrientationSample, OrientationSlot};
use crate::rate_limit::{Clock, SystemClock};
use crate::sensor::{FrameSink, FrameSource, OrientationSink, OrientationSource, Subscription};
use crate::session::{LockSession, UpdateOutcome};
use crate::TrackingState;

/// What a single camera frame did.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum FrameOutcome {
    /// No lock. Carries every detection from this frame's inference pass.
    Scanning(Vec<DetectionBox>),
    /// This frame produced a lock on the matched detection.
    LockAcquired(DetectionBox),
    /// Locked; carries the box to display.
    Tracking(DetectionBox),
    /// The lock ended on this frame.
    LockLost,
}

/// What a single orientation vector did.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum SampleOutcome {
    /// Recorded as the latest estimate, but nothing is locked.
    Ignored,
    /// No estimate could be formed; prior state is kept.
    Rejected,
    /// Locked, no smoothing step taken (rate-limited or baseline captured).
    Held(DetectionBox),
    Updated(DetectionBox),
    LockLost,
}

// ----------------------------------------------------------------------------
// Core: everything guarded by the state mutex
// ----------------------------------------------------------------------------

#[derive(Default)]
enum Phase {
    #[default]
    Scanning,
    Locked {
        session: LockSession,
        locked_at_ms: u64,
        epoch: u64,
    },
}

enum Drive {
    Held(DetectionBox),
    Updated(DetectionBox),
    Lost { epoch: u64 },
}

struct Staged {
    seq: u64,
    events: Vec<TrackerEvent>,
}

struct Core {
    phase: Phase,
    target: Option<String>,
    calibrator: FovCalibrator,
    /// Bumped on every lock; identifies which session a subscription belongs to.
    epoch: u64,
    next_event_seq: u64,
    closed: bool,
}

impl Core {
    fn state(&self) -> TrackingState {
        match self.phase {
            Phase::Scanning => TrackingState::Scanning,
            Phase::Locked { .. } => TrackingState::Locked,
        }
    }

    fn locked_epoch(&self) -> Option<u64> {
        match self.phase {
            Phase::Locked { epoch, .. } => Some(epoch),
            Phase::Scanning => None,
        }
    }

    fn locked_at_ms(&self) -> Option<u64> {
        match self.phase {
            Phase::Locked { locked_at_ms, .. } => Some(locked_at_ms),
            Phase::Scanning => None,
        }
    }

    fn session(&self) -> Option<&LockSession> {
        match &self.phase {
            Phase::Locked { session, .. } => Some(session),
            Phase::Scanning => None,
        }
    }

    /// Reserve the next delivery slot for `events`. Empty batches take none.
    fn stage(&mut self, events: Vec<TrackerEvent>) -> Option<Staged> {
        if events.is_empty() {
            return None;
        }
        let seq = self.next_event_seq;
        self.next_event_seq += 1;
        Some(Staged { seq, events })
    }

    /// Resolution or camera changed while locked. Frames of unknown size
    /// leave the session's frame untouched.
    fn refresh_frame(&mut self, camera_id: &str, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        let Core {
            phase, calibrator, ..
        } = self;
        if let Phase::Locked { session, .. } = phase {
            if session.frame_size() != (width, height) {
                log::debug!("locked frame resized to {}x{}", width, height);
            }
            let calibration = calibrator.calibrate(camera_id, width, height);
            session.set_frame(width, height, calibration);
        }
    }

    /// Offer an estimate to the live session. `None` when scanning.
    fn drive(
        &mut self,
        estimate: Option<OrientationSample>,
        now_ms: u64,
        events: &mut Vec<TrackerEvent>,
    ) -> Option<Drive> {
        let Phase::Locked { session, .. } = &mut self.phase else {
            return None;
        };
        match session.update(estimate, now_ms) {
            UpdateOutcome::Held(current) => Some(Drive::Held(current)),
            UpdateOutcome::Updated(current) => {
                let (frame_width, frame_height) = session.frame_size();
                events.push(TrackerEvent::BoxUpdated {
                    detection: Some(current.clone()),
                    frame_width,
                    frame_height,
                });
                Some(Drive::Updated(current))
            }
            UpdateOutcome::Exited { projected } => {
                let (width, height) = session.frame_size();
                let reason = format!(
                    "projected box ({:.0}, {:.0}, {:.0}, {:.0}) left the {}x{} frame",
                    projected.left, projected.top, projected.right, projected.bottom, width, height
                );
                let (epoch, lost) = self.release_lock(&reason)?;
                events.extend(lost);
                Some(Drive::Lost { epoch })
            }
        }
    }

    /// Ends the live session. Returns its epoch and the notifications to send.
    fn release_lock(&mut self, reason: &str) -> Option<(u64, Vec<TrackerEvent>)> {
        let Phase::Locked { session, epoch, .. } = std::mem::take(&mut self.phase) else {
            return None;
        };
        log::info!(
            "lock on {} lost after {} updates: {}",
            session.label(),
            session.updates_applied(),
            reason
        );
        let events = vec![
            TrackerEvent::BoxUpdated {
                detection: None,
                frame_width: 0,
                frame_height: 0,
            },
            TrackerEvent::LockLost,
        ];
        Some((epoch, events))
    }
}

// ----------------------------------------------------------------------------
// Shared
// ----------------------------------------------------------------------------

struct SensorSubscription {
    epoch: u64,
    subscription: Subscription,
}

struct Shared {
    config: TrackerConfig,
    core: Mutex<Core>,
    engine: Mutex<Box<dyn InferenceEngine>>,
    slot: OrientationSlot,
    clock: Arc<dyn Clock>,
    dispatcher: Dispatcher,
    orientation_source: Option<Arc<dyn OrientationSource>>,
    sensor_sub: Mutex<Option<SensorSubscription>>,
    camera_sub: Mutex<Option<Subscription>>,
    degraded_logged: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    /// Stage `events`, release the state lock, then notify observers.
    fn finish(&self, mut core: MutexGuard<'_, Core>, events: Vec<TrackerEvent>) {
        let staged = core.stage(events);
        drop(core);
        if let Some(Staged { seq, events }) = staged {
            self.dispatcher.submit(seq, events);
        }
    }

    fn camera_id_for<'a>(&'a self, frame: &'a Frame) -> &'a str {
        if frame.camera_id.trim().is_empty() {
            &self.config.camera_id
        } else {
            &frame.camera_id
        }
    }

    /// Latest slot estimate, provided it was published after the lock began.
    fn fresh_estimate(&self, core: &Core) -> Option<OrientationSample> {
        let locked_at_ms = core.locked_at_ms()?;
        let (sample, at_ms) = self.slot.latest_stamped()?;
        (at_ms >= locked_at_ms).then_some(sample)
    }

    /// Slot estimate recent enough to serve as a lock baseline.
    fn baseline_at(&self, now_ms: u64) -> Option<OrientationSample> {
        let max_age_ms = self.config.update_interval.as_millis() as u64;
        let (sample, at_ms) = self.slot.latest_stamped()?;
        (now_ms.saturating_sub(at_ms) <= max_age_ms).then_some(sample)
    }

    fn inertial_available(&self) -> bool {
        match &self.orientation_source {
            Some(source) => source.is_available(),
            // Samples are pushed straight into `on_orientation_sample`.
            None => true,
        }
    }

    fn infer(&self, frame: &Frame) -> Vec<DetectionBox> {
        let mut engine = lock(&self.engine);
        match engine.infer(frame.view()) {
            Ok(detections) => {
                log::trace!(
                    "{} returned {} detections {:?} after capture",
                    engine.name(),
                    detections.len(),
                    frame.captured_at().elapsed()
                );
                detections
            }
            Err(err) => {
                log::warn!("inference engine {} failed: {:#}", engine.name(), err);
                Vec::new()
            }
        }
    }

    fn process_frame(self: &Arc<Self>, frame: &Frame) -> FrameOutcome {
        let now_ms = self.clock.now_ms();
        let camera_id = self.camera_id_for(frame);

        let mut core = lock(&self.core);
        if core.closed {
            return FrameOutcome::Scanning(Vec::new());
        }
        core.refresh_frame(camera_id, frame.width, frame.height);
        let estimate = self.fresh_estimate(&core);
        let mut events = Vec::new();
        if let Some(drive) = core.drive(estimate, now_ms, &mut events) {
            self.finish(core, events);
            return match drive {
                Drive::Held(current) | Drive::Updated(current) => FrameOutcome::Tracking(current),
                Drive::Lost { epoch } => {
                    self.release_sensor(epoch);
                    FrameOutcome::LockLost
                }
            };
        }
        drop(core);

        let detections = self.infer(frame);

        let mut core = lock(&self.core);
        // Another frame may have locked while inference ran.
        if let Some(session) = core.session() {
            return FrameOutcome::Tracking(session.current_box());
        }
        if core.closed {
            return FrameOutcome::Scanning(detections);
        }

        let matched = core
            .target
            .as_deref()
            .and_then(|target| match_target(&detections, target, self.config.confidence_floor))
            .cloned();
        let matched = match matched {
            Some(matched) if !self.inertial_available() => {
                if !self.degraded_logged.swap(true, Ordering::Relaxed) {
                    log::warn!(
                        "orientation sensor unavailable; staying in scan-only mode (matched {})",
                        matched.label
                    );
                }
                None
            }
            other => other,
        };

        let Some(matched) = matched else {
            let events = vec![TrackerEvent::CandidatesObserved {
                candidates: detections.clone(),
            }];
            self.finish(core, events);
            return FrameOutcome::Scanning(detections);
        };

        let (width, height) = (frame.width, frame.height);
        let calibration = core.calibrator.calibrate(camera_id, width, height);
        let baseline = self.baseline_at(now_ms);
        let session = LockSession::new(
            &matched,
            baseline,
            width,
            height,
            calibration,
            self.config.smoothing_alpha,
            self.config.update_interval,
        )
        .with_locked_confidence(self.config.locked_confidence);
        core.epoch += 1;
        let epoch = core.epoch;
        core.phase = Phase::Locked {
            session,
            locked_at_ms: now_ms,
            epoch,
        };
        log::info!(
            "locked onto {} (confidence {:.2}) at ({:.0}, {:.0}, {:.0}, {:.0}) in {}x{} frame{}",
            matched.label,
            matched.confidence,
            matched.rect.left,
            matched.rect.top,
            matched.rect.right,
            matched.rect.bottom,
            width,
            height,
            if baseline.is_some() {
                ""
            } else {
                ", waiting for orientation baseline"
            }
        );

        let events = vec![
            TrackerEvent::BoxUpdated {
                detection: Some(matched.clone()),
                frame_width: width,
                frame_height: height,
            },
            TrackerEvent::LockAcquired {
                detection: matched.clone(),
                frame_width: width,
                frame_height: height,
            },
        ];
        self.finish(core, events);
        self.attach_sensor(epoch);
        FrameOutcome::LockAcquired(matched)
    }

    fn on_orientation_sample(&self, raw: &[f32]) -> SampleOutcome {
        let Some(sample) = estimate_orientation(raw) else {
            log::debug!("rejected orientation vector with {} components", raw.len());
            return SampleOutcome::Rejected;
        };
        let now_ms = self.clock.now_ms();
        self.slot.publish(sample, now_ms);

        let mut core = lock(&self.core);
        let mut events = Vec::new();
        let Some(drive) = core.drive(Some(sample), now_ms, &mut events) else {
            return SampleOutcome::Ignored;
        };
        self.finish(core, events);
        match drive {
            Drive::Held(current) => SampleOutcome::Held(current),
            Drive::Updated(current) => SampleOutcome::Updated(current),
            Drive::Lost { epoch } => {
                self.release_sensor(epoch);
                SampleOutcome::LockLost
            }
        }
    }

    /// Drop any live session and every sensor subscription it owned.
    fn reset(&self, reason: &str) {
        let mut core = lock(&self.core);
        let ended_through = core.epoch;
        let events = core
            .release_lock(reason)
            .map(|(_, events)| events)
            .unwrap_or_default();
        self.finish(core, events);
        self.release_sensor(ended_through);
    }

    fn set_target(&self, label: Option<String>) {
        let label = label
            .map(|label| label.trim().to_string())
            .filter(|label| !label.is_empty());

        let mut core = lock(&self.core);
        if core.target != label {
            log::info!("target set to {:?}", label);
        }
        core.target = label;
        let stale = match (core.session(), core.target.as_deref()) {
            (Some(session), Some(target)) => session.label() != target,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if !stale {
            return;
        }
        let ended_through = core.epoch;
        let events = core
            .release_lock("target changed")
            .map(|(_, events)| events)
            .unwrap_or_default();
        self.finish(core, events);
        self.release_sensor(ended_through);
    }

    /// Subscribe to the orientation source for the session `epoch`.
    ///
    /// Sources must not deliver synchronously from inside `subscribe`.
    fn attach_sensor(self: &Arc<Self>, epoch: u64) {
        let Some(source) = &self.orientation_source else {
            return;
        };
        let mut current = lock(&self.sensor_sub);

        let weak = Arc::downgrade(self);
        let sink: OrientationSink = Arc::new(move |raw: &[f32]| {
            if let Some(shared) = weak.upgrade() {
                shared.on_orientation_sample(raw);
            }
        });
        let subscription = match source.subscribe(sink) {
            Ok(subscription) => subscription,
            Err(err) => {
                drop(current);
                log::warn!("orientation sensor subscription failed: {:#}", err);
                self.abandon(epoch, "orientation sensor subscription failed");
                return;
            }
        };

        if lock(&self.core).locked_epoch() == Some(epoch) {
            log::debug!("orientation sensor subscribed for lock #{}", epoch);
            *current = Some(SensorSubscription {
                epoch,
                subscription,
            });
        }
    }

    /// Ends session `epoch` if it is still the live one.
    fn abandon(&self, epoch: u64, reason: &str) {
        let mut core = lock(&self.core);
        if core.locked_epoch() != Some(epoch) {
            return;
        }
        let events = core
            .release_lock(reason)
            .map(|(_, events)| events)
            .unwrap_or_default();
        self.finish(core, events);
    }

    /// Cancel the sensor subscription if it belongs to a session at or before
    /// `ended_through`.
    fn release_sensor(&self, ended_through: u64) {
        let taken = {
            let mut current = lock(&self.sensor_sub);
            match current.as_ref() {
                Some(sub) if sub.epoch <= ended_through => current.take(),
                _ => None,
            }
        };
        if let Some(mut sub) = taken {
            sub.subscription.cancel();
            log::debug!("orientation sensor unsubscribed after lock #{}", sub.epoch);
        }
    }
}

// ----------------------------------------------------------------------------
// Tracker
// ----------------------------------------------------------------------------

/// Builder for [`Tracker`].
pub struct TrackerBuilder {
    config: TrackerConfig,
    engine: Box<dyn InferenceEngine>,
    intrinsics: Option<Box<dyn IntrinsicsProvider>>,
    orientation_source: Option<Arc<dyn OrientationSource>>,
    clock: Arc<dyn Clock>,
    observers: Vec<Arc<dyn TrackerObserver>>,
}

impl TrackerBuilder {
    /// Camera intrinsics for field-of-view calibration. Without a provider the
    /// fallback pixels-per-degree constants apply.
    pub fn intrinsics(mut self, provider: impl IntrinsicsProvider + 'static) -> Self {
        self.intrinsics = Some(Box::new(provider));
        self
    }

    /// Orientation source subscribed while locked. Without one, the caller
    /// feeds `on_orientation_sample` directly.
    pub fn orientation_source(mut self, source: Arc<dyn OrientationSource>) -> Self {
        self.orientation_source = Some(source);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn TrackerObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn build(self) -> Tracker {
        let mut engine = self.engine;
        if let Err(err) = engine.warm_up() {
            log::warn!("inference engine {} warm-up failed: {:#}", engine.name(), err);
        }

        let dispatcher = Dispatcher::default();
        for observer in self.observers {
            dispatcher.add_observer(observer);
        }
        let core = Core {
            phase: Phase::Scanning,
            target: self.config.target_label.clone(),
            calibrator: FovCalibrator::new(self.intrinsics, &self.config),
            epoch: 0,
            next_event_seq: 0,
            closed: false,
        };

        Tracker {
            shared: Arc::new(Shared {
                config: self.config,
                core: Mutex::new(core),
                engine: Mutex::new(engine),
                slot: OrientationSlot::new(),
                clock: self.clock,
                dispatcher,
                orientation_source: self.orientation_source,
                sensor_sub: Mutex::new(None),
                camera_sub: Mutex::new(None),
                degraded_logged: AtomicBool::new(false),
            }),
        }
    }
}

/// Hybrid detection/inertial tracker.
///
/// Cheap to clone; clones drive the same state machine and may be used from
/// any thread.
#[derive(Clone)]
pub struct Tracker {
    shared: Arc<Shared>,
}

impl Tracker {
    pub fn new(config: TrackerConfig, engine: impl InferenceEngine + 'static) -> Self {
        Self::builder(config, engine).build()
    }

    pub fn builder(config: TrackerConfig, engine: impl InferenceEngine + 'static) -> TrackerBuilder {
        TrackerBuilder {
            config,
            engine: Box::new(engine),
            intrinsics: None,
            orientation_source: None,
            clock: Arc::new(SystemClock),
            observers: Vec::new(),
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.shared.config
    }

    /// Single entry point per camera frame.
    ///
    /// SCANNING frames run inference and the matcher; LOCKED frames only
    /// recalibrate and attempt a rate-limited projection update.
    pub fn process_frame(&self, frame: &Frame) -> FrameOutcome {
        self.shared.process_frame(frame)
    }

    /// Single entry point per raw rotation vector (3 or 4 components).
    pub fn on_orientation_sample(&self, raw: &[f32]) -> SampleOutcome {
        self.shared.on_orientation_sample(raw)
    }

    /// Drop any lock and return to SCANNING. Safe to call at any time.
    pub fn reset_to_scanning(&self) {
        self.shared.reset("reset requested");
    }

    /// Look for `label` from now on. A lock on a different label is dropped.
    pub fn set_target(&self, label: impl Into<String>) {
        self.shared.set_target(Some(label.into()));
    }

    /// Stop looking for anything. Any lock is dropped.
    pub fn clear_target(&self) {
        self.shared.set_target(None);
    }

    pub fn target(&self) -> Option<String> {
        lock(&self.shared.core).target.clone()
    }

    pub fn current_state(&self) -> TrackingState {
        lock(&self.shared.core).state()
    }

    /// Label of the live lock, not the configured target.
    pub fn current_locked_label(&self) -> Option<String> {
        lock(&self.shared.core)
            .session()
            .map(|session| session.label().to_string())
    }

    /// Box currently displayed for the live lock.
    pub fn current_box(&self) -> Option<DetectionBox> {
        lock(&self.shared.core)
            .session()
            .map(LockSession::current_box)
    }

    pub fn latest_orientation(&self) -> Option<OrientationSample> {
        self.shared.slot.latest()
    }

    pub fn add_observer(&self, observer: Arc<dyn TrackerObserver>) {
        self.shared.dispatcher.add_observer(observer);
    }

    /// Feed every frame from `source` into `process_frame`. Replaces any
    /// previously attached camera.
    pub fn attach_camera(&self, source: &dyn FrameSource) -> Result<()> {
        let weak = Arc::downgrade(&self.shared);
        let sink: FrameSink = Arc::new(move |frame: &Frame| {
            if let Some(shared) = weak.upgrade() {
                shared.process_frame(frame);
            }
        });
        let subscription = source
            .subscribe(sink)
            .context("failed to subscribe to camera frames")?;
        let previous = lock(&self.shared.camera_sub).replace(subscription);
        drop(previous);
        log::debug!("camera attached");
        Ok(())
    }

    /// Unsubscribe from every producer and drop any lock. Later frames are
    /// ignored. Idempotent.
    pub fn shutdown(&self) {
        {
            let mut core = lock(&self.shared.core);
            if !core.closed {
                log::info!("tracker shutting down");
            }
            core.closed = true;
        }
        let camera = lock(&self.shared.camera_sub).take();
        drop(camera);
        self.shared.reset("tracker shut down");
    }
}
