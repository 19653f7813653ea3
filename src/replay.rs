//! Deterministic trace replay.
//!
//! A trace is a recorded sequence of tracker inputs with timestamps. Replay
//! feeds it through a `Tracker` driven by a manual clock and a scripted
//! inference engine, so the same trace always yields the same records.
//!
//! ```json
//! {
//!   "field_of_view": { "horizontal_deg": 64.0, "vertical_deg": 48.0 },
//!   "events": [
//!     { "t_ms": 0,   "kind": "target", "label": "cup" },
//!     { "t_ms": 10,  "kind": "frame", "width": 640, "height": 480,
//!       "detections": [{ "label": "cup", "confidence": 0.8,
//!                        "rect": { "left": 100, "top": 100, "right": 200, "bottom": 200 } }] },
//!     { "t_ms": 20,  "kind": "orientation", "vector": [0.0, 0.0, -0.0436, 0.999] },
//!     { "t_ms": 900, "kind": "reset" }
//!   ]
//! }
//! ```

use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};

use crate::calibration::{FieldOfView, StaticIntrinsics};
use crate::config::TrackerConfig;
use crate::detect::{DetectionBox, ScriptedBackend};
use crate::frame::Frame;
use crate::observer::{ChannelObserver, TrackerEvent};
use crate::rate_limit::ManualClock;
use crate::tracker::{FrameOutcome, SampleOutcome, Tracker};
use crate::TrackingState;

#[derive(Clone, Debug, Deserialize)]
pub struct Trace {
    /// Intrinsics reported for every camera. Absent means fallback calibration.
    #[serde(default)]
    pub field_of_view: Option<FieldOfView>,
    pub events: Vec<TraceEvent>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TraceEvent {
    /// Wall-clock time of the input. Must not decrease.
    pub t_ms: u64,
    #[serde(flatten)]
    pub input: TraceInput,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TraceInput {
    /// A camera frame. `detections` is what inference reports if the frame
    /// reaches the engine.
    Frame {
        width: u32,
        height: u32,
        #[serde(default)]
        camera_id: Option<String>,
        #[serde(default)]
        detections: Vec<DetectionBox>,
    },
    /// A raw rotation vector.
    Orientation { vector: Vec<f32> },
    Reset,
    /// Select a new target. No label clears it.
    Target {
        #[serde(default)]
        label: Option<String>,
    },
}

impl TraceInput {
    fn kind(&self) -> &'static str {
        match self {
            TraceInput::Frame { .. } => "frame",
            TraceInput::Orientation { .. } => "orientation",
            TraceInput::Reset => "reset",
            TraceInput::Target { .. } => "target",
        }
    }
}

impl Trace {
    pub fn from_json(raw: &str) -> Result<Self> {
        let trace: Trace =
            serde_json::from_str(raw).map_err(|e| anyhow!("invalid trace: {}", e))?;
        trace.validate()?;
        Ok(trace)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("failed to read trace {}: {}", path.display(), e))?;
        Self::from_json(&raw).map_err(|e| anyhow!("{}: {}", path.display(), e))
    }

    fn validate(&self) -> Result<()> {
        let mut previous = 0u64;
        for (index, event) in self.events.iter().enumerate() {
            if event.t_ms < previous {
                bail!(
                    "event {} at t_ms {} is earlier than the event before it ({})",
                    index,
                    event.t_ms,
                    previous
                );
            }
            previous = event.t_ms;
        }
        Ok(())
    }
}

/// Outcome of one replayed event.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ReplayRecord {
    pub t_ms: u64,
    pub kind: &'static str,
    /// Tracker state after the event.
    pub state: TrackingState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame: Option<FrameOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample: Option<SampleOutcome>,
    /// Observer notifications caused by the event, in delivery order.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<TrackerEvent>,
}

/// Replays `trace` against a fresh tracker built from `config`.
pub fn run(trace: &Trace, config: TrackerConfig) -> Result<Vec<ReplayRecord>> {
    config.validate()?;
    trace.validate()?;

    let engine = ScriptedBackend::new();
    let start_ms = trace.events.first().map(|e| e.t_ms).unwrap_or_default();
    let clock = ManualClock::new(start_ms);
    let (observer, notifications) = ChannelObserver::unbounded();

    let mut builder = Tracker::builder(config, engine.clone())
        .clock(Arc::new(clock.clone()))
        .observer(Arc::new(observer));
    if let Some(fov) = trace.field_of_view {
        builder = builder.intrinsics(StaticIntrinsics::new(fov));
    }
    let tracker = builder.build();
    log::debug!("replaying {} trace events", trace.events.len());

    let mut records = Vec::with_capacity(trace.events.len());
    for event in &trace.events {
        clock.set_ms(event.t_ms);
        let mut record = ReplayRecord {
            t_ms: event.t_ms,
            kind: event.input.kind(),
            state: TrackingState::Scanning,
            frame: None,
            sample: None,
            events: Vec::new(),
        };

        match &event.input {
            TraceInput::Frame {
                width,
                height,
                camera_id,
                detections,
            } => {
                engine.set_steady(detections.clone());
                let camera_id = camera_id.as_deref().unwrap_or_default();
                let frame = Frame::metadata_only(*width, *height, camera_id);
                record.frame = Some(tracker.process_frame(&frame));
            }
            TraceInput::Orientation { vector } => {
                record.sample = Some(tracker.on_orientation_sample(vector));
            }
            TraceInput::Reset => tracker.reset_to_scanning(),
            TraceInput::Target { label: Some(label) } => tracker.set_target(label.as_str()),
            TraceInput::Target { label: None } => tracker.clear_target(),
        }

        record.state = tracker.current_state();
        record.events = notifications.try_iter().collect();
        records.push(record);
    }

    tracker.shutdown();
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_event_kind() {
        let trace = Trace::from_json(
            r#"{ "events": [
                { "t_ms": 0, "kind": "target", "label": "cup" },
                { "t_ms": 5, "kind": "target" },
                { "t_ms": 10, "kind": "frame", "width": 640, "height": 480, "camera_id": "front" },
                { "t_ms": 20, "kind": "orientation", "vector": [0.0, 0.0, 0.0] },
                { "t_ms": 30, "kind": "reset" }
            ] }"#,
        )
        .unwrap();
        assert_eq!(trace.events.len(), 5);
        assert!(trace.field_of_view.is_none());
        assert!(matches!(
            &trace.events[1].input,
            TraceInput::Target { label: None }
        ));
        assert!(matches!(
            &trace.events[2].input,
            TraceInput::Frame { camera_id: Some(id), detections, .. }
                if id == "front" && detections.is_empty()
        ));
    }

    #[test]
    fn rejects_time_going_backwards() {
        let err = Trace::from_json(
            r#"{ "events": [
                { "t_ms": 100, "kind": "reset" },
                { "t_ms": 50, "kind": "reset" }
            ] }"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("earlier"));
    }

    #[test]
    fn rejects_unknown_kind() {
        assert!(Trace::from_json(r#"{ "events": [{ "t_ms": 0, "kind": "audio" }] }"#).is_err());
    }

    #[test]
    fn empty_trace_replays_to_nothing() {
        let trace = Trace::from_json(r#"{ "events": [] }"#).unwrap();
        assert!(run(&trace, TrackerConfig::default()).unwrap().is_empty());
    }

    #[test]
    fn record_serializes_without_empty_fields() {
        let record = ReplayRecord {
            t_ms: 7,
            kind: "reset",
            state: TrackingState::Scanning,
            frame: None,
            sample: None,
            events: Vec::new(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "t_ms": 7, "kind": "reset", "state": "Scanning" })
        );
    }
}
