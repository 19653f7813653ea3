use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{anyhow, Result};

use crate::detect::backend::InferenceEngine;
use crate::detect::result::DetectionBox;
use crate::frame::FrameView;

enum Pass {
    Detections(Vec<DetectionBox>),
    Failure(String),
}

#[derive(Default)]
struct Script {
    queued: VecDeque<Pass>,
    /// Returned once the queue runs dry.
    steady: Vec<DetectionBox>,
    calls: usize,
}

/// Scripted engine for tests, replay and the demo.
///
/// Cloning yields another handle onto the same script, so a caller can keep
/// feeding passes after handing the engine to a tracker.
#[derive(Clone, Default)]
pub struct ScriptedBackend {
    script: Arc<Mutex<Script>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the result of the next inference pass.
    pub fn push(&self, detections: Vec<DetectionBox>) {
        self.lock().queued.push_back(Pass::Detections(detections));
    }

    /// Queue a failing pass.
    pub fn push_failure(&self, message: impl Into<String>) {
        self.lock().queued.push_back(Pass::Failure(message.into()));
    }

    /// Result returned whenever nothing is queued.
    pub fn set_steady(&self, detections: Vec<DetectionBox>) {
        self.lock().steady = detections;
    }

    /// Number of `infer` calls so far.
    pub fn calls(&self) -> usize {
        self.lock().calls
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl InferenceEngine for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn infer(&mut self, _frame: FrameView<'_>) -> Result<Vec<DetectionBox>> {
        let mut script = self.lock();
        script.calls += 1;
        match script.queued.pop_front() {
            Some(Pass::Detections(detections)) => Ok(detections),
            Some(Pass::Failure(message)) => Err(anyhow!(message)),
            None => Ok(script.steady.clone()),
        }
    }
}
