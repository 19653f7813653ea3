use anyhow::Result;

use crate::detect::result::DetectionBox;
use crate::frame::FrameView;

/// Inference engine boundary.
///
/// The tracker calls `infer` once per SCANNING frame and never while LOCKED.
/// Calls are synchronous; an engine is expected to bound its own latency.
/// Errors are not fatal to tracking: the tracker logs them and treats the
/// frame as having produced no detections.
pub trait InferenceEngine: Send {
    /// Engine identifier, used in logs.
    fn name(&self) -> &'static str;

    /// Run one inference pass. May return an empty sequence.
    fn infer(&mut self, frame: FrameView<'_>) -> Result<Vec<DetectionBox>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
