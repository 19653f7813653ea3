//! Camera frames.
//!
//! - `Frame`: one captured image plus the metadata the tracker needs. Pixel
//!   bytes are private; only the inference path reads them.
//! - `FrameView`: borrowed view handed to an `InferenceEngine`.
//!
//! The tracker itself only ever looks at `width`, `height` and `camera_id`.
//! Color-space decode and letterboxing happen before a frame gets here.

use std::time::Instant;

/// A captured camera frame.
pub struct Frame {
    /// Private pixel data, in whatever layout the inference engine expects.
    data: Vec<u8>,

    pub width: u32,
    pub height: u32,

    /// Identity of the camera that produced this frame. Calibration is keyed on it.
    pub camera_id: String,

    /// Monotonic capture instant.
    captured_at: Instant,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, camera_id: impl Into<String>) -> Self {
        Self {
            data,
            width,
            height,
            camera_id: camera_id.into(),
            captured_at: Instant::now(),
        }
    }

    /// Frame with dimensions only. Used by sources that deliver metadata ahead of pixels,
    /// and by tests.
    pub fn metadata_only(width: u32, height: u32, camera_id: impl Into<String>) -> Self {
        Self::new(Vec::new(), width, height, camera_id)
    }

    /// Restricted view for inference.
    pub fn view(&self) -> FrameView<'_> {
        FrameView { frame: self }
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("camera_id", &self.camera_id)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Borrowed view of a frame for inference.
///
/// Engines read pixels through `pixels()`; the slice lifetime keeps them from
/// holding on to the buffer past the `infer` call.
#[derive(Clone, Copy)]
pub struct FrameView<'a> {
    frame: &'a Frame,
}

impl<'a> FrameView<'a> {
    pub fn width(&self) -> u32 {
        self.frame.width
    }

    pub fn height(&self) -> u32 {
        self.frame.height
    }

    pub fn camera_id(&self) -> &'a str {
        &self.frame.camera_id
    }

    pub fn pixels(&self) -> &'a [u8] {
        &self.frame.data
    }
}
