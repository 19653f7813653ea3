mod backend;
mod backends;
mod matcher;
mod result;

pub use backend::InferenceEngine;
pub use backends::ScriptedBackend;
pub use matcher::match_target;
pub use result::DetectionBox;
