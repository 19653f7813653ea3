use serde::{Deserialize, Serialize};

use crate::Rect;

/// One detection produced by an inference pass.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionBox {
    pub label: String,
    /// Confidence in `[0, 1]`.
    pub confidence: f32,
    /// Box in source-frame pixel coordinates.
    pub rect: Rect,
    /// Ranked `(label, percentage)` alternatives, best first.
    #[serde(default)]
    pub top_labels: Vec<(String, u32)>,
}

impl DetectionBox {
    /// Detection whose only ranked label is its own.
    pub fn new(label: impl Into<String>, confidence: f32, rect: Rect) -> Self {
        let label = label.into();
        let top_labels = vec![(label.clone(), percentage(confidence))];
        Self {
            label,
            confidence,
            rect,
            top_labels,
        }
    }
}

fn percentage(confidence: f32) -> u32 {
    (confidence.clamp(0.0, 1.0) * 100.0).round() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_top_label_mirrors_confidence() {
        let rect = Rect::new(1.0, 2.0, 3.0, 4.0);
        let b = DetectionBox::new("cup", 0.9, rect);
        assert_eq!(b.confidence, 0.9);
        assert_eq!(b.top_labels, vec![("cup".to_string(), 90)]);
        assert_eq!(b.rect, rect);
    }

    #[test]
    fn top_label_percentage_is_clamped() {
        let b = DetectionBox::new("cup", 1.7, Rect::default());
        assert_eq!(b.top_labels[0].1, 100);
    }
}
