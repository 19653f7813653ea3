use crate::detect::result::DetectionBox;

/// Picks the detection to lock onto.
///
/// Only candidates whose label equals `target` and whose confidence is at least
/// `confidence_floor` qualify. Highest confidence wins; ties go to the earliest
/// candidate. NaN confidences never qualify.
pub fn match_target<'a>(
    detections: &'a [DetectionBox],
    target: &str,
    confidence_floor: f32,
) -> Option<&'a DetectionBox> {
    let mut best: Option<&DetectionBox> = None;
    for candidate in detections {
        if candidate.label != target
            || candidate.confidence.is_nan()
            || candidate.confidence < confidence_floor
        {
            continue;
        }
        match best {
            Some(current) if candidate.confidence <= current.confidence => {}
            _ => best = Some(candidate),
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Rect, DEFAULT_CONFIDENCE_FLOOR};

    fn det(label: &str, confidence: f32, left: f32) -> DetectionBox {
        DetectionBox::new(label, confidence, Rect::new(left, 0.0, left + 10.0, 10.0))
    }

    #[test]
    fn highest_confidence_wins() {
        let dets = vec![det("cup", 0.7, 0.0), det("cup", 0.95, 20.0), det("cup", 0.8, 40.0)];
        let m = match_target(&dets, "cup", DEFAULT_CONFIDENCE_FLOOR).unwrap();
        assert_eq!(m.rect.left, 20.0);
    }

    #[test]
    fn ties_break_on_first_seen() {
        let dets = vec![det("cup", 0.8, 0.0), det("cup", 0.8, 20.0)];
        let m = match_target(&dets, "cup", DEFAULT_CONFIDENCE_FLOOR).unwrap();
        assert_eq!(m.rect.left, 0.0);
    }

    #[test]
    fn floor_is_inclusive() {
        let dets = vec![det("cup", 0.6, 0.0)];
        assert!(match_target(&dets, "cup", 0.6).is_some());
    }

    #[test]
    fn below_floor_or_wrong_label_is_no_match() {
        let dets = vec![det("cup", 0.59, 0.0), det("bottle", 0.99, 20.0)];
        assert!(match_target(&dets, "cup", DEFAULT_CONFIDENCE_FLOOR).is_none());
    }

    #[test]
    fn nan_confidence_never_matches() {
        let dets = vec![det("cup", f32::NAN, 0.0)];
        assert!(match_target(&dets, "cup", 0.0).is_none());
    }

    #[test]
    fn empty_pass_is_no_match() {
        assert!(match_target(&[], "cup", DEFAULT_CONFIDENCE_FLOOR).is_none());
    }
}
