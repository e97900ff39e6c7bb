//! Dual-orientation read of the arrow overlay.
//!
//! The detector is more reliable on vertical arrows than horizontal ones, so
//! the isolated overlay is read twice: upright, and rotated 90° counter-
//! clockwise. Horizontal arrows in the upright read are overridden, in order,
//! by the vertical arrows of the rotated read mapped back.

use image::RgbImage;
use tracing::debug;

use super::classifier::{BoundingBox, Classifier, Detection, Label, SolutionAttempt};
use super::frame;
use crate::error::EnvironmentError;

/// Detections at or below this confidence are discarded.
pub const CONFIDENCE_FLOOR: f32 = 0.5;
pub const CANONICAL_WIDTH: u32 = 455;
pub const CANONICAL_HEIGHT: u32 = 384;

/// At most four detections above the floor, most confident first.
pub fn top_detections(mut detections: Vec<Detection>) -> Vec<Detection> {
    detections.retain(|d| d.confidence > CONFIDENCE_FLOOR);
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    detections.truncate(SolutionAttempt::LEN);
    detections
}

/// Upright read, left to right.
pub fn upright_labels(detections: Vec<Detection>) -> Vec<Label> {
    let mut top = top_detections(detections);
    top.sort_by(|a, b| a.bbox.xmin.total_cmp(&b.bbox.xmin));
    top.into_iter().filter_map(|d| d.label).collect()
}

/// Rotated read mapped back to upright horizontals. Only vertical readings
/// are kept; the rotated image's bottom edge is the original's left edge.
pub fn rotated_replacements(detections: Vec<Detection>) -> Vec<Label> {
    let mut top = top_detections(detections);
    top.sort_by(|a, b| b.bbox.ymax.total_cmp(&a.bbox.ymax));
    top.into_iter()
        .filter_map(|d| d.label)
        .filter_map(|l| l.rotated_to_upright())
        .collect()
}

/// Replace each horizontal base label with the next unconsumed replacement.
/// Vertical base labels are never overridden.
pub fn merge_labels(base: &[Label], replacements: &[Label]) -> Vec<Label> {
    let mut pending = replacements.iter().copied();
    base.iter()
        .map(|&label| {
            if label.is_horizontal() {
                pending.next().unwrap_or(label)
            } else {
                label
            }
        })
        .collect()
}

/// Full pipeline on one environment frame. Every miss (fewer than four
/// arrows, oversized overlay) yields the empty attempt; only classifier
/// failures are errors.
pub fn solve_frame(classifier: &dyn Classifier, frame: &RgbImage) -> Result<SolutionAttempt, EnvironmentError> {
    let Some(region) = frame::puzzle_region(frame) else {
        debug!("frame {:?} too small for the puzzle region", frame.dimensions());
        return Ok(SolutionAttempt::empty());
    };
    let edges = frame::preprocess(&region);

    let arrows = top_detections(classifier.classify(&edges)?);
    if arrows.len() < SolutionAttempt::LEN {
        return Ok(SolutionAttempt::empty());
    }

    let Some(overlay) = BoundingBox::union(arrows.iter().map(|d| &d.bbox)).and_then(|b| frame::crop_box(&edges, &b))
    else {
        return Ok(SolutionAttempt::empty());
    };
    let Some(canvas) = frame::pad_centered(&overlay, CANONICAL_WIDTH, CANONICAL_HEIGHT) else {
        debug!(
            "overlay {:?} exceeds canonical {}x{}",
            overlay.dimensions(),
            CANONICAL_WIDTH,
            CANONICAL_HEIGHT
        );
        return Ok(SolutionAttempt::empty());
    };

    let base = upright_labels(classifier.classify(&canvas)?);
    let replacements = rotated_replacements(classifier.classify(&frame::rotate_ccw(&canvas))?);
    Ok(SolutionAttempt::from_labels(merge_labels(&base, &replacements)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use Label::*;

    fn det(label: Label, confidence: f32, xmin: f32, ymax: f32) -> Detection {
        Detection::new(label, confidence, BoundingBox::new(0.0, xmin, ymax, xmin + 0.1))
    }

    #[test]
    fn only_horizontal_slots_are_replaced_in_order() {
        let merged = merge_labels(&[Up, Left, Down, Right], &[Right, Left]);
        assert_eq!(merged, vec![Up, Right, Down, Left]);
    }

    #[test]
    fn unreplaced_slots_keep_their_base_label() {
        let merged = merge_labels(&[Left, Left, Up, Right], &[Right]);
        assert_eq!(merged, vec![Right, Left, Up, Right]);
        assert_eq!(merge_labels(&[Up, Down, Up, Down], &[Left, Left]), vec![Up, Down, Up, Down]);
    }

    #[test]
    fn floor_is_exclusive_and_result_capped_at_four() {
        let dets = vec![
            det(Up, 0.5, 0.0, 0.0),
            det(Down, 0.51, 0.1, 0.0),
            det(Left, 0.9, 0.2, 0.0),
            det(Right, 0.7, 0.3, 0.0),
            det(Up, 0.8, 0.4, 0.0),
            det(Down, 0.6, 0.5, 0.0),
        ];
        let top = top_detections(dets);
        let confidences: Vec<f32> = top.iter().map(|d| d.confidence).collect();
        assert_eq!(confidences, vec![0.9, 0.8, 0.7, 0.6]);
    }

    #[test]
    fn upright_reads_left_to_right() {
        let dets = vec![
            det(Right, 0.9, 0.7, 0.0),
            det(Up, 0.9, 0.1, 0.0),
            det(Left, 0.9, 0.5, 0.0),
            det(Down, 0.9, 0.3, 0.0),
        ];
        assert_eq!(upright_labels(dets), vec![Up, Down, Left, Right]);
    }

    #[test]
    fn rotated_reads_bottom_to_top_keeping_verticals() {
        let dets = vec![
            det(Up, 0.9, 0.0, 0.2),
            det(Left, 0.9, 0.0, 0.9),
            det(Down, 0.9, 0.0, 0.6),
            det(Up, 0.9, 0.0, 0.4),
        ];
        assert_eq!(rotated_replacements(dets), vec![Left, Right, Right]);
    }
}
