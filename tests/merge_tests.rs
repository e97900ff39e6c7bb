mod common;

use image::RgbImage;

use common::ScriptedClassifier;
use wayrunner::error::EnvironmentError;
use wayrunner::vision::merge::{solve_frame, CANONICAL_HEIGHT, CANONICAL_WIDTH};
use wayrunner::vision::{BoundingBox, Detection, Label::*, SolutionAttempt};

fn frame() -> RgbImage {
    RgbImage::new(1366, 768)
}

/// Four arrows spread across the middle of the puzzle region.
fn located_arrows() -> Vec<Detection> {
    (0..4)
        .map(|i| {
            let x = 0.3 + 0.08 * i as f32;
            Detection::new(Up, 0.9, BoundingBox::new(0.2, x, 0.8, x + 0.06))
        })
        .collect()
}

#[test]
fn test_full_pipeline_merges_rotated_read() {
    let upright = vec![
        Detection::new(Right, 0.95, BoundingBox::new(0.4, 0.8, 0.6, 0.9)),
        Detection::new(Up, 0.97, BoundingBox::new(0.4, 0.1, 0.6, 0.2)),
        Detection::new(Down, 0.91, BoundingBox::new(0.4, 0.5, 0.6, 0.6)),
        Detection::new(Left, 0.93, BoundingBox::new(0.4, 0.3, 0.6, 0.4)),
    ];
    // rotated: bottom of the rotated image is the left of the original
    let rotated = vec![
        Detection::new(Down, 0.88, BoundingBox::new(0.1, 0.4, 0.3, 0.6)),
        Detection::new(Up, 0.92, BoundingBox::new(0.7, 0.4, 0.9, 0.6)),
        Detection::new(Left, 0.99, BoundingBox::new(0.4, 0.4, 0.5, 0.6)),
    ];
    let classifier = ScriptedClassifier::new(vec![located_arrows(), upright, rotated]);

    let attempt = solve_frame(&classifier, &frame()).unwrap();
    assert_eq!(attempt.labels(), &[Up, Right, Down, Left]);

    let sizes = classifier.sizes.lock().unwrap().clone();
    assert_eq!(sizes[0], (683, 264));
    assert_eq!(sizes[1], (CANONICAL_WIDTH, CANONICAL_HEIGHT));
    assert_eq!(sizes[2], (CANONICAL_HEIGHT, CANONICAL_WIDTH));
}

#[test]
fn test_fewer_than_four_arrows_is_a_miss() {
    let mut arrows = located_arrows();
    arrows[3].confidence = 0.5;
    let classifier = ScriptedClassifier::new(vec![arrows]);

    let attempt = solve_frame(&classifier, &frame()).unwrap();
    assert_eq!(attempt, SolutionAttempt::empty());
    assert_eq!(classifier.calls.get(), 1);
}

#[test]
fn test_oversized_union_box_is_a_miss_not_a_crash() {
    // 0.0..1.0 of a 683 px wide region cannot fit 455 px
    let arrows = vec![
        Detection::new(Up, 0.9, BoundingBox::new(0.4, 0.0, 0.6, 0.1)),
        Detection::new(Up, 0.9, BoundingBox::new(0.4, 0.3, 0.6, 0.4)),
        Detection::new(Up, 0.9, BoundingBox::new(0.4, 0.6, 0.6, 0.7)),
        Detection::new(Up, 0.9, BoundingBox::new(0.4, 0.9, 0.6, 1.0)),
    ];
    let classifier = ScriptedClassifier::new(vec![arrows]);

    let attempt = solve_frame(&classifier, &frame()).unwrap();
    assert!(attempt.is_empty());
    assert_eq!(classifier.calls.get(), 1);
}

#[test]
fn test_upright_read_with_three_labels_is_a_miss() {
    let upright = vec![
        Detection::new(Up, 0.9, BoundingBox::new(0.4, 0.1, 0.6, 0.2)),
        Detection::new(Up, 0.9, BoundingBox::new(0.4, 0.3, 0.6, 0.4)),
        Detection::new(Up, 0.9, BoundingBox::new(0.4, 0.5, 0.6, 0.6)),
    ];
    let classifier = ScriptedClassifier::new(vec![located_arrows(), upright, Vec::new()]);
    assert!(solve_frame(&classifier, &frame()).unwrap().is_empty());
}

#[test]
fn test_classifier_failure_propagates() {
    let classifier = ScriptedClassifier::broken();
    let err = solve_frame(&classifier, &frame()).unwrap_err();
    assert!(matches!(err, EnvironmentError::Classifier(_)));
}

#[test]
fn test_tiny_frame_is_a_miss() {
    let classifier = ScriptedClassifier::new(vec![located_arrows()]);
    assert!(solve_frame(&classifier, &RgbImage::new(200, 200)).unwrap().is_empty());
    assert_eq!(classifier.calls.get(), 0);
}
