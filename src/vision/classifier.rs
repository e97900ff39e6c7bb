use image::RgbImage;
use serde::Serialize;
use std::fmt;

use crate::error::EnvironmentError;

/// Arrow symbol read off the puzzle overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    Up,
    Down,
    Left,
    Right,
}

impl Label {
    /// Detector class ids are 1-based: up, down, left, right.
    pub fn from_class_id(id: u32) -> Option<Label> {
        match id {
            1 => Some(Label::Up),
            2 => Some(Label::Down),
            3 => Some(Label::Left),
            4 => Some(Label::Right),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Up => "up",
            Label::Down => "down",
            Label::Left => "left",
            Label::Right => "right",
        }
    }

    pub fn is_horizontal(&self) -> bool {
        matches!(self, Label::Left | Label::Right)
    }

    /// Map a vertical reading taken on the 90° counter-clockwise rotated
    /// image back to the horizontal arrow it came from.
    pub fn rotated_to_upright(&self) -> Option<Label> {
        match self {
            Label::Up => Some(Label::Right),
            Label::Down => Some(Label::Left),
            Label::Left | Label::Right => None,
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized box, `[0, 1]` on both axes, origin top-left.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct BoundingBox {
    pub ymin: f32,
    pub xmin: f32,
    pub ymax: f32,
    pub xmax: f32,
}

impl BoundingBox {
    pub fn new(ymin: f32, xmin: f32, ymax: f32, xmax: f32) -> Self {
        Self { ymin, xmin, ymax, xmax }
    }

    /// Smallest box containing every input box.
    pub fn union<'a>(boxes: impl IntoIterator<Item = &'a BoundingBox>) -> Option<BoundingBox> {
        boxes.into_iter().fold(None, |acc: Option<BoundingBox>, b| {
            Some(match acc {
                None => *b,
                Some(a) => BoundingBox {
                    ymin: a.ymin.min(b.ymin),
                    xmin: a.xmin.min(b.xmin),
                    ymax: a.ymax.max(b.ymax),
                    xmax: a.xmax.max(b.xmax),
                },
            })
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    /// `None` for class ids outside the arrow label map.
    pub label: Option<Label>,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn new(label: Label, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            label: Some(label),
            confidence,
            bbox,
        }
    }
}

/// The trained detector. Lives outside the crate; implementations must be
/// callable from the control-loop thread.
pub trait Classifier: Send + Sync {
    fn classify(&self, image: &RgbImage) -> Result<Vec<Detection>, EnvironmentError>;
}

/// Stand-in used when no model is wired up. Every call fails, so every
/// sampling iteration reads as "no candidate".
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableClassifier;

impl Classifier for UnavailableClassifier {
    fn classify(&self, _image: &RgbImage) -> Result<Vec<Detection>, EnvironmentError> {
        Err(EnvironmentError::Classifier("no model loaded".to_string()))
    }
}

/// Exactly four labels ordered left to right, or empty for a miss.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize)]
pub struct SolutionAttempt(Vec<Label>);

impl SolutionAttempt {
    pub const LEN: usize = 4;

    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// Anything but exactly four labels collapses to the empty attempt.
    pub fn from_labels(labels: Vec<Label>) -> Self {
        if labels.len() == Self::LEN {
            Self(labels)
        } else {
            Self::empty()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn labels(&self) -> &[Label] {
        &self.0
    }
}

impl fmt::Display for SolutionAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.0.iter().map(Label::as_str).collect();
        write!(f, "[{}]", names.join(", "))
    }
}
