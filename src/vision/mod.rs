pub mod capture;
pub mod classifier;
pub mod frame;
pub mod merge;
pub mod template;

pub use capture::{Capture, LatestFrame, ScreenGrabber};
pub use classifier::{BoundingBox, Classifier, Detection, Label, SolutionAttempt, UnavailableClassifier};
pub use template::Template;
