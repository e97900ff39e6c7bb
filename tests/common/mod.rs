#![allow(dead_code)]

use image::RgbImage;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use wayrunner::command_book::{Action, ActionContext, ActionFactory, CommandBook};
use wayrunner::error::{ActionError, EnvironmentError};
use wayrunner::input::ScreenPoint;
use wayrunner::kernel::state::StateDelta;
use wayrunner::kernel::time::Pacer;
use wayrunner::resolver::{Sampler, SuccessProbe};
use wayrunner::routine::Params;
use wayrunner::vision::{Capture, Classifier, Detection, Label, SolutionAttempt};

/// Records requested sleeps instead of sleeping.
#[derive(Debug, Default)]
pub struct NoopPacer {
    slept: Mutex<Vec<Duration>>,
}

impl NoopPacer {
    pub fn total(&self) -> Duration {
        self.slept.lock().unwrap().iter().sum()
    }
}

impl Pacer for NoopPacer {
    fn sleep(&self, duration: Duration) {
        self.slept.lock().unwrap().push(duration);
    }
}

/// Counter shared with a fake after it has been boxed away.
#[derive(Debug, Clone, Default)]
pub struct Calls(Arc<AtomicUsize>);

impl Calls {
    pub fn bump(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Replays readings; empty once the script runs out.
pub struct ScriptedSampler {
    script: VecDeque<Result<SolutionAttempt, EnvironmentError>>,
    pub calls: Calls,
}

impl ScriptedSampler {
    pub fn new(readings: Vec<SolutionAttempt>) -> Self {
        Self {
            script: readings.into_iter().map(Ok).collect(),
            calls: Calls::default(),
        }
    }

    pub fn failing(times: usize) -> Self {
        Self {
            script: (0..times).map(|_| Err(EnvironmentError::FrameUnavailable)).collect(),
            calls: Calls::default(),
        }
    }
}

impl Sampler for ScriptedSampler {
    fn sample(&mut self) -> Result<SolutionAttempt, EnvironmentError> {
        self.calls.bump();
        self.script.pop_front().unwrap_or_else(|| Ok(SolutionAttempt::empty()))
    }
}

/// Replays probe results; no match once the script runs out.
pub struct ScriptedProbe {
    script: VecDeque<Option<ScreenPoint>>,
    pub calls: Calls,
}

impl ScriptedProbe {
    pub fn new(script: Vec<Option<ScreenPoint>>) -> Self {
        Self {
            script: script.into(),
            calls: Calls::default(),
        }
    }

    pub fn never() -> Self {
        Self::new(Vec::new())
    }
}

impl SuccessProbe for ScriptedProbe {
    fn locate(&mut self) -> Result<Option<ScreenPoint>, EnvironmentError> {
        self.calls.bump();
        Ok(self.script.pop_front().flatten())
    }
}

/// Always serves the same frame.
pub struct FixedCapture {
    frame: Arc<RgbImage>,
    origin: (i32, i32),
}

impl FixedCapture {
    pub fn new(frame: RgbImage, origin: (i32, i32)) -> Self {
        Self {
            frame: Arc::new(frame),
            origin,
        }
    }
}

impl Capture for FixedCapture {
    fn frame(&self) -> Result<Arc<RgbImage>, EnvironmentError> {
        Ok(Arc::clone(&self.frame))
    }

    fn window_origin(&self) -> (i32, i32) {
        self.origin
    }
}

/// Answers classify calls in order; no detections once the script runs out.
#[derive(Default)]
pub struct ScriptedClassifier {
    responses: Mutex<VecDeque<Result<Vec<Detection>, EnvironmentError>>>,
    pub calls: Calls,
    pub sizes: Mutex<Vec<(u32, u32)>>,
}

impl ScriptedClassifier {
    pub fn new(responses: Vec<Vec<Detection>>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(Ok).collect()),
            ..Self::default()
        }
    }

    pub fn broken() -> Self {
        Self {
            responses: Mutex::new(VecDeque::from(vec![Err(EnvironmentError::Classifier("model crashed".to_string()))])),
            ..Self::default()
        }
    }
}

impl Classifier for ScriptedClassifier {
    fn classify(&self, image: &RgbImage) -> Result<Vec<Detection>, EnvironmentError> {
        self.calls.bump();
        self.sizes.lock().unwrap().push(image.dimensions());
        self.responses.lock().unwrap().pop_front().unwrap_or_else(|| Ok(Vec::new()))
    }
}

pub fn attempt(labels: &[Label]) -> SolutionAttempt {
    SolutionAttempt::from_labels(labels.to_vec())
}

pub fn factory<F>(f: F) -> impl ActionFactory
where
    F: Fn(&Params) -> Result<Box<dyn Action>, ActionError> + Send + Sync + 'static,
{
    f
}

/// Presses one fixed key.
pub struct Press(pub &'static str);

impl Action for Press {
    fn execute(&mut self, ctx: &mut ActionContext<'_>) -> Result<(), ActionError> {
        let key = ctx.key(self.0).to_string();
        ctx.input.press_key(&key, Duration::from_millis(50))?;
        Ok(())
    }
}

/// `step` primitive that lands exactly on its target.
pub struct Teleport {
    pub target: wayrunner::kernel::state::Point,
}

impl Action for Teleport {
    fn execute(&mut self, ctx: &mut ActionContext<'_>) -> Result<(), ActionError> {
        let key = ctx.key("teleport").to_string();
        ctx.input.press_key(&key, Duration::from_millis(50))?;
        ctx.state.apply(StateDelta::PlayerMoved(self.target));
        Ok(())
    }
}

/// Minimal valid book: `buff` presses f1, `step` teleports, `jump` presses space.
pub fn teleport_book(name: &str) -> CommandBook {
    CommandBook::builder(name)
        .bind("jump", "space")
        .register("buff", factory(|_| Ok(Box::new(Press("f1")))))
        .register("step", factory(|p| Ok(Box::new(Teleport { target: p.point("step")? }))))
        .register("jump", factory(|_| Ok(Box::new(Press("jump")))))
        .build()
        .expect("teleport book is valid")
}
