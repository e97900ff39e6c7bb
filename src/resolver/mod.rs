//! Puzzle (rune) resolution episode.
//!
//! `Idle -> Navigating -> Sampling -> Confirmed -> Executing -> Verifying -> Resolved`,
//! or `Sampling -> Abandoned` once the sample budget runs out. An episode
//! blocks the control loop for its whole, bounded, duration and is never
//! cancelled part-way.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::command_book::{ActionContext, ADJUST, MOVE};
use crate::error::EnvironmentError;
use crate::input::{MouseButton, ScreenPoint};
use crate::kernel::event::{Notifier, UiEvent};
use crate::kernel::state::{Point, StateDelta};
use crate::kernel::time::TAP_GAP;
use crate::routine::Params;
use crate::vision::{merge, Capture, Classifier, SolutionAttempt, Template};

/// Sampling iterations per episode, empty readings included.
pub const SAMPLE_BUDGET: usize = 15;
/// Success-icon polls after the answer is entered.
pub const VERIFY_POLLS: usize = 3;

const SETTLE_BEFORE_INTERACT: Duration = Duration::from_millis(200);
const INTERACT_HOLD: Duration = Duration::from_millis(200);
const OVERLAY_PAUSE: Duration = Duration::from_millis(200);
const ARROW_HOLD: Duration = Duration::from_millis(100);
const VERIFY_DELAY: Duration = Duration::from_secs(1);
const VERIFY_INTERVAL: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ResolverState {
    Idle,
    Navigating,
    Sampling,
    Confirmed,
    Executing,
    Verifying,
    Resolved,
    Abandoned,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Resolved {
        episode: Uuid,
        solution: SolutionAttempt,
        samples: usize,
        clicks: usize,
    },
    Abandoned {
        episode: Uuid,
        samples: usize,
    },
}

/// Readings collected during one episode. A reading is confirmed as soon as
/// it repeats an earlier one; empty readings are never remembered.
#[derive(Debug, Default)]
pub struct Consensus {
    readings: Vec<SolutionAttempt>,
}

impl Consensus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, attempt: &SolutionAttempt) -> bool {
        if attempt.is_empty() {
            return false;
        }
        if self.readings.contains(attempt) {
            return true;
        }
        self.readings.push(attempt.clone());
        false
    }

    pub fn readings(&self) -> &[SolutionAttempt] {
        &self.readings
    }
}

/// One reading of the overlay.
pub trait Sampler: Send {
    fn sample(&mut self) -> Result<SolutionAttempt, EnvironmentError>;
}

/// Reads the latest captured frame through the merge pipeline.
pub struct FrameSampler {
    capture: Arc<dyn Capture>,
    classifier: Arc<dyn Classifier>,
}

impl FrameSampler {
    pub fn new(capture: Arc<dyn Capture>, classifier: Arc<dyn Classifier>) -> Self {
        Self { capture, classifier }
    }
}

impl Sampler for FrameSampler {
    fn sample(&mut self) -> Result<SolutionAttempt, EnvironmentError> {
        let frame = self.capture.frame()?;
        merge::solve_frame(self.classifier.as_ref(), &frame)
    }
}

/// Looks for the success icon granted by a solved puzzle.
pub trait SuccessProbe: Send {
    /// Screen position to confirm with a click, if the icon is showing.
    fn locate(&mut self) -> Result<Option<ScreenPoint>, EnvironmentError>;
}

/// Template match in the top band of the latest frame, translated to
/// screen coordinates.
pub struct IconProbe {
    capture: Arc<dyn Capture>,
    template: Option<Template>,
}

impl IconProbe {
    pub fn new(capture: Arc<dyn Capture>, template: Option<Template>) -> Self {
        if template.is_none() {
            warn!("No success template configured; puzzle verification will never match");
        }
        Self { capture, template }
    }
}

impl SuccessProbe for IconProbe {
    fn locate(&mut self) -> Result<Option<ScreenPoint>, EnvironmentError> {
        let Some(template) = &self.template else {
            return Ok(None);
        };
        let frame = self.capture.frame()?;
        let (left, top) = self.capture.window_origin();
        Ok(template.locate_in_top_band(&frame).map(|(x, y)| ScreenPoint {
            x: x as i32 + left,
            y: y as i32 + top,
        }))
    }
}

pub struct PuzzleResolver {
    sampler: Box<dyn Sampler>,
    probe: Box<dyn SuccessProbe>,
    notifier: Notifier,
    state: ResolverState,
}

impl PuzzleResolver {
    pub fn new(sampler: Box<dyn Sampler>, probe: Box<dyn SuccessProbe>, notifier: Notifier) -> Self {
        Self {
            sampler,
            probe,
            notifier,
            state: ResolverState::Idle,
        }
    }

    /// State after the last transition.
    pub fn state(&self) -> ResolverState {
        self.state
    }

    /// Run one full episode against the rune currently published in shared
    /// state. Environment failures degrade to "no candidate" and never abort
    /// the episode.
    pub fn resolve(&mut self, ctx: &mut ActionContext<'_>, interact_key: &str) -> Outcome {
        let episode = Uuid::new_v4();
        let rune = ctx.state.rune();
        info!("Rune episode {} started at ({:.3}, {:.3})", episode, rune.pos.x, rune.pos.y);

        self.enter(ResolverState::Navigating);
        self.navigate(ctx, rune.pos, interact_key);

        self.enter(ResolverState::Sampling);
        let mut consensus = Consensus::new();
        let mut confirmed = None;
        let mut samples = 0;
        while samples < SAMPLE_BUDGET {
            samples += 1;
            let attempt = match self.sampler.sample() {
                Ok(attempt) => attempt,
                Err(e) => {
                    debug!("Sample {}: {}", samples, e);
                    SolutionAttempt::empty()
                }
            };
            if attempt.is_empty() {
                debug!("Sample {}: no candidate", samples);
                continue;
            }
            info!("Sample {}: {}", samples, attempt);
            if consensus.observe(&attempt) {
                confirmed = Some(attempt);
                break;
            }
        }

        let Some(solution) = confirmed else {
            self.enter(ResolverState::Abandoned);
            warn!(
                "Rune episode {} exhausted {} samples without consensus ({} distinct readings)",
                episode,
                samples,
                consensus.readings().len()
            );
            return Outcome::Abandoned { episode, samples };
        };

        self.enter(ResolverState::Confirmed);
        info!("Rune episode {} confirmed {}", episode, solution);
        ctx.state.apply(StateDelta::RuneCleared);

        self.enter(ResolverState::Executing);
        for label in solution.labels() {
            let key = ctx.key(label.as_str()).to_string();
            if let Err(e) = ctx.input.press_key(&key, ARROW_HOLD) {
                warn!("Failed to enter '{}': {}", key, e);
            }
            ctx.pacer.sleep(TAP_GAP);
        }

        self.enter(ResolverState::Verifying);
        let clicks = self.verify(ctx);

        self.enter(ResolverState::Resolved);
        info!("Rune episode {} resolved with {} confirmation click(s)", episode, clicks);
        Outcome::Resolved {
            episode,
            solution,
            samples,
            clicks,
        }
    }

    fn navigate(&self, ctx: &mut ActionContext<'_>, target: Point, interact_key: &str) {
        let params = Params::from(target);
        for command in [MOVE, ADJUST] {
            let result = ctx.book.build(command, &params).and_then(|mut a| a.execute(ctx));
            if let Err(e) = result {
                warn!("Rune approach: {} failed: {}", command, e);
            }
        }
        ctx.pacer.sleep(SETTLE_BEFORE_INTERACT);
        let key = ctx.key(interact_key).to_string();
        if let Err(e) = ctx.input.press_key(&key, INTERACT_HOLD) {
            warn!("Rune approach: interact failed: {}", e);
        }
        ctx.pacer.sleep(OVERLAY_PAUSE);
    }

    /// Poll for the success icon; every hit is confirmed with a right click.
    /// All polls run even after a hit.
    fn verify(&mut self, ctx: &mut ActionContext<'_>) -> usize {
        ctx.pacer.sleep(VERIFY_DELAY);
        let mut clicks = 0;
        for poll in 1..=VERIFY_POLLS {
            ctx.pacer.sleep(VERIFY_INTERVAL);
            match self.probe.locate() {
                Ok(Some(at)) => match ctx.input.click(at, MouseButton::Right) {
                    Ok(()) => {
                        info!("Verify poll {}: success icon at ({}, {})", poll, at.x, at.y);
                        clicks += 1;
                    }
                    Err(e) => warn!("Verify poll {}: click failed: {}", poll, e),
                },
                Ok(None) => debug!("Verify poll {}: no success icon", poll),
                Err(e) => debug!("Verify poll {}: {}", poll, e),
            }
        }
        clicks
    }

    fn enter(&mut self, next: ResolverState) {
        debug!("Resolver {:?} -> {:?}", self.state, next);
        self.state = next;
        self.notifier.publish(UiEvent::ResolverState(next));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::Label::*;

    #[test]
    fn consensus_ignores_empty_and_needs_a_repeat() {
        let a = SolutionAttempt::from_labels(vec![Up, Down, Left, Right]);
        let b = SolutionAttempt::from_labels(vec![Right, Up, Left, Down]);
        let mut consensus = Consensus::new();

        assert!(!consensus.observe(&SolutionAttempt::empty()));
        assert!(!consensus.observe(&SolutionAttempt::empty()));
        assert!(!consensus.observe(&a));
        assert!(!consensus.observe(&b));
        assert!(consensus.observe(&a));
        assert_eq!(consensus.readings().len(), 2);
    }
}
