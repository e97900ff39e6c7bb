//! Commands every book carries unless it overrides them.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::{Action, ActionContext, ActionFactory, STEP};
use crate::error::ActionError;
use crate::kernel::state::{Point, StateDelta};
use crate::kernel::time::{humanize, TAP_GAP, TAP_HOLD};
use crate::routine::Params;

/// Distance at which `move` considers the target reached.
pub const MOVE_TOLERANCE: f64 = 0.075;
/// Distance at which `adjust` stops nudging.
pub const ADJUST_TOLERANCE: f64 = 0.01;

const MAX_MOVE_STEPS: u32 = 20;
const MAX_ADJUST_TAPS: u32 = 25;

pub(crate) fn defaults() -> Vec<(&'static str, Arc<dyn ActionFactory>)> {
    vec![
        ("move", factory(|p| Ok(Box::new(Move { target: p.point("move")? })))),
        ("adjust", factory(|p| Ok(Box::new(Adjust { target: p.point("adjust")? })))),
        (
            "wait",
            factory(|p| {
                Ok(Box::new(Wait {
                    duration: p.seconds_or("wait", "duration", 0.5)?,
                }))
            }),
        ),
        (
            "walk",
            factory(|p| {
                let direction = p.get("direction").ok_or_else(|| ActionError::InvalidParam {
                    command: "walk".to_string(),
                    param: "direction".to_string(),
                    message: "missing".to_string(),
                })?;
                Ok(Box::new(Walk {
                    direction: direction.to_string(),
                    duration: p.seconds_or("walk", "duration", 0.5)?,
                }))
            }),
        ),
        (
            "fall",
            factory(|p| {
                Ok(Box::new(Fall {
                    duration: p.seconds_or("fall", "duration", 0.3)?,
                }))
            }),
        ),
    ]
}

fn factory<F>(f: F) -> Arc<dyn ActionFactory>
where
    F: Fn(&Params) -> Result<Box<dyn Action>, ActionError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Arrow key that brings `from` closer to `to`. Minimap y grows downwards.
pub fn direction_towards(from: Point, to: Point) -> &'static str {
    let dx = to.x - from.x;
    let dy = to.y - from.y;
    if dx.abs() >= dy.abs() {
        if dx > 0.0 {
            "right"
        } else {
            "left"
        }
    } else if dy > 0.0 {
        "down"
    } else {
        "up"
    }
}

/// Default movement: plan a direct path and drive the book's `step`
/// primitive until the target is within tolerance.
struct Move {
    target: Point,
}

impl Action for Move {
    fn execute(&mut self, ctx: &mut ActionContext<'_>) -> Result<(), ActionError> {
        if ctx.state.path().last() != Some(&self.target) {
            ctx.state.apply(StateDelta::PathPlanned(vec![self.target]));
        }

        for _ in 0..MAX_MOVE_STEPS {
            let pos = ctx.state.player_pos();
            if pos.distance(&self.target) <= MOVE_TOLERANCE {
                break;
            }
            let params = Params::from(self.target).with("direction", direction_towards(pos, self.target));
            ctx.book.build(STEP, &params)?.execute(ctx)?;
        }

        ctx.state.apply(StateDelta::PathAdvanced);
        Ok(())
    }
}

struct Adjust {
    target: Point,
}

impl Action for Adjust {
    fn execute(&mut self, ctx: &mut ActionContext<'_>) -> Result<(), ActionError> {
        for _ in 0..MAX_ADJUST_TAPS {
            let pos = ctx.state.player_pos();
            if pos.distance(&self.target) <= ADJUST_TOLERANCE {
                return Ok(());
            }
            let key = ctx.key(direction_towards(pos, self.target)).to_string();
            ctx.input.press_key(&key, humanize(TAP_HOLD, ctx.state.stage_fright()))?;
            ctx.pacer.sleep(TAP_GAP);
        }
        debug!("adjust gave up {:.3} away from target", ctx.state.player_pos().distance(&self.target));
        Ok(())
    }
}

struct Wait {
    duration: Duration,
}

impl Action for Wait {
    fn execute(&mut self, ctx: &mut ActionContext<'_>) -> Result<(), ActionError> {
        ctx.pacer.sleep(self.duration);
        Ok(())
    }
}

struct Walk {
    direction: String,
    duration: Duration,
}

impl Action for Walk {
    fn execute(&mut self, ctx: &mut ActionContext<'_>) -> Result<(), ActionError> {
        let key = ctx.key(&self.direction).to_string();
        ctx.input.press_key(&key, humanize(self.duration, ctx.state.stage_fright()))?;
        Ok(())
    }
}

/// Drop through a platform: down and jump held together.
struct Fall {
    duration: Duration,
}

impl Action for Fall {
    fn execute(&mut self, ctx: &mut ActionContext<'_>) -> Result<(), ActionError> {
        let chord = format!("{}+{}", ctx.key("down"), ctx.key("jump"));
        ctx.input.press_key(&chord, humanize(self.duration, ctx.state.stage_fright()))?;
        Ok(())
    }
}
