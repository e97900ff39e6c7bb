use std::collections::HashMap;
use std::sync::{Arc, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::event::{Notifier, UiEvent};
use super::state::{SharedState, StateDelta};
use super::time::{humanize, Pacer, IDLE_INTERVAL, TAP_HOLD};
use crate::command_book::{Action, ActionContext, ActiveBook, CommandBook, BUFF};
use crate::config::{SharedSettings, MAX_PETS};
use crate::error::ActionError;
use crate::input::InputInjector;
use crate::resolver::{Outcome, PuzzleResolver, SuccessProbe, Sampler};
use crate::routine::{Params, SharedRoutine, Step, WaypointOptions};

/// Feeding interval for a single pet.
pub const PET_FEED_BASE: Duration = Duration::from_secs(1200);

/// Fires every `PET_FEED_BASE / num_pets`.
#[derive(Debug, Clone, Copy)]
pub struct PetFeeder {
    last_fed: Instant,
}

impl PetFeeder {
    pub fn new(now: Instant) -> Self {
        Self { last_fed: now }
    }

    pub fn interval(num_pets: u32) -> Duration {
        PET_FEED_BASE / num_pets.clamp(1, MAX_PETS)
    }

    /// True, and the timer restarts, once the interval has strictly elapsed.
    pub fn due(&mut self, now: Instant, num_pets: u32) -> bool {
        if now.saturating_duration_since(self.last_fed) > Self::interval(num_pets) {
            self.last_fed = now;
            true
        } else {
            false
        }
    }
}

/// Per-waypoint visit counters implementing `frequency` and `skip`.
/// Counters belong to one sequence revision and restart with the next.
#[derive(Debug, Default)]
pub struct VisitCounters {
    revision: Option<u64>,
    counters: HashMap<usize, u32>,
}

impl VisitCounters {
    pub fn sync(&mut self, revision: u64) {
        if self.revision != Some(revision) {
            self.counters.clear();
            self.revision = Some(revision);
        }
    }

    /// Record a visit and report whether the waypoint runs on it.
    pub fn visit(&mut self, index: usize, options: &WaypointOptions) -> bool {
        let counter = self.counters.entry(index).or_insert(u32::from(options.skip));
        let run = *counter == 0;
        *counter = (*counter + 1) % options.frequency.max(1);
        run
    }
}

/// Why an iteration did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleReason {
    Disabled,
    EmptyRoutine,
    NoCommandBook,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Idle(IdleReason),
    Ran {
        index: usize,
        /// False when `frequency`/`skip` gated the waypoint off.
        executed: bool,
        rune: Option<Outcome>,
    },
}

/// Collaborators the loop drives but does not own the policy of.
pub struct Environment {
    pub input: Arc<dyn InputInjector>,
    pub pacer: Arc<dyn Pacer>,
    pub sampler: Box<dyn Sampler>,
    pub probe: Box<dyn SuccessProbe>,
    pub notifier: Notifier,
}

/// The single logical driver: maintenance, rune interrupt, step execution,
/// cursor advance. Only this loop moves the cursor or runs steps.
pub struct ControlLoop {
    state: Arc<SharedState>,
    routine: SharedRoutine,
    book: ActiveBook,
    settings: SharedSettings,
    input: Arc<dyn InputInjector>,
    pacer: Arc<dyn Pacer>,
    notifier: Notifier,
    resolver: PuzzleResolver,
    feeder: PetFeeder,
    visits: VisitCounters,
    // Buff instance bound to the book it was built from
    buff: Option<(Arc<CommandBook>, Box<dyn Action>)>,
    failure_streak: u32,
}

impl ControlLoop {
    pub fn new(
        state: Arc<SharedState>,
        routine: SharedRoutine,
        book: ActiveBook,
        settings: SharedSettings,
        env: Environment,
    ) -> Self {
        Self {
            state,
            routine,
            book,
            settings,
            input: env.input,
            pacer: env.pacer,
            resolver: PuzzleResolver::new(env.sampler, env.probe, env.notifier.clone()),
            notifier: env.notifier,
            feeder: PetFeeder::new(Instant::now()),
            visits: VisitCounters::default(),
            buff: None,
            failure_streak: 0,
        }
    }

    pub fn resolver(&self) -> &PuzzleResolver {
        &self.resolver
    }

    /// One iteration. Never blocks on the UI; blocks on the resolver for a
    /// whole episode when the rune interrupt fires.
    pub fn tick(&mut self) -> TickOutcome {
        if !self.state.enabled() {
            return TickOutcome::Idle(IdleReason::Disabled);
        }
        let Some(book) = self.book.read().unwrap_or_else(PoisonError::into_inner).clone() else {
            return TickOutcome::Idle(IdleReason::NoCommandBook);
        };
        let (index, step, revision) = {
            let routine = self.routine.read().unwrap_or_else(PoisonError::into_inner);
            match routine.current() {
                Some(step) => (routine.cursor(), step.clone(), routine.revision()),
                None => return TickOutcome::Idle(IdleReason::EmptyRoutine),
            }
        };
        self.visits.sync(revision);

        let (state, input, pacer) = (Arc::clone(&self.state), Arc::clone(&self.input), Arc::clone(&self.pacer));
        let mut ctx = ActionContext {
            state: &state,
            input: input.as_ref(),
            pacer: pacer.as_ref(),
            book: &book,
        };

        self.maintain_buff(&book, &mut ctx);
        self.feed_pets(&mut ctx);
        self.notifier.publish(UiEvent::CursorChanged(index));

        let rune = if self.rune_due_at(&step) {
            let interact = self.settings.read().unwrap_or_else(PoisonError::into_inner).bindings.interact.clone();
            Some(self.resolver.resolve(&mut ctx, &interact))
        } else {
            None
        };

        let executed = match &step {
            Step::Waypoint(w) => self.visits.visit(index, &w.options),
            Step::Directive(_) => true,
        };
        if executed {
            let result = step.execute(&mut ctx);
            self.record("step", result);
        }

        let mut routine = self.routine.write().unwrap_or_else(PoisonError::into_inner);
        // An edit landed mid-step: the cursor was already fixed up by the edit
        if routine.revision() == revision {
            routine.step();
        }

        TickOutcome::Ran { index, executed, rune }
    }

    /// Drive `tick` forever.
    pub fn run(mut self) -> ! {
        info!("Control loop started");
        loop {
            if let TickOutcome::Idle(_) = self.tick() {
                self.pacer.sleep(IDLE_INTERVAL);
            }
        }
    }

    fn maintain_buff(&mut self, book: &Arc<CommandBook>, ctx: &mut ActionContext<'_>) {
        let stale = !matches!(&self.buff, Some((owner, _)) if Arc::ptr_eq(owner, book));
        if stale {
            match book.build(BUFF, &Params::new()) {
                Ok(action) => self.buff = Some((Arc::clone(book), action)),
                Err(e) => {
                    self.buff = None;
                    self.record("buff", Err(e));
                    return;
                }
            }
        }
        if let Some((_, buff)) = self.buff.as_mut() {
            let result = buff.execute(ctx);
            self.record("buff", result);
        }
    }

    fn feed_pets(&mut self, ctx: &mut ActionContext<'_>) {
        let (auto_feed, num_pets, key) = {
            let settings = self.settings.read().unwrap_or_else(PoisonError::into_inner);
            (settings.pets.auto_feed, settings.pets.num_pets, settings.bindings.feed_pet.clone())
        };
        if !auto_feed || !self.feeder.due(Instant::now(), num_pets) {
            return;
        }
        debug!("Feeding {} pet(s)", num_pets);
        let result = ctx
            .input
            .press_key(&key, humanize(TAP_HOLD, ctx.state.stage_fright()))
            .map_err(ActionError::from);
        self.record("feed pet", result);
    }

    /// Whether the rune interrupt fires before `step`. Re-anchors the rune
    /// to the nearest waypoint when its recorded one left the sequence.
    fn rune_due_at(&self, step: &Step) -> bool {
        let rune = self.state.rune();
        if !rune.active {
            return false;
        }
        {
            let routine = self.routine.read().unwrap_or_else(PoisonError::into_inner);
            if routine.contains_waypoint(rune.closest) {
                return step.location() == Some(rune.closest);
            }
            let Some(nearest) = routine.closest_waypoint(rune.pos) else {
                return false;
            };
            info!(
                "Rune anchor ({:.3}, {:.3}) left the routine; now ({:.3}, {:.3})",
                rune.closest.x, rune.closest.y, nearest.x, nearest.y
            );
            // No-op if the detector replaced the rune since it was read
            self.state.apply(StateDelta::RuneReanchored {
                pos: rune.pos,
                closest: nearest,
            });
        }
        let current = self.state.rune();
        current.active && step.location() == Some(current.closest)
    }

    fn record(&mut self, what: &str, result: Result<(), ActionError>) {
        match result {
            Ok(()) => {
                if self.failure_streak > 0 && what == "step" {
                    info!("Environment recovered after {} failed iteration(s)", self.failure_streak);
                    self.failure_streak = 0;
                }
            }
            Err(ActionError::Environment(e)) => {
                if self.failure_streak == 0 {
                    warn!("{}: environment unavailable: {}", what, e);
                } else {
                    debug!("{}: environment still unavailable: {}", what, e);
                }
                self.failure_streak += 1;
            }
            Err(e) => warn!("{} skipped: {}", what, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feeding_interval_divides_by_pet_count() {
        assert_eq!(PetFeeder::interval(1), Duration::from_secs(1200));
        assert_eq!(PetFeeder::interval(3), Duration::from_secs(400));
        assert_eq!(PetFeeder::interval(0), Duration::from_secs(1200));
    }

    #[test]
    fn feeder_fires_after_interval_and_restarts() {
        let start = Instant::now();
        let mut feeder = PetFeeder::new(start);
        assert!(!feeder.due(start + Duration::from_secs(600), 2));
        assert!(feeder.due(start + Duration::from_secs(601), 2));
        assert!(!feeder.due(start + Duration::from_secs(900), 2));
        assert!(feeder.due(start + Duration::from_secs(1202), 2));
    }

    #[test]
    fn frequency_and_skip_gate_visits() {
        let mut visits = VisitCounters::default();
        visits.sync(1);
        let every_third = WaypointOptions {
            frequency: 3,
            ..WaypointOptions::default()
        };
        let runs: Vec<bool> = (0..6).map(|_| visits.visit(0, &every_third)).collect();
        assert_eq!(runs, vec![true, false, false, true, false, false]);

        let skip_first = WaypointOptions {
            skip: true,
            ..WaypointOptions::default()
        };
        let runs: Vec<bool> = (0..3).map(|_| visits.visit(1, &skip_first)).collect();
        assert_eq!(runs, vec![false, true, true]);
    }

    #[test]
    fn new_revision_restarts_counters() {
        let mut visits = VisitCounters::default();
        let skip_first = WaypointOptions {
            skip: true,
            ..WaypointOptions::default()
        };
        visits.sync(1);
        assert!(!visits.visit(0, &skip_first));
        assert!(visits.visit(0, &skip_first));
        visits.sync(2);
        assert!(!visits.visit(0, &skip_first));
    }
}
