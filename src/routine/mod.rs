//! The cyclic action sequence ("routine") the control loop walks.

pub mod format;

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::command_book::ActionContext;
use crate::error::{ActionError, EditError, FormatError, PersistError};
use crate::kernel::state::Point;
use crate::kernel::time::{seconds, MAX_DURATION};

/// String parameters of a directive, kept sorted so saved routines are stable.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Params(BTreeMap<String, String>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: impl ToString) {
        self.0.insert(key.to_lowercase(), value.to_string());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Finite number under `key`, or `default` when absent.
    pub fn f64_or(&self, command: &str, key: &str, default: f64) -> Result<f64, ActionError> {
        let invalid = |message: String| ActionError::InvalidParam {
            command: command.to_string(),
            param: key.to_string(),
            message,
        };
        match self.get(key) {
            None => Ok(default),
            Some(raw) => {
                let value = raw.trim().parse::<f64>().map_err(|e| invalid(e.to_string()))?;
                if !value.is_finite() {
                    return Err(invalid(format!("'{}' is not a finite number", raw)));
                }
                Ok(value)
            }
        }
    }

    pub fn require_f64(&self, command: &str, key: &str) -> Result<f64, ActionError> {
        if self.get(key).is_none() {
            return Err(ActionError::InvalidParam {
                command: command.to_string(),
                param: key.to_string(),
                message: "missing".to_string(),
            });
        }
        self.f64_or(command, key, 0.0)
    }

    pub fn u32_or(&self, command: &str, key: &str, default: u32) -> Result<u32, ActionError> {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw.trim().parse::<u32>().map_err(|e| ActionError::InvalidParam {
                command: command.to_string(),
                param: key.to_string(),
                message: e.to_string(),
            }),
        }
    }

    pub fn seconds_or(&self, command: &str, key: &str, default: f64) -> Result<Duration, ActionError> {
        let value = self.f64_or(command, key, default)?;
        seconds(value).ok_or_else(|| ActionError::InvalidParam {
            command: command.to_string(),
            param: key.to_string(),
            message: format!("{} is outside 0..={} seconds", value, MAX_DURATION.as_secs()),
        })
    }

    pub fn point(&self, command: &str) -> Result<Point, ActionError> {
        Ok(Point::new(
            self.require_f64(command, "x")?,
            self.require_f64(command, "y")?,
        ))
    }
}

impl From<Point> for Params {
    fn from(p: Point) -> Self {
        Params::new().with("x", p.x).with("y", p.y)
    }
}

/// A parametrized instantaneous action, resolved against the active
/// command book when it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub kind: String,
    pub params: Params,
}

impl Directive {
    pub fn new(kind: &str, params: Params) -> Self {
        Self {
            kind: kind.trim().to_lowercase(),
            params,
        }
    }

    /// Reject kinds and keys a saved routine could not read back.
    pub fn check(&self) -> Result<(), EditError> {
        let invalid = |message: String| EditError::InvalidDirective {
            kind: self.kind.clone(),
            message,
        };
        let kind = self.kind.as_str();
        if kind.is_empty() || kind.trim() != kind {
            return Err(invalid("kind must be non-empty without edge whitespace".to_string()));
        }
        if kind == "*" || kind.starts_with('#') {
            return Err(invalid("kind must not be '*' or start with '#'".to_string()));
        }
        if kind.contains([',', '"', '\n', '\r']) {
            return Err(invalid("kind must not contain a comma, a quote or a line break".to_string()));
        }
        for (key, _) in self.params.iter() {
            if key.is_empty() || key.trim() != key || key.contains([',', '=', '"', '\n', '\r']) {
                return Err(invalid(format!("unusable parameter name '{}'", key)));
            }
        }
        Ok(())
    }

    pub fn execute(&self, ctx: &mut ActionContext<'_>) -> Result<(), ActionError> {
        let mut action = ctx.book.build(&self.kind, &self.params)?;
        action.execute(ctx)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaypointOptions {
    /// Run on every `frequency`-th visit.
    pub frequency: u32,
    /// Skip the first visit.
    pub skip: bool,
    /// Fine-position with `adjust` after moving.
    pub adjust: bool,
}

impl Default for WaypointOptions {
    fn default() -> Self {
        Self {
            frequency: 1,
            skip: false,
            adjust: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Waypoint {
    pub location: Point,
    pub options: WaypointOptions,
    pub directives: Vec<Directive>,
}

impl Waypoint {
    pub fn new(location: Point) -> Self {
        Self {
            location,
            options: WaypointOptions::default(),
            directives: Vec::new(),
        }
    }

    pub fn with_options(mut self, options: WaypointOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_directive(mut self, directive: Directive) -> Self {
        self.directives.push(directive);
        self
    }

    /// Move to the location, optionally adjust, then fire the nested directives.
    pub fn execute(&self, ctx: &mut ActionContext<'_>) -> Result<(), ActionError> {
        let target = Params::from(self.location);
        ctx.book.build("move", &target)?.execute(ctx)?;
        if self.options.adjust {
            ctx.book.build("adjust", &target)?.execute(ctx)?;
        }
        for directive in &self.directives {
            directive.execute(ctx)?;
        }
        Ok(())
    }
}

/// One element of the sequence, and one row of the persisted format.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Waypoint(Waypoint),
    Directive(Directive),
}

impl Step {
    pub fn execute(&self, ctx: &mut ActionContext<'_>) -> Result<(), ActionError> {
        match self {
            Step::Waypoint(w) => w.execute(ctx),
            Step::Directive(d) => d.execute(ctx),
        }
    }

    pub fn as_waypoint(&self) -> Option<&Waypoint> {
        match self {
            Step::Waypoint(w) => Some(w),
            Step::Directive(_) => None,
        }
    }

    pub fn location(&self) -> Option<Point> {
        self.as_waypoint().map(|w| w.location)
    }
}

/// Sequence shared by the control loop (cursor) and the editor (structure).
pub type SharedRoutine = Arc<RwLock<ActionSequence>>;

/// Ordered, cyclic list of waypoints with an execution cursor.
///
/// Invariants:
/// - `cursor < len()` whenever the sequence is non-empty, 0 otherwise
/// - top-level steps are always waypoints; directives live inside them
/// - structural edits set `dirty` and bump `revision`
#[derive(Debug, Clone, Default)]
pub struct ActionSequence {
    steps: Vec<Step>,
    cursor: usize,
    dirty: bool,
    revision: u64,
}

impl ActionSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a clean sequence from already-folded steps.
    pub fn from_steps(steps: Vec<Step>) -> Result<Self, EditError> {
        let mut seq = Self::new();
        seq.replace_steps(steps)?;
        Ok(seq)
    }

    /// Parse a routine file without touching any live sequence.
    pub fn read(path: &Path) -> Result<Vec<Step>, FormatError> {
        let text = fs::read_to_string(path).map_err(|source| FormatError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        format::parse(&text)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn get(&self, index: usize) -> Option<&Step> {
        self.steps.get(index)
    }

    pub fn current(&self) -> Option<&Step> {
        self.steps.get(self.cursor)
    }

    /// Advance the cursor, wrapping at the end. No-op when empty.
    pub fn step(&mut self) {
        if self.steps.is_empty() {
            return;
        }
        self.cursor = (self.cursor + 1) % self.steps.len();
    }

    pub fn push(&mut self, step: Step) -> Result<(), EditError> {
        self.insert(self.steps.len(), step)
    }

    pub fn insert(&mut self, index: usize, step: Step) -> Result<(), EditError> {
        check_step(&step)?;
        if index > self.steps.len() {
            return Err(EditError::OutOfRange {
                index,
                len: self.steps.len(),
            });
        }
        let was_empty = self.steps.is_empty();
        self.steps.insert(index, step);
        if !was_empty && index <= self.cursor {
            self.cursor += 1;
        }
        self.touch();
        Ok(())
    }

    pub fn remove(&mut self, index: usize) -> Result<Step, EditError> {
        self.check_index(index)?;
        let removed = self.steps.remove(index);
        if self.steps.is_empty() {
            self.cursor = 0;
        } else if index < self.cursor {
            self.cursor -= 1;
        } else if self.cursor >= self.steps.len() {
            self.cursor = 0;
        }
        self.touch();
        Ok(removed)
    }

    /// Move the step at `from` to `to`. The cursor keeps pointing at the
    /// same step.
    pub fn reorder(&mut self, from: usize, to: usize) -> Result<(), EditError> {
        self.check_index(from)?;
        self.check_index(to)?;
        if from == to {
            return Ok(());
        }
        let step = self.steps.remove(from);
        self.steps.insert(to, step);
        self.cursor = if self.cursor == from {
            to
        } else if from < self.cursor && self.cursor <= to {
            self.cursor - 1
        } else if to <= self.cursor && self.cursor < from {
            self.cursor + 1
        } else {
            self.cursor
        };
        self.touch();
        Ok(())
    }

    /// Replace the step at `index` in place (parameter edits).
    pub fn replace(&mut self, index: usize, step: Step) -> Result<(), EditError> {
        self.check_index(index)?;
        check_step(&step)?;
        self.steps[index] = step;
        self.touch();
        Ok(())
    }

    /// Attach a directive to the waypoint at `waypoint`, at `position` in
    /// its directive list.
    pub fn attach(&mut self, waypoint: usize, position: usize, directive: Directive) -> Result<(), EditError> {
        directive.check()?;
        let w = self.waypoint_mut(waypoint)?;
        if position > w.directives.len() {
            return Err(EditError::OutOfRange {
                index: position,
                len: w.directives.len(),
            });
        }
        w.directives.insert(position, directive);
        self.touch();
        Ok(())
    }

    pub fn detach(&mut self, waypoint: usize, position: usize) -> Result<Directive, EditError> {
        let w = self.waypoint_mut(waypoint)?;
        if position >= w.directives.len() {
            return Err(EditError::OutOfRange {
                index: position,
                len: w.directives.len(),
            });
        }
        let removed = w.directives.remove(position);
        self.touch();
        Ok(removed)
    }

    pub fn clear(&mut self) {
        self.steps.clear();
        self.reset();
    }

    /// Replace the whole sequence; cursor back to 0, clean.
    pub fn replace_steps(&mut self, steps: Vec<Step>) -> Result<(), EditError> {
        steps.iter().try_for_each(check_step)?;
        self.steps = steps;
        self.reset();
        Ok(())
    }

    /// Load a routine file. On error the sequence is left untouched.
    pub fn load(&mut self, path: &Path) -> Result<(), FormatError> {
        let steps = Self::read(path)?;
        // `format::parse` only yields top-level waypoints
        self.steps = steps;
        self.reset();
        Ok(())
    }

    /// Write the routine. `dirty` is cleared only on success.
    pub fn save(&mut self, path: &Path) -> Result<(), PersistError> {
        fs::write(path, format::render(&self.steps)).map_err(|source| PersistError {
            path: path.to_path_buf(),
            source,
        })?;
        self.dirty = false;
        Ok(())
    }

    pub fn contains_waypoint(&self, location: Point) -> bool {
        self.steps.iter().any(|s| s.location() == Some(location))
    }

    /// Location of the waypoint nearest to `target`, if any.
    pub fn closest_waypoint(&self, target: Point) -> Option<Point> {
        self.steps
            .iter()
            .filter_map(Step::location)
            .min_by(|a, b| a.distance(&target).total_cmp(&b.distance(&target)))
    }

    /// Every directive kind referenced by the sequence, with its index.
    pub fn directive_kinds(&self) -> impl Iterator<Item = (usize, &str)> + '_ {
        self.steps.iter().enumerate().flat_map(|(i, s)| {
            s.as_waypoint()
                .into_iter()
                .flat_map(|w| w.directives.iter())
                .map(move |d| (i, d.kind.as_str()))
        })
    }

    fn check_index(&self, index: usize) -> Result<(), EditError> {
        if index >= self.steps.len() {
            return Err(EditError::OutOfRange {
                index,
                len: self.steps.len(),
            });
        }
        Ok(())
    }

    fn waypoint_mut(&mut self, index: usize) -> Result<&mut Waypoint, EditError> {
        self.check_index(index)?;
        match &mut self.steps[index] {
            Step::Waypoint(w) => Ok(w),
            Step::Directive(_) => Err(EditError::NotAWaypoint(index)),
        }
    }

    fn touch(&mut self) {
        self.dirty = true;
        self.revision += 1;
    }

    fn reset(&mut self) {
        self.cursor = 0;
        self.dirty = false;
        self.revision += 1;
    }
}

/// Top-level steps are waypoints whose directives survive a save.
fn check_step(step: &Step) -> Result<(), EditError> {
    match step {
        Step::Directive(_) => Err(EditError::OrphanDirective),
        Step::Waypoint(w) => w.directives.iter().try_for_each(Directive::check),
    }
}
