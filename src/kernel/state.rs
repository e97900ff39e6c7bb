use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};

/// A position on the abstract map, in minimap-relative units.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// The puzzle triple. Always read and written as one value.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RuneEvent {
    pub active: bool,
    pub pos: Point,
    /// Location of the sequence waypoint the puzzle is solved from.
    pub closest: Point,
}

/// Strict state delta. This is the ONLY way shared state mutates.
///
/// Ownership per variant:
/// - `SetEnabled` / `ToggleEnabled`: hotkey listener and UI
/// - `StageFright`: presence monitor
/// - `PlayerMoved`: localizer
/// - `PathPlanned` / `PathAdvanced`: movement execution (control loop)
/// - `RuneDetected`: rune detector
/// - `RuneReanchored`: control loop, when re-validating the closest waypoint
/// - `RuneCleared`: puzzle resolver
#[derive(Debug, Clone, PartialEq)]
pub enum StateDelta {
    SetEnabled(bool),
    ToggleEnabled,
    StageFright(bool),
    PlayerMoved(Point),
    PathPlanned(Vec<Point>),
    PathAdvanced,
    RuneDetected { pos: Point, closest: Point },
    /// Move `closest` only if the active rune is still the one at `pos`.
    RuneReanchored { pos: Point, closest: Point },
    RuneCleared,
}

/// Process-wide automation state shared by every actor.
///
/// Reads are lock-free for the scalar flags and take a short read lock for
/// tuple fields; readers tolerate staleness.
#[derive(Debug, Default)]
pub struct SharedState {
    enabled: AtomicBool,
    stage_fright: AtomicBool,
    player_pos: RwLock<Point>,
    path: Mutex<Vec<Point>>,
    rune: RwLock<RuneEvent>,
    // Monotonic version, bumped on every applied delta
    version: AtomicU64,
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&self, delta: StateDelta) {
        match delta {
            StateDelta::SetEnabled(on) => {
                self.enabled.store(on, Ordering::SeqCst);
            }
            StateDelta::ToggleEnabled => {
                self.enabled.fetch_xor(true, Ordering::SeqCst);
            }
            StateDelta::StageFright(on) => {
                self.stage_fright.store(on, Ordering::SeqCst);
            }
            StateDelta::PlayerMoved(pos) => {
                *self.player_pos.write().unwrap_or_else(PoisonError::into_inner) = pos;
            }
            StateDelta::PathPlanned(path) => {
                *self.path.lock().unwrap_or_else(PoisonError::into_inner) = path;
            }
            StateDelta::PathAdvanced => {
                let mut path = self.path.lock().unwrap_or_else(PoisonError::into_inner);
                if !path.is_empty() {
                    path.remove(0);
                }
            }
            StateDelta::RuneDetected { pos, closest } => {
                *self.rune.write().unwrap_or_else(PoisonError::into_inner) = RuneEvent {
                    active: true,
                    pos,
                    closest,
                };
            }
            StateDelta::RuneReanchored { pos, closest } => {
                let mut rune = self.rune.write().unwrap_or_else(PoisonError::into_inner);
                if rune.active && rune.pos == pos {
                    rune.closest = closest;
                }
            }
            StateDelta::RuneCleared => {
                self.rune.write().unwrap_or_else(PoisonError::into_inner).active = false;
            }
        }
        self.version.fetch_add(1, Ordering::SeqCst);
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn stage_fright(&self) -> bool {
        self.stage_fright.load(Ordering::SeqCst)
    }

    pub fn player_pos(&self) -> Point {
        *self.player_pos.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn path(&self) -> Vec<Point> {
        self.path.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn rune(&self) -> RuneEvent {
        *self.rune.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }
}
