use rand::Rng;
use std::time::Duration;

/// Idle poll interval of the control loop while disabled or empty.
pub const IDLE_INTERVAL: Duration = Duration::from_millis(10);

/// Default hold for a single tap.
pub const TAP_HOLD: Duration = Duration::from_millis(50);

/// Gap between consecutive taps.
pub const TAP_GAP: Duration = Duration::from_millis(50);

/// Longest hold or wait a single action may ask for.
pub const MAX_DURATION: Duration = Duration::from_secs(600);

/// Fraction by which hold durations are jittered under stage fright.
const STAGE_FRIGHT_JITTER: f64 = 0.3;

/// Blocking pacing between input events. The control loop owns the thread,
/// so every wait is an explicit bounded sleep.
pub trait Pacer: Send + Sync {
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadPacer;

impl Pacer for ThreadPacer {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Randomize a hold duration when evasive behaviour is requested.
pub fn humanize(hold: Duration, stage_fright: bool) -> Duration {
    if !stage_fright || hold.is_zero() {
        return hold;
    }
    let factor = rand::thread_rng().gen_range(1.0 - STAGE_FRIGHT_JITTER..=1.0 + STAGE_FRIGHT_JITTER);
    Duration::try_from_secs_f64(hold.as_secs_f64() * factor).unwrap_or(hold)
}

/// Seconds as a hold or wait. `None` unless finite and within
/// `0..=MAX_DURATION`.
pub fn seconds(value: f64) -> Option<Duration> {
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(value).ok().filter(|d| *d <= MAX_DURATION)
}
