//! Exponentially decaying error score.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Half-life used when none is configured.
pub const DEFAULT_HALF_LIFE: Duration = Duration::from_secs(10);

/// A value that decays toward zero over time and can be incremented.
///
/// Decay is applied lazily on every access:
/// `value = value * base^(rate * elapsed_secs)`. With the default base `e`
/// and `rate = ln(0.5) / half_life` the value halves every half-life.
#[derive(Debug)]
pub struct DecayingScore {
    base: f64,
    rate: f64,
    state: Mutex<ScoreState>,
}

#[derive(Debug)]
struct ScoreState {
    value: f64,
    updated_at: Instant,
}

impl DecayingScore {
    /// Creates a score with an explicit base and rate.
    pub fn new(base: f64, rate: f64) -> Self {
        Self {
            base,
            rate,
            state: Mutex::new(ScoreState {
                value: 0.0,
                updated_at: Instant::now(),
            }),
        }
    }

    /// Creates a score that halves every `half_life`.
    pub fn with_half_life(half_life: Duration) -> Self {
        let secs = half_life.as_secs_f64().max(f64::EPSILON);
        Self::new(std::f64::consts::E, 0.5f64.ln() / secs)
    }

    /// Returns the current decayed value.
    pub fn read(&self) -> f64 {
        self.read_at(Instant::now())
    }

    /// Decays the value, then adds `delta`.
    pub fn add(&self, delta: f64) {
        self.add_at(delta, Instant::now())
    }

    /// Returns the value as of `now`.
    pub fn read_at(&self, now: Instant) -> f64 {
        let mut state = self.state.lock();
        self.decay(&mut state, now);
        state.value
    }

    /// Adds `delta` as of `now`.
    pub fn add_at(&self, delta: f64, now: Instant) {
        let mut state = self.state.lock();
        self.decay(&mut state, now);
        state.value += delta;
    }

    fn decay(&self, state: &mut ScoreState, now: Instant) {
        // A clock reading older than the last update counts as no elapsed time.
        let elapsed = now.saturating_duration_since(state.updated_at).as_secs_f64();
        state.value *= self.base.powf(self.rate * elapsed);
        state.updated_at = state.updated_at.max(now);
    }
}

impl Default for DecayingScore {
    fn default() -> Self {
        Self::with_half_life(DEFAULT_HALF_LIFE)
    }
}
