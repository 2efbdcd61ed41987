//! Randomized delay spreading.
//!
//! Every execution draws a jitter ratio in `[0, max_ratio)` that is stored on
//! the call record and applied to the next delay:
//!
//! ```text
//! jittered(d, j) = d + min(d, max_delay / max_ratio) * j
//! ```
//!
//! For small delays the added jitter is proportional to `d`; for large delays
//! it is capped at `max_delay`.

use rand::Rng;

/// Default upper bound (exclusive) for the jitter ratio.
pub const MAX_JITTER_RATIO: f64 = 0.2;

/// Default cap for the absolute jitter added to one delay (1 hour).
pub const MAX_JITTER_DELAY_MS: u64 = 60 * 60 * 1000;

/// Jitter bounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JitterPolicy {
    pub max_ratio: f64,
    pub max_delay_ms: u64,
}

impl Default for JitterPolicy {
    fn default() -> Self {
        Self {
            max_ratio: MAX_JITTER_RATIO,
            max_delay_ms: MAX_JITTER_DELAY_MS,
        }
    }
}

impl JitterPolicy {
    pub fn new(max_ratio: f64, max_delay_ms: u64) -> Self {
        Self { max_ratio, max_delay_ms }
    }

    /// Largest base delay that still receives proportional jitter.
    pub fn scaled_max_delay_ms(&self) -> u64 {
        if self.max_ratio <= 0.0 {
            return self.max_delay_ms;
        }
        (self.max_delay_ms as f64 / self.max_ratio).round() as u64
    }

    /// Add jitter for `ratio` to `delay_ms`.
    pub fn apply(&self, delay_ms: u64, ratio: f64) -> u64 {
        let jitter = (delay_ms.min(self.scaled_max_delay_ms()) as f64 * ratio.max(0.0)) as u64;
        delay_ms.saturating_add(jitter)
    }

    /// Draw a ratio in `[0, max_ratio)` from a unit-interval source.
    pub fn draw(&self, source: &dyn JitterSource) -> f64 {
        source.next_unit().clamp(0.0, 1.0) * self.max_ratio
    }
}

/// Source of uniformly distributed values in `[0, 1)`.
pub trait JitterSource: Send + Sync {
    fn next_unit(&self) -> f64;
}

/// Thread-local RNG backed source.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomJitter;

impl JitterSource for RandomJitter {
    fn next_unit(&self) -> f64 {
        rand::rng().random::<f64>()
    }
}

/// Always returns the same value. `FixedJitter(0.0)` disables jitter.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedJitter(pub f64);

impl JitterSource for FixedJitter {
    fn next_unit(&self) -> f64 {
        self.0
    }
}
