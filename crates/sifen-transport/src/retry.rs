//! # Backoff Policy and Clock Abstraction
//!
//! Retry timing as an explicit, testable policy object instead of a loop
//! with sleeps. The schedule is computed from the attempt number; the only
//! randomness is the jitter fraction, injected so tests can pin it.
//!
//! Connection failures are the only retryable class, and even those retry
//! only while the document's transmission window still permits an attempt;
//! the window gate itself lives with the caller, which consults
//! [`BackoffPolicy::delay()`] for timing and `sifen_rules::window` for
//! permission.

use std::time::Duration;

use rand::Rng;

use sifen_core::Timestamp;

/// Exponential backoff schedule with bounded jitter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub base: Duration,
    /// Multiplier applied per attempt.
    pub factor: u32,
    /// Total attempts, the initial one included.
    pub max_attempts: u32,
    /// Jitter amplitude as a fraction of the computed delay.
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    /// The transmission schedule: 1s base, doubling, 5 attempts, ±20%.
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            factor: 2,
            max_attempts: 5,
            jitter: 0.2,
        }
    }
}

impl BackoffPolicy {
    /// Polling schedule for batch status: 30s base, doubling, capped by the
    /// orchestrator at five minutes.
    pub fn batch_polling() -> Self {
        Self {
            base: Duration::from_secs(30),
            factor: 2,
            max_attempts: u32::MAX,
            jitter: 0.0,
        }
    }

    /// Raw exponential delay before retry number `attempt` (zero-based),
    /// without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        self.base
            .saturating_mul(self.factor.saturating_pow(attempt))
    }

    /// Delay with a pinned jitter fraction in `[-1.0, 1.0]`. Exposed so the
    /// schedule is testable without randomness.
    pub fn delay_with_jitter(&self, attempt: u32, jitter_unit: f64) -> Duration {
        let base = self.base_delay(attempt);
        let offset = base.as_secs_f64() * self.jitter * jitter_unit.clamp(-1.0, 1.0);
        Duration::from_secs_f64((base.as_secs_f64() + offset).max(0.0))
    }

    /// Delay with random jitter, for production use.
    pub fn delay(&self, attempt: u32) -> Duration {
        let unit = rand::thread_rng().gen_range(-1.0..=1.0);
        self.delay_with_jitter(attempt, unit)
    }

    /// Whether another attempt remains after `attempts_made`.
    pub fn attempts_remain(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }
}

/// Injectable time source. Production uses [`SystemClock`]; tests drive a
/// [`TestClock`] so window and deadline logic runs without real waiting.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// Manually advanced clock for tests.
#[derive(Debug)]
pub struct TestClock {
    now: parking_lot::Mutex<Timestamp>,
}

impl TestClock {
    pub fn starting_at(now: Timestamp) -> Self {
        Self {
            now: parking_lot::Mutex::new(now),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now = now.plus_secs(by.as_secs() as i64);
    }
}

impl Clock for TestClock {
    fn now(&self) -> Timestamp {
        *self.now.lock()
    }
}
