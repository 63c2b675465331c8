//! # Shared Token-Bucket Rate Limiter
//!
//! The authority caps each issuer at a fixed requests-per-second budget.
//! Every worker that touches the wire (single submits, batch polls,
//! contingency replay fan-out) draws from one shared bucket, so the pool
//! as a whole stays inside the budget no matter how many tasks run.
//!
//! The bucket is clock-injected: `try_acquire` takes the current instant,
//! which keeps refill arithmetic testable without waiting.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use sifen_core::Timestamp;

use crate::retry::Clock;

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Timestamp,
}

/// Token bucket shared across all transport workers.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// A bucket holding at most `capacity` tokens, refilled at
    /// `refill_per_sec`, starting full.
    pub fn new(capacity: u32, refill_per_sec: u32, now: Timestamp) -> Self {
        Self {
            capacity: f64::from(capacity.max(1)),
            refill_per_sec: f64::from(refill_per_sec.max(1)),
            state: Mutex::new(BucketState {
                tokens: f64::from(capacity.max(1)),
                last_refill: now,
            }),
        }
    }

    /// Take one token if available.
    pub fn try_acquire(&self, now: Timestamp) -> bool {
        let mut state = self.state.lock();
        let elapsed = now.since(state.last_refill).num_seconds().max(0) as f64;
        if elapsed > 0.0 {
            state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
            state.last_refill = now;
        }
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// How long until one token is available, assuming no contention.
    pub fn wait_hint(&self) -> Duration {
        let state = self.state.lock();
        if state.tokens >= 1.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64((1.0 - state.tokens) / self.refill_per_sec)
        }
    }

    /// Block (asynchronously) until a token is taken.
    pub async fn acquire(self: &Arc<Self>, clock: &dyn Clock) {
        loop {
            if self.try_acquire(clock.now()) {
                return;
            }
            let wait = self.wait_hint().max(Duration::from_millis(100));
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(epoch: i64) -> Timestamp {
        Timestamp::from_epoch_secs(epoch).unwrap()
    }

    const T: i64 = 1_700_000_000;

    #[test]
    fn bucket_starts_full() {
        let bucket = TokenBucket::new(3, 1, ts(T));
        assert!(bucket.try_acquire(ts(T)));
        assert!(bucket.try_acquire(ts(T)));
        assert!(bucket.try_acquire(ts(T)));
        assert!(!bucket.try_acquire(ts(T)));
    }

    #[test]
    fn bucket_refills_over_time() {
        let bucket = TokenBucket::new(2, 1, ts(T));
        assert!(bucket.try_acquire(ts(T)));
        assert!(bucket.try_acquire(ts(T)));
        assert!(!bucket.try_acquire(ts(T)));
        // One second refills one token at 1 rps.
        assert!(bucket.try_acquire(ts(T + 1)));
        assert!(!bucket.try_acquire(ts(T + 1)));
    }

    #[test]
    fn refill_is_capped_at_capacity() {
        let bucket = TokenBucket::new(2, 10, ts(T));
        // A long idle period must not bank more than the capacity.
        assert!(bucket.try_acquire(ts(T + 3600)));
        assert!(bucket.try_acquire(ts(T + 3600)));
        assert!(!bucket.try_acquire(ts(T + 3600)));
    }

    #[test]
    fn clock_going_backwards_does_not_mint_tokens() {
        let bucket = TokenBucket::new(1, 1, ts(T));
        assert!(bucket.try_acquire(ts(T)));
        assert!(!bucket.try_acquire(ts(T - 100)));
    }

    #[test]
    fn wait_hint_reflects_deficit() {
        let bucket = TokenBucket::new(1, 2, ts(T));
        assert_eq!(bucket.wait_hint(), Duration::ZERO);
        assert!(bucket.try_acquire(ts(T)));
        let hint = bucket.wait_hint();
        assert!(hint > Duration::ZERO && hint <= Duration::from_millis(500));
    }

    #[tokio::test]
    async fn acquire_eventually_succeeds() {
        use crate::retry::SystemClock;
        let bucket = Arc::new(TokenBucket::new(1, 1000, Timestamp::now()));
        bucket.acquire(&SystemClock).await;
        bucket.acquire(&SystemClock).await;
    }
}
