//! # Contingency Ledger
//!
//! When the authority is unreachable, signed documents are not lost: they
//! are captured here and replayed once connectivity returns, under the
//! same plazo windows as any other transmission. An entry whose window
//! closes before a successful replay becomes a permanent-failure record
//! for the invoicing layer to surface.
//!
//! ## Invariant
//!
//! The ledger is one of exactly two pieces of state shared across all
//! transport workers (the other being the rate limiter). All access goes
//! through the interior locks; replay fan-out is governed by the shared
//! token bucket so a large backlog cannot blow the request budget.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;

use sifen_core::{Cdc, Timestamp};
use sifen_rules::{window, Outcome};

use crate::client::{SignedPayload, TransmissionApi};
use crate::limiter::TokenBucket;
use crate::retry::Clock;

/// A captured document awaiting replay.
#[derive(Debug, Clone)]
pub struct ContingencyEntry {
    pub payload: SignedPayload,
    pub captured_at: Timestamp,
    pub replay_attempts: u32,
}

/// A document whose window expired before any replay succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub cdc: Cdc,
    pub captured_at: Timestamp,
    pub expired_at: Timestamp,
    pub replay_attempts: u32,
}

enum ReplayResult {
    Settled(Cdc, Outcome),
    Requeue(ContingencyEntry),
    Expired(FailureRecord),
}

/// Concurrent-safe store of documents captured during unreachability.
#[derive(Debug, Default)]
pub struct ContingencyLedger {
    entries: Mutex<Vec<ContingencyEntry>>,
    failures: Mutex<Vec<FailureRecord>>,
}

impl ContingencyLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture a document after retry exhaustion or window pressure.
    pub fn capture(&self, payload: SignedPayload, now: Timestamp) {
        tracing::info!(cdc = payload.cdc.as_str(), "captured document for contingency replay");
        self.entries.lock().push(ContingencyEntry {
            payload,
            captured_at: now,
            replay_attempts: 0,
        });
    }

    /// Number of documents awaiting replay.
    pub fn pending(&self) -> usize {
        self.entries.lock().len()
    }

    /// Control codes awaiting replay.
    pub fn pending_cdcs(&self) -> Vec<Cdc> {
        self.entries
            .lock()
            .iter()
            .map(|e| e.payload.cdc.clone())
            .collect()
    }

    /// Permanent failures accumulated so far.
    pub fn failures(&self) -> Vec<FailureRecord> {
        self.failures.lock().clone()
    }

    /// Move every window-expired entry into the permanent-failure records
    /// and return the newly expired ones.
    pub fn expire(&self, now: Timestamp) -> Vec<FailureRecord> {
        let mut entries = self.entries.lock();
        let mut expired = Vec::new();
        entries.retain(|entry| {
            if window::remaining(entry.payload.signed_at, now).is_none() {
                expired.push(FailureRecord {
                    cdc: entry.payload.cdc.clone(),
                    captured_at: entry.captured_at,
                    expired_at: now,
                    replay_attempts: entry.replay_attempts,
                });
                false
            } else {
                true
            }
        });
        if !expired.is_empty() {
            tracing::warn!(count = expired.len(), "contingency entries expired past their window");
            self.failures.lock().extend(expired.iter().cloned());
        }
        expired
    }

    fn requeue(&self, mut entry: ContingencyEntry) {
        entry.replay_attempts += 1;
        self.entries.lock().push(entry);
    }

    /// Replay every pending entry, fanned out across tasks but throttled
    /// by the shared token bucket.
    ///
    /// Entries that settle (any authority verdict) are removed and their
    /// outcomes returned; entries that still cannot connect are re-queued
    /// with an incremented attempt count; entries whose window closed are
    /// moved to the permanent-failure records.
    pub async fn replay(
        self: &Arc<Self>,
        api: Arc<dyn TransmissionApi>,
        limiter: Arc<TokenBucket>,
        clock: Arc<dyn Clock>,
    ) -> Vec<(Cdc, Outcome)> {
        self.expire(clock.now());

        let batch: Vec<ContingencyEntry> = std::mem::take(&mut *self.entries.lock());
        let mut tasks = JoinSet::new();
        for entry in batch {
            let api = Arc::clone(&api);
            let limiter = Arc::clone(&limiter);
            let clock = Arc::clone(&clock);
            tasks.spawn(async move { replay_one(entry, api, limiter, clock).await });
        }

        let mut settled = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let Ok(result) = joined else { continue };
            match result {
                ReplayResult::Settled(cdc, outcome) => settled.push((cdc, outcome)),
                ReplayResult::Requeue(entry) => self.requeue(entry),
                ReplayResult::Expired(record) => self.failures.lock().push(record),
            }
        }
        settled
    }
}

async fn replay_one(
    entry: ContingencyEntry,
    api: Arc<dyn TransmissionApi>,
    limiter: Arc<TokenBucket>,
    clock: Arc<dyn Clock>,
) -> ReplayResult {
    limiter.acquire(clock.as_ref()).await;
    let now = clock.now();
    let payload = &entry.payload;
    if !window::classify(payload.emitted_at, payload.signed_at, now).permits_transmission() {
        return ReplayResult::Expired(FailureRecord {
            cdc: payload.cdc.clone(),
            captured_at: entry.captured_at,
            expired_at: now,
            replay_attempts: entry.replay_attempts,
        });
    }
    match api.submit_single(payload).await {
        Ok(response) => {
            let outcome =
                Outcome::from_response(response.code, response.transaction_id, response.message);
            tracing::info!(cdc = payload.cdc.as_str(), "contingency replay settled");
            ReplayResult::Settled(payload.cdc.clone(), outcome)
        }
        Err(e) if e.is_retryable() => {
            tracing::warn!(cdc = payload.cdc.as_str(), "contingency replay still failing: {e}");
            ReplayResult::Requeue(entry)
        }
        Err(e) => {
            tracing::warn!(cdc = payload.cdc.as_str(), "contingency replay rejected: {e}");
            ReplayResult::Settled(
                payload.cdc.clone(),
                Outcome::RejectedFatal {
                    code: 0,
                    message: e.to_string(),
                },
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{MockTransmissionApi, TransportError};
    use crate::retry::TestClock;
    use crate::soap::SubmitResponse;
    use crate::testutil::{payload, ts, T};

    fn harness(
        clock_start: Timestamp,
    ) -> (Arc<ContingencyLedger>, Arc<MockTransmissionApi>, Arc<TokenBucket>, Arc<TestClock>) {
        let clock = Arc::new(TestClock::starting_at(clock_start));
        (
            Arc::new(ContingencyLedger::new()),
            Arc::new(MockTransmissionApi::new()),
            Arc::new(TokenBucket::new(100, 100, clock_start)),
            clock,
        )
    }

    #[tokio::test]
    async fn settled_replay_empties_the_ledger() {
        let (ledger, mock, limiter, clock) = harness(ts(T));
        mock.push_submit(Ok(SubmitResponse {
            code: 260,
            message: String::new(),
            transaction_id: "tx-1".into(),
        }));
        ledger.capture(payload(1), ts(T));

        let outcomes = ledger
            .replay(mock.clone(), limiter, clock)
            .await;
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].1.is_approved());
        assert_eq!(ledger.pending(), 0);
        assert!(ledger.failures().is_empty());
    }

    #[tokio::test]
    async fn still_unreachable_entries_are_requeued() {
        let (ledger, mock, limiter, clock) = harness(ts(T));
        mock.push_submit(Err(TransportError::Connection {
            reason: "still down".into(),
        }));
        ledger.capture(payload(1), ts(T));

        let outcomes = ledger.replay(mock.clone(), limiter, clock).await;
        assert!(outcomes.is_empty());
        assert_eq!(ledger.pending(), 1);
        assert_eq!(ledger.pending_cdcs()[0], payload(1).cdc);
    }

    #[tokio::test]
    async fn expired_entries_become_permanent_failures() {
        let (ledger, mock, limiter, clock) = harness(ts(T));
        ledger.capture(payload(1), ts(T));
        clock.advance(std::time::Duration::from_secs(721 * 3600));

        let outcomes = ledger.replay(mock.clone(), limiter, clock).await;
        assert!(outcomes.is_empty());
        assert_eq!(ledger.pending(), 0);
        let failures = ledger.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].cdc, payload(1).cdc);
        // Expiry never touched the wire.
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn protocol_rejection_settles_as_fatal() {
        let (ledger, mock, limiter, clock) = harness(ts(T));
        mock.push_submit(Err(TransportError::Protocol {
            status: 400,
            body: "bad".into(),
        }));
        ledger.capture(payload(1), ts(T));

        let outcomes = ledger.replay(mock.clone(), limiter, clock).await;
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(outcomes[0].1, Outcome::RejectedFatal { .. }));
        assert_eq!(ledger.pending(), 0);
    }

    #[tokio::test]
    async fn replay_requeue_increments_attempt_count() {
        let (ledger, mock, limiter, clock) = harness(ts(T));
        mock.push_submit(Err(TransportError::Connection {
            reason: "down".into(),
        }));
        mock.push_submit(Err(TransportError::Connection {
            reason: "down".into(),
        }));
        ledger.capture(payload(1), ts(T));

        let _ = ledger.replay(mock.clone(), limiter.clone(), clock.clone()).await;
        let _ = ledger.replay(mock.clone(), limiter, clock).await;
        let entries = ledger.entries.lock();
        assert_eq!(entries[0].replay_attempts, 2);
    }
}
