//! # Batch Orchestrator
//!
//! Drives asynchronous batch submission: accept, poll with backoff, and
//! resolve per-document outcomes. Partial failure is the expected case — a
//! batch of fifty with three rejections is a transport-level success — so
//! outcomes live in a map keyed by control code, never by position; the
//! authority may return results in any order.
//!
//! ## Polling policy
//!
//! Poll delays start at 30 seconds and double up to a five-minute cap.
//! After two hours without completion the job is marked timed out, and
//! each unresolved document is individually re-queried while its own
//! window still permits.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use sifen_core::Timestamp;
use sifen_rules::{window, Outcome};

use crate::client::{SignedPayload, TransmissionApi, TransportError};
use crate::config::BATCH_MAX_DOCUMENTS;
use crate::limiter::TokenBucket;
use crate::retry::{BackoffPolicy, Clock};
use crate::soap::BatchPhase;

/// Cap on the poll delay.
pub const POLL_CAP: Duration = Duration::from_secs(300);

/// Overall polling deadline after which a batch times out.
pub const POLL_DEADLINE_HOURS: i64 = 2;

/// Lifecycle of one submitted batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchJobState {
    Queued,
    Processing,
    Done,
    TimedOut,
}

impl BatchJobState {
    /// Whether polling should continue.
    pub fn is_settled(self) -> bool {
        matches!(self, BatchJobState::Done | BatchJobState::TimedOut)
    }
}

/// One batch submission and everything learned about it so far.
///
/// `poll` consumes and returns jobs by value; a settled job passes through
/// unchanged, so polling is idempotent and safe to repeat.
#[derive(Debug, Clone)]
pub struct BatchJob {
    pub id: Uuid,
    /// The authority's lot number.
    pub batch_id: String,
    pub state: BatchJobState,
    pub submitted_at: Timestamp,
    /// Completed polls, which also indexes the backoff schedule.
    pub polls: u32,
    /// Per-document outcomes keyed by control code.
    pub outcomes: BTreeMap<String, Outcome>,
    documents: Vec<SignedPayload>,
}

impl BatchJob {
    /// Documents with no recorded outcome yet.
    pub fn unresolved(&self) -> Vec<&SignedPayload> {
        self.documents
            .iter()
            .filter(|d| !self.outcomes.contains_key(d.cdc.as_str()))
            .collect()
    }
}

/// Submits batches and resolves their per-document outcomes. Fallback
/// queries after a deadline draw from the same token bucket as every other
/// wire operation.
pub struct BatchOrchestrator {
    api: Arc<dyn TransmissionApi>,
    limiter: Arc<TokenBucket>,
    clock: Arc<dyn Clock>,
    policy: BackoffPolicy,
}

impl BatchOrchestrator {
    pub fn new(
        api: Arc<dyn TransmissionApi>,
        limiter: Arc<TokenBucket>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            api,
            limiter,
            clock,
            policy: BackoffPolicy::batch_polling(),
        }
    }

    /// Submit up to fifty signed documents as one batch.
    pub async fn submit(
        &self,
        documents: Vec<SignedPayload>,
        now: Timestamp,
    ) -> Result<BatchJob, TransportError> {
        if documents.len() > BATCH_MAX_DOCUMENTS {
            return Err(TransportError::BatchTooLarge {
                count: documents.len(),
            });
        }
        let accepted = self.api.submit_batch(&documents).await?;
        tracing::info!(
            batch_id = accepted.batch_id,
            documents = documents.len(),
            "batch accepted"
        );
        Ok(BatchJob {
            id: Uuid::new_v4(),
            batch_id: accepted.batch_id,
            state: BatchJobState::Queued,
            submitted_at: now,
            polls: 0,
            outcomes: BTreeMap::new(),
            documents,
        })
    }

    /// Delay before poll number `polls` (zero-based): 30s doubling, capped
    /// at five minutes.
    pub fn next_poll_delay(&self, polls: u32) -> Duration {
        self.policy.base_delay(polls).min(POLL_CAP)
    }

    /// Poll the batch once. Settled jobs pass through unchanged.
    pub async fn poll(&self, job: BatchJob, now: Timestamp) -> Result<BatchJob, TransportError> {
        if job.state.is_settled() {
            return Ok(job);
        }
        if now.since(job.submitted_at) > ChronoDuration::hours(POLL_DEADLINE_HOURS) {
            return Ok(self.time_out(job, now).await);
        }

        let status = self.api.query_batch(&job.batch_id).await?;
        let mut job = job;
        job.polls += 1;
        job.state = match status.phase {
            BatchPhase::Queued => BatchJobState::Queued,
            BatchPhase::Processing => BatchJobState::Processing,
            BatchPhase::Done => BatchJobState::Done,
        };
        if job.state == BatchJobState::Done {
            for item in status.items {
                job.outcomes.insert(
                    item.cdc.clone(),
                    Outcome::from_response(item.code, item.transaction_id, item.message),
                );
            }
            tracing::info!(
                batch_id = job.batch_id,
                resolved = job.outcomes.len(),
                "batch done"
            );
        }
        Ok(job)
    }

    /// Mark the job timed out and fall back to individual queries for every
    /// unresolved document whose window still permits.
    async fn time_out(&self, mut job: BatchJob, now: Timestamp) -> BatchJob {
        tracing::warn!(batch_id = job.batch_id, "batch polling deadline exceeded");
        job.state = BatchJobState::TimedOut;

        let pending: Vec<SignedPayload> = job.unresolved().into_iter().cloned().collect();
        for doc in pending {
            if !window::classify(doc.emitted_at, doc.signed_at, now).permits_transmission() {
                continue;
            }
            self.limiter.acquire(self.clock.as_ref()).await;
            match self.api.query_document(&doc.cdc).await {
                Ok(status) if status.found => {
                    job.outcomes.insert(
                        doc.cdc.as_str().to_string(),
                        Outcome::from_response(status.code, status.transaction_id, status.message),
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(cdc = doc.cdc.as_str(), "fallback query failed: {e}");
                }
            }
        }
        job
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockTransmissionApi;
    use crate::retry::TestClock;
    use crate::soap::{BatchAcceptResponse, BatchItem, BatchStatusResponse, DocumentQueryResponse};
    use crate::testutil::{payload, ts, T};

    fn orchestrator(mock: Arc<MockTransmissionApi>) -> BatchOrchestrator {
        BatchOrchestrator::new(
            mock,
            Arc::new(TokenBucket::new(1000, 1000, ts(T))),
            Arc::new(TestClock::starting_at(ts(T))),
        )
    }

    fn accepted(mock: &MockTransmissionApi) {
        mock.push_batch_accept(Ok(BatchAcceptResponse {
            batch_id: "lot-1".into(),
        }));
    }

    fn item(doc: u64, code: u16) -> BatchItem {
        BatchItem {
            cdc: payload(doc).cdc.as_str().to_string(),
            code,
            message: String::new(),
            transaction_id: if code == 260 { format!("tx-{doc}") } else { String::new() },
        }
    }

    #[tokio::test]
    async fn batch_of_fifty_one_is_rejected_locally() {
        let mock = Arc::new(MockTransmissionApi::new());
        let orchestrator = orchestrator(mock.clone());
        let docs: Vec<_> = (0..51).map(payload).collect();
        let err = orchestrator.submit(docs, ts(T)).await.unwrap_err();
        assert!(matches!(err, TransportError::BatchTooLarge { count: 51 }));
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn partial_failure_keys_outcomes_by_control_code() {
        let mock = Arc::new(MockTransmissionApi::new());
        accepted(&mock);
        // Results arrive in an order unrelated to submission order.
        let mut items: Vec<BatchItem> = Vec::new();
        for doc in [7, 3, 9, 1, 5, 8] {
            items.push(item(doc, 260));
        }
        for doc in [2, 4, 6, 10] {
            items.push(item(doc, 310));
        }
        mock.push_batch_status(Ok(BatchStatusResponse {
            phase: BatchPhase::Done,
            items,
        }));

        let orchestrator = orchestrator(mock.clone());
        let docs: Vec<_> = (1..=10).map(payload).collect();
        let job = orchestrator.submit(docs, ts(T)).await.unwrap();
        let job = orchestrator.poll(job, ts(T + 60)).await.unwrap();

        assert_eq!(job.state, BatchJobState::Done);
        assert_eq!(job.outcomes.len(), 10);
        let approved = job.outcomes.values().filter(|o| o.is_approved()).count();
        assert_eq!(approved, 6);
        for doc in [2u64, 4, 6, 10] {
            let outcome = &job.outcomes[payload(doc).cdc.as_str()];
            assert!(matches!(outcome, Outcome::RejectedReemit { .. }));
        }
        assert!(job.unresolved().is_empty());
    }

    #[tokio::test]
    async fn queued_and_processing_leave_outcomes_empty() {
        let mock = Arc::new(MockTransmissionApi::new());
        accepted(&mock);
        mock.push_batch_status(Ok(BatchStatusResponse {
            phase: BatchPhase::Queued,
            items: vec![],
        }));
        mock.push_batch_status(Ok(BatchStatusResponse {
            phase: BatchPhase::Processing,
            items: vec![],
        }));

        let orchestrator = orchestrator(mock.clone());
        let job = orchestrator.submit(vec![payload(1)], ts(T)).await.unwrap();
        let job = orchestrator.poll(job, ts(T + 30)).await.unwrap();
        assert_eq!(job.state, BatchJobState::Queued);
        let job = orchestrator.poll(job, ts(T + 90)).await.unwrap();
        assert_eq!(job.state, BatchJobState::Processing);
        assert_eq!(job.polls, 2);
        assert!(job.outcomes.is_empty());
    }

    #[tokio::test]
    async fn settled_jobs_pass_through_polling_unchanged() {
        let mock = Arc::new(MockTransmissionApi::new());
        accepted(&mock);
        mock.push_batch_status(Ok(BatchStatusResponse {
            phase: BatchPhase::Done,
            items: vec![item(1, 260)],
        }));

        let orchestrator = orchestrator(mock.clone());
        let job = orchestrator.submit(vec![payload(1)], ts(T)).await.unwrap();
        let done = orchestrator.poll(job, ts(T + 30)).await.unwrap();
        let calls_before = mock.calls().len();
        // No scripted status remains; an idempotent re-poll must not need one.
        let again = orchestrator.poll(done.clone(), ts(T + 60)).await.unwrap();
        assert_eq!(again.outcomes, done.outcomes);
        assert_eq!(mock.calls().len(), calls_before);
    }

    #[tokio::test]
    async fn deadline_marks_timed_out_and_queries_fallback() {
        let mock = Arc::new(MockTransmissionApi::new());
        accepted(&mock);
        mock.push_document_query(Ok(DocumentQueryResponse {
            code: 260,
            message: String::new(),
            transaction_id: "tx-1".into(),
            found: true,
        }));
        mock.push_document_query(Ok(DocumentQueryResponse {
            code: 420,
            message: String::new(),
            transaction_id: String::new(),
            found: false,
        }));

        let orchestrator = orchestrator(mock.clone());
        let job = orchestrator
            .submit(vec![payload(1), payload(2)], ts(T))
            .await
            .unwrap();
        let job = orchestrator.poll(job, ts(T + 3 * 3600)).await.unwrap();

        assert_eq!(job.state, BatchJobState::TimedOut);
        // First document resolved via fallback, second unknown to the authority.
        assert_eq!(job.outcomes.len(), 1);
        assert!(job.outcomes[payload(1).cdc.as_str()].is_approved());
        assert_eq!(job.unresolved().len(), 1);
    }

    #[tokio::test]
    async fn deadline_fallback_queries_draw_from_the_shared_bucket() {
        let mock = Arc::new(MockTransmissionApi::new());
        accepted(&mock);
        for _ in 0..2 {
            mock.push_document_query(Ok(DocumentQueryResponse {
                code: 260,
                message: String::new(),
                transaction_id: "tx".into(),
                found: true,
            }));
        }

        let start = ts(T);
        let later = ts(T + 3 * 3600);
        let bucket = Arc::new(TokenBucket::new(10, 1, start));
        let orchestrator = BatchOrchestrator::new(
            mock.clone(),
            bucket.clone(),
            Arc::new(TestClock::starting_at(later)),
        );
        let job = orchestrator
            .submit(vec![payload(1), payload(2)], start)
            .await
            .unwrap();
        let job = orchestrator.poll(job, later).await.unwrap();
        assert_eq!(job.state, BatchJobState::TimedOut);
        assert_eq!(job.outcomes.len(), 2);

        // Two fallback queries consumed two tokens from the shared bucket.
        let mut granted = 0;
        while bucket.try_acquire(later) {
            granted += 1;
        }
        assert_eq!(granted, 8);
    }

    #[test]
    fn poll_delay_doubles_to_a_five_minute_cap() {
        let mock = Arc::new(MockTransmissionApi::new());
        let orchestrator = orchestrator(mock);
        assert_eq!(orchestrator.next_poll_delay(0), Duration::from_secs(30));
        assert_eq!(orchestrator.next_poll_delay(1), Duration::from_secs(60));
        assert_eq!(orchestrator.next_poll_delay(2), Duration::from_secs(120));
        assert_eq!(orchestrator.next_poll_delay(3), Duration::from_secs(240));
        assert_eq!(orchestrator.next_poll_delay(4), POLL_CAP);
        assert_eq!(orchestrator.next_poll_delay(10), POLL_CAP);
    }
}
