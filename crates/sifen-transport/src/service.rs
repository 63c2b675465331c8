//! # Document Service Facade
//!
//! The single surface the invoicing layer calls. Every path through this
//! module ends in one of the closed [`Outcome`] variants or a typed
//! [`TransportError`] — never a raw transport exception.
//!
//! ## Retry and contingency
//!
//! Connection failures are recovered locally: the service retries with the
//! configured backoff while the document's transmission window still
//! permits the next attempt, then hands the document to the contingency
//! ledger and reports `PendingContingency`. Retry exhaustion is not an
//! error the caller sees.
//!
//! ## Ambiguous outcomes
//!
//! A timed-out submission may or may not have been delivered. The service
//! never blind-retries after a timeout: it queries by control code first,
//! adopts the authority's recorded verdict if one exists, and only treats
//! the attempt as undelivered when the authority has no record of it.

use std::sync::Arc;

use sifen_core::{Cdc, DocumentNumber, DocumentType, Establishment, ExpeditionPoint, Ruc};
use sifen_rules::{window, Outcome};

use crate::batch::{BatchJob, BatchOrchestrator};
use crate::client::{SignedPayload, TransmissionApi, TransportError};
use crate::contingency::ContingencyLedger;
use crate::limiter::TokenBucket;
use crate::record::{excerpt, DocumentStatus, RecordLog, TransmissionRecord};
use crate::retry::{BackoffPolicy, Clock};
use crate::soap::TaxpayerQueryResponse;

/// Synthetic code reported when the window expired before any attempt.
const CODE_WINDOW_EXPIRED: u16 = 900;

/// Events submitted about an existing document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentEvent {
    /// Void an approved document within its cancellation deadline.
    Cancellation { cdc: Cdc, reason: String },
    /// Mark an abandoned number range unusable after re-emission.
    Inutilization {
        ruc: Ruc,
        document_type: DocumentType,
        establishment: Establishment,
        expedition_point: ExpeditionPoint,
        from_number: DocumentNumber,
        to_number: DocumentNumber,
    },
}

impl DocumentEvent {
    /// Render the event body for the event-submission exchange.
    pub fn to_xml(&self) -> String {
        match self {
            DocumentEvent::Cancellation { cdc, reason } => format!(
                "<rGeVeCan><Id>{}</Id><mOtEve>{}</mOtEve></rGeVeCan>",
                cdc.as_str(),
                xml_escape(reason)
            ),
            DocumentEvent::Inutilization {
                ruc,
                document_type,
                establishment,
                expedition_point,
                from_number,
                to_number,
            } => format!(
                "<rGeVeInu><dNumTim>{}</dNumTim><dEst>{}</dEst><dPunExp>{}</dPunExp>\
                 <dNumIn>{}</dNumIn><dNumFin>{}</dNumFin><iTiDE>{}</iTiDE></rGeVeInu>",
                ruc.digits(),
                establishment.as_str(),
                expedition_point.as_str(),
                from_number.as_str(),
                to_number.as_str(),
                document_type.code()
            ),
        }
    }
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// Response transcript line retained in the transmission record.
fn render_response(code: u16, transaction_id: &str, message: &str) -> String {
    format!("dCodRes={code:04} dProtAut={transaction_id} dMsgRes={message}")
}

/// The transmission core's entry point for the invoicing layer.
pub struct DocumentService {
    api: Arc<dyn TransmissionApi>,
    ledger: Arc<ContingencyLedger>,
    limiter: Arc<TokenBucket>,
    clock: Arc<dyn Clock>,
    backoff: BackoffPolicy,
    records: Arc<RecordLog>,
    orchestrator: BatchOrchestrator,
}

impl DocumentService {
    pub fn new(
        api: Arc<dyn TransmissionApi>,
        clock: Arc<dyn Clock>,
        limiter: Arc<TokenBucket>,
    ) -> Self {
        Self {
            orchestrator: BatchOrchestrator::new(
                Arc::clone(&api),
                Arc::clone(&limiter),
                Arc::clone(&clock),
            ),
            api,
            ledger: Arc::new(ContingencyLedger::new()),
            limiter,
            clock,
            backoff: BackoffPolicy::default(),
            records: Arc::new(RecordLog::new()),
        }
    }

    /// Override the retry schedule (tests use a sub-millisecond base).
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// The contingency ledger shared with replay workers.
    pub fn ledger(&self) -> &Arc<ContingencyLedger> {
        &self.ledger
    }

    /// Append-only transmission history.
    pub fn records(&self) -> &Arc<RecordLog> {
        &self.records
    }

    /// Submit one signed document and drive it to a reportable outcome.
    ///
    /// This never surfaces a connection failure: retry exhaustion and
    /// window pressure both resolve to `PendingContingency` after the
    /// document is captured in the ledger.
    pub async fn submit_document(&self, payload: SignedPayload) -> TransmissionRecord {
        let mut attempt: u32 = 0;
        let (window, outcome, response_excerpt) = loop {
            let now = self.clock.now();
            let window = window::classify(payload.emitted_at, payload.signed_at, now);
            if !window.permits_transmission() {
                break (
                    window,
                    Outcome::RejectedFatal {
                        code: CODE_WINDOW_EXPIRED,
                        message: "transmission window expired before submission".into(),
                    },
                    String::new(),
                );
            }

            self.limiter.acquire(self.clock.as_ref()).await;
            attempt += 1;
            match self.api.submit_single(&payload).await {
                Ok(response) => {
                    let transcript = render_response(
                        response.code,
                        &response.transaction_id,
                        &response.message,
                    );
                    break (
                        window,
                        Outcome::from_response(
                            response.code,
                            response.transaction_id,
                            response.message,
                        ),
                        transcript,
                    );
                }
                Err(TransportError::OutcomeUnknown { elapsed_ms }) => {
                    tracing::warn!(
                        cdc = payload.cdc.as_str(),
                        elapsed_ms,
                        "submission timed out; querying before any retry"
                    );
                    match self.resolve_ambiguous(&payload.cdc).await {
                        Some((outcome, transcript)) => break (window, outcome, transcript),
                        None if self.may_retry(&payload, attempt) => {
                            self.pause(attempt - 1).await;
                        }
                        None => break (window, self.to_contingency(&payload), String::new()),
                    }
                }
                Err(e) if e.is_retryable() => {
                    if self.may_retry(&payload, attempt) {
                        let delay = self.backoff.delay(attempt - 1);
                        tracing::warn!(
                            cdc = payload.cdc.as_str(),
                            attempt,
                            "connection failure, retrying in {delay:?}: {e}"
                        );
                        tokio::time::sleep(delay).await;
                    } else {
                        break (window, self.to_contingency(&payload), String::new());
                    }
                }
                Err(e) => {
                    // Protocol-level rejection: fatal for this instance,
                    // never retried.
                    let transcript = e.to_string();
                    break (
                        window,
                        Outcome::RejectedFatal {
                            code: 0,
                            message: e.to_string(),
                        },
                        transcript,
                    );
                }
            }
        };

        let record = TransmissionRecord {
            cdc: payload.cdc.clone(),
            attempt: attempt.max(1),
            window,
            outcome,
            request_excerpt: excerpt(&payload.xml),
            response_excerpt: excerpt(&response_excerpt),
            recorded_at: self.clock.now(),
        };
        tracing::info!(
            cdc = record.cdc.as_str(),
            attempt = record.attempt,
            outcome = ?record.outcome,
            "transmission settled"
        );
        self.records.append(record.clone());
        record
    }

    /// Whether another attempt is allowed: budget remaining and the window
    /// still open once the next backoff delay has elapsed.
    fn may_retry(&self, payload: &SignedPayload, attempts_made: u32) -> bool {
        if !self.backoff.attempts_remain(attempts_made) {
            return false;
        }
        let delay = self.backoff.base_delay(attempts_made);
        let next_attempt_at = self.clock.now().plus_secs(delay.as_secs() as i64);
        window::classify(payload.emitted_at, payload.signed_at, next_attempt_at)
            .permits_transmission()
    }

    async fn pause(&self, attempt_index: u32) {
        tokio::time::sleep(self.backoff.delay(attempt_index)).await;
    }

    fn to_contingency(&self, payload: &SignedPayload) -> Outcome {
        self.ledger.capture(payload.clone(), self.clock.now());
        Outcome::PendingContingency
    }

    /// After a timeout, adopt the authority's verdict if it has one. The
    /// returned transcript reflects the query response the verdict came from.
    async fn resolve_ambiguous(&self, cdc: &Cdc) -> Option<(Outcome, String)> {
        match self.api.query_document(cdc).await {
            Ok(status) if status.found => {
                let transcript =
                    render_response(status.code, &status.transaction_id, &status.message);
                Some((
                    Outcome::from_response(status.code, status.transaction_id, status.message),
                    transcript,
                ))
            }
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(cdc = cdc.as_str(), "ambiguity query failed: {e}");
                None
            }
        }
    }

    /// Submit up to fifty signed documents as one asynchronous batch.
    pub async fn submit_batch(
        &self,
        documents: Vec<SignedPayload>,
    ) -> Result<BatchJob, TransportError> {
        self.limiter.acquire(self.clock.as_ref()).await;
        self.orchestrator.submit(documents, self.clock.now()).await
    }

    /// Poll a batch once. Idempotent; settled jobs pass through.
    pub async fn poll_batch(&self, job: BatchJob) -> Result<BatchJob, TransportError> {
        if !job.state.is_settled() {
            self.limiter.acquire(self.clock.as_ref()).await;
        }
        self.orchestrator.poll(job, self.clock.now()).await
    }

    /// Delay to wait before the next poll of this job.
    pub fn next_poll_delay(&self, job: &BatchJob) -> std::time::Duration {
        self.orchestrator.next_poll_delay(job.polls)
    }

    /// Cancel an approved document. The caller builds the event body with
    /// [`DocumentEvent::Cancellation`] and signs it before handing it here.
    ///
    /// An ambiguous (timed-out) cancellation is resolved by querying the
    /// control code before anything else; the error is surfaced only when
    /// the authority has no verdict to adopt.
    pub async fn cancel_document(
        &self,
        cdc: &Cdc,
        signed_event_xml: &str,
    ) -> Result<Outcome, TransportError> {
        self.limiter.acquire(self.clock.as_ref()).await;
        match self.api.submit_event(signed_event_xml).await {
            Ok(response) => Ok(Outcome::from_response(
                response.code,
                response.transaction_id,
                response.message,
            )),
            Err(TransportError::OutcomeUnknown { elapsed_ms }) => {
                tracing::warn!(cdc = cdc.as_str(), "cancellation outcome unknown; querying");
                match self.resolve_ambiguous(cdc).await {
                    Some((outcome, _)) => Ok(outcome),
                    None => Err(TransportError::OutcomeUnknown { elapsed_ms }),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Submit a signed inutilization event for an abandoned number range.
    pub async fn inutilize(
        &self,
        signed_event_xml: &str,
    ) -> Result<Outcome, TransportError> {
        self.limiter.acquire(self.clock.as_ref()).await;
        let response = self.api.submit_event(signed_event_xml).await?;
        Ok(Outcome::from_response(
            response.code,
            response.transaction_id,
            response.message,
        ))
    }

    /// The authority's current record of a control code.
    pub async fn query_document(&self, cdc: &Cdc) -> Result<DocumentStatus, TransportError> {
        self.limiter.acquire(self.clock.as_ref()).await;
        let response = self.api.query_document(cdc).await?;
        Ok(DocumentStatus {
            cdc: cdc.clone(),
            known: response.found,
            code: response.code,
            message: response.message,
            transaction_id: response.transaction_id,
            queried_at: self.clock.now(),
        })
    }

    /// Registration data for a RUC.
    pub async fn query_taxpayer(
        &self,
        ruc: &Ruc,
    ) -> Result<TaxpayerQueryResponse, TransportError> {
        self.limiter.acquire(self.clock.as_ref()).await;
        self.api.query_taxpayer(ruc).await
    }

    /// Replay the contingency ledger under the shared rate limit.
    pub async fn replay_contingency(&self) -> Vec<(Cdc, Outcome)> {
        self.ledger
            .replay(
                Arc::clone(&self.api),
                Arc::clone(&self.limiter),
                Arc::clone(&self.clock),
            )
            .await
    }
}
