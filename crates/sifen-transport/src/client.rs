//! # Transmission Client
//!
//! The wire boundary. [`TransmissionApi`] abstracts the authority's web
//! services; production uses [`HttpTransmissionClient`] over mutual TLS,
//! tests use [`MockTransmissionApi`] with scripted responses.
//!
//! Retry policy is NOT built into the client — the service layer owns
//! retry, window gating, and contingency hand-off, and consults this layer
//! only for single attempts. Connection-level failures and 5xx statuses
//! surface as [`TransportError::Connection`]; protocol-level rejections
//! arrive as parsed responses and are never retried.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;

use sifen_core::{Cdc, Ruc, Timestamp};

use crate::config::{ConfigError, SifenConfig, BATCH_MAX_DOCUMENTS};
use crate::soap::{
    build_envelope, BatchAcceptResponse, BatchStatusResponse, DocumentQueryResponse,
    ExchangeKind, SoapError, SubmitResponse, TaxpayerQueryResponse,
};

/// Transport-level failure.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Construction-time configuration problem.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Envelope construction or response parsing failed.
    #[error(transparent)]
    Envelope(#[from] SoapError),

    /// Connection-level failure: DNS, TLS handshake, refused connection,
    /// or a 5xx from the service. Retryable while the window permits.
    #[error("connection failure: {reason}")]
    Connection { reason: String },

    /// The request timed out. The submission may or may not have been
    /// delivered; the caller must query by control code before retrying.
    #[error("request timed out after {elapsed_ms}ms; outcome unknown")]
    OutcomeUnknown { elapsed_ms: u64 },

    /// The service answered with a client-error status.
    #[error("protocol rejection: HTTP {status}: {body}")]
    Protocol { status: u16, body: String },

    /// More documents than a batch may carry.
    #[error("batch holds {count} documents, maximum is {BATCH_MAX_DOCUMENTS}")]
    BatchTooLarge { count: usize },
}

impl TransportError {
    /// Whether the retry loop may attempt this operation again (subject to
    /// the window gate). Only connection-level failures qualify; an unknown
    /// outcome requires a query first.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::Connection { .. })
    }
}

/// A signed document ready for the wire, with the instants the window
/// rules need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedPayload {
    pub cdc: Cdc,
    pub xml: String,
    pub emitted_at: Timestamp,
    pub signed_at: Timestamp,
}

impl SignedPayload {
    pub fn new(cdc: Cdc, xml: String, emitted_at: Timestamp, signed_at: Timestamp) -> Self {
        Self {
            cdc,
            xml,
            emitted_at,
            signed_at,
        }
    }
}

/// The authority's web-service surface.
#[async_trait]
pub trait TransmissionApi: Send + Sync {
    /// Synchronous single-document submission.
    async fn submit_single(
        &self,
        payload: &SignedPayload,
    ) -> Result<SubmitResponse, TransportError>;

    /// Asynchronous batch submission; acceptance only, not completion.
    async fn submit_batch(
        &self,
        payloads: &[SignedPayload],
    ) -> Result<BatchAcceptResponse, TransportError>;

    /// Poll a previously accepted batch.
    async fn query_batch(&self, batch_id: &str) -> Result<BatchStatusResponse, TransportError>;

    /// Submit a signed cancellation or inutilization event.
    async fn submit_event(&self, event_xml: &str) -> Result<SubmitResponse, TransportError>;

    /// The authority's record of one control code.
    async fn query_document(&self, cdc: &Cdc) -> Result<DocumentQueryResponse, TransportError>;

    /// Registration data for a RUC.
    async fn query_taxpayer(&self, ruc: &Ruc) -> Result<TaxpayerQueryResponse, TransportError>;
}

/// Production client over mutually-authenticated TLS.
#[derive(Debug)]
pub struct HttpTransmissionClient {
    client: reqwest::Client,
    config: SifenConfig,
    request_id: AtomicU64,
}

impl HttpTransmissionClient {
    /// Build a client from configuration. The client identity, when
    /// present, must be PEM holding both certificate and key.
    pub fn new(config: SifenConfig) -> Result<Self, TransportError> {
        let mut builder = reqwest::Client::builder().use_rustls_tls();
        if let Some(pem) = &config.client_identity_pem {
            let identity = reqwest::Identity::from_pem(pem)
                .map_err(|e| ConfigError::InvalidIdentity(e.to_string()))?;
            builder = builder.identity(identity);
        }
        let client = builder.build().map_err(|e| TransportError::Connection {
            reason: format!("failed to build HTTP client: {e}"),
        })?;
        Ok(Self {
            client,
            config,
            request_id: AtomicU64::new(1),
        })
    }

    fn next_request_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn post(
        &self,
        path: &str,
        envelope: String,
        timeout: Duration,
    ) -> Result<String, TransportError> {
        let url = self.config.endpoint(path).map_err(TransportError::Config)?;
        tracing::debug!(%url, bytes = envelope.len(), "sending SOAP request");

        let response = self
            .client
            .post(url.clone())
            .header("Content-Type", "application/soap+xml; charset=utf-8")
            .timeout(timeout)
            .body(envelope)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::OutcomeUnknown {
                        elapsed_ms: timeout.as_millis() as u64,
                    }
                } else {
                    TransportError::Connection {
                        reason: format!("{path}: {e}"),
                    }
                }
            })?;

        let status = response.status();
        if status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Connection {
                reason: format!("{path}: HTTP {status}: {body}"),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Protocol {
                status: status.as_u16(),
                body,
            });
        }
        response.text().await.map_err(|e| TransportError::Connection {
            reason: format!("{path}: reading response body: {e}"),
        })
    }
}

#[async_trait]
impl TransmissionApi for HttpTransmissionClient {
    async fn submit_single(
        &self,
        payload: &SignedPayload,
    ) -> Result<SubmitResponse, TransportError> {
        let body = format!("<xDE>{}</xDE>", payload.xml);
        let envelope = build_envelope(
            "rEnviDe",
            self.next_request_id(),
            &body,
            ExchangeKind::Single,
        )?;
        let response = self
            .post("recibe", envelope, self.config.single_timeout)
            .await?;
        Ok(SubmitResponse::from_xml(&response)?)
    }

    async fn submit_batch(
        &self,
        payloads: &[SignedPayload],
    ) -> Result<BatchAcceptResponse, TransportError> {
        if payloads.len() > BATCH_MAX_DOCUMENTS {
            return Err(TransportError::BatchTooLarge {
                count: payloads.len(),
            });
        }
        let mut body = String::from("<xDE>");
        for payload in payloads {
            body.push_str(&payload.xml);
        }
        body.push_str("</xDE>");
        let envelope = build_envelope(
            "rEnvioLote",
            self.next_request_id(),
            &body,
            ExchangeKind::Batch,
        )?;
        let response = self
            .post("recibe-lote", envelope, self.config.batch_timeout)
            .await?;
        Ok(BatchAcceptResponse::from_xml(&response)?)
    }

    async fn query_batch(&self, batch_id: &str) -> Result<BatchStatusResponse, TransportError> {
        let body = format!("<dProtConsLote>{batch_id}</dProtConsLote>");
        let envelope = build_envelope(
            "rEnviConsLoteDe",
            self.next_request_id(),
            &body,
            ExchangeKind::Single,
        )?;
        let response = self
            .post("consulta-lote", envelope, self.config.batch_timeout)
            .await?;
        Ok(BatchStatusResponse::from_xml(&response)?)
    }

    async fn submit_event(&self, event_xml: &str) -> Result<SubmitResponse, TransportError> {
        let body = format!("<xEvento>{event_xml}</xEvento>");
        let envelope = build_envelope(
            "rEnviEventoDe",
            self.next_request_id(),
            &body,
            ExchangeKind::Single,
        )?;
        let response = self
            .post("evento", envelope, self.config.single_timeout)
            .await?;
        Ok(SubmitResponse::from_xml(&response)?)
    }

    async fn query_document(&self, cdc: &Cdc) -> Result<DocumentQueryResponse, TransportError> {
        let body = format!("<dCDC>{}</dCDC>", cdc.as_str());
        let envelope = build_envelope(
            "rEnviConsDe",
            self.next_request_id(),
            &body,
            ExchangeKind::Single,
        )?;
        let response = self
            .post("consulta", envelope, self.config.single_timeout)
            .await?;
        Ok(DocumentQueryResponse::from_xml(&response)?)
    }

    async fn query_taxpayer(&self, ruc: &Ruc) -> Result<TaxpayerQueryResponse, TransportError> {
        let body = format!("<dRUCCons>{}</dRUCCons>", ruc.digits());
        let envelope = build_envelope(
            "rEnviConsRUC",
            self.next_request_id(),
            &body,
            ExchangeKind::Single,
        )?;
        let response = self
            .post("consulta-ruc", envelope, self.config.single_timeout)
            .await?;
        Ok(TaxpayerQueryResponse::from_xml(&response)?)
    }
}

/// Scripted in-memory implementation for tests and local development.
///
/// Responses are queues: each call pops the next scripted response for its
/// operation. An exhausted queue answers with a connection failure, which
/// keeps accidental extra calls visible in assertions.
#[derive(Debug, Default)]
pub struct MockTransmissionApi {
    submits: Mutex<VecDeque<Result<SubmitResponse, TransportError>>>,
    batch_accepts: Mutex<VecDeque<Result<BatchAcceptResponse, TransportError>>>,
    batch_statuses: Mutex<VecDeque<Result<BatchStatusResponse, TransportError>>>,
    events: Mutex<VecDeque<Result<SubmitResponse, TransportError>>>,
    document_queries: Mutex<VecDeque<Result<DocumentQueryResponse, TransportError>>>,
    taxpayer_queries: Mutex<VecDeque<Result<TaxpayerQueryResponse, TransportError>>>,
    calls: Mutex<Vec<String>>,
}

impl MockTransmissionApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_submit(&self, response: Result<SubmitResponse, TransportError>) {
        self.submits.lock().push_back(response);
    }

    pub fn push_batch_accept(&self, response: Result<BatchAcceptResponse, TransportError>) {
        self.batch_accepts.lock().push_back(response);
    }

    pub fn push_batch_status(&self, response: Result<BatchStatusResponse, TransportError>) {
        self.batch_statuses.lock().push_back(response);
    }

    pub fn push_event(&self, response: Result<SubmitResponse, TransportError>) {
        self.events.lock().push_back(response);
    }

    pub fn push_document_query(&self, response: Result<DocumentQueryResponse, TransportError>) {
        self.document_queries.lock().push_back(response);
    }

    pub fn push_taxpayer_query(
        &self,
        response: Result<TaxpayerQueryResponse, TransportError>,
    ) {
        self.taxpayer_queries.lock().push_back(response);
    }

    /// Operation log, one entry per call, tagged with the control code or
    /// identifier involved.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn exhausted(operation: &str) -> TransportError {
        TransportError::Connection {
            reason: format!("mock: no scripted response for {operation}"),
        }
    }
}

#[async_trait]
impl TransmissionApi for MockTransmissionApi {
    async fn submit_single(
        &self,
        payload: &SignedPayload,
    ) -> Result<SubmitResponse, TransportError> {
        self.calls
            .lock()
            .push(format!("submit_single:{}", payload.cdc.as_str()));
        self.submits
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(Self::exhausted("submit_single")))
    }

    async fn submit_batch(
        &self,
        payloads: &[SignedPayload],
    ) -> Result<BatchAcceptResponse, TransportError> {
        if payloads.len() > BATCH_MAX_DOCUMENTS {
            return Err(TransportError::BatchTooLarge {
                count: payloads.len(),
            });
        }
        self.calls
            .lock()
            .push(format!("submit_batch:{}", payloads.len()));
        self.batch_accepts
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(Self::exhausted("submit_batch")))
    }

    async fn query_batch(&self, batch_id: &str) -> Result<BatchStatusResponse, TransportError> {
        self.calls.lock().push(format!("query_batch:{batch_id}"));
        self.batch_statuses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(Self::exhausted("query_batch")))
    }

    async fn submit_event(&self, _event_xml: &str) -> Result<SubmitResponse, TransportError> {
        self.calls.lock().push("submit_event".to_string());
        self.events
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(Self::exhausted("submit_event")))
    }

    async fn query_document(&self, cdc: &Cdc) -> Result<DocumentQueryResponse, TransportError> {
        self.calls
            .lock()
            .push(format!("query_document:{}", cdc.as_str()));
        self.document_queries
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(Self::exhausted("query_document")))
    }

    async fn query_taxpayer(&self, ruc: &Ruc) -> Result<TaxpayerQueryResponse, TransportError> {
        self.calls
            .lock()
            .push(format!("query_taxpayer:{}", ruc.digits()));
        self.taxpayer_queries
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(Self::exhausted("query_taxpayer")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{payload, ts, T};

    #[tokio::test]
    async fn mock_pops_scripted_responses_in_order() {
        let mock = MockTransmissionApi::new();
        mock.push_submit(Ok(SubmitResponse {
            code: 260,
            message: "ok".into(),
            transaction_id: "1".into(),
        }));
        mock.push_submit(Err(TransportError::Connection {
            reason: "down".into(),
        }));

        let doc = payload(1);
        assert_eq!(mock.submit_single(&doc).await.unwrap().code, 260);
        assert!(mock.submit_single(&doc).await.unwrap_err().is_retryable());
    }

    #[tokio::test]
    async fn mock_exhaustion_is_a_connection_error() {
        let mock = MockTransmissionApi::new();
        let err = mock.submit_single(&payload(1)).await.unwrap_err();
        assert!(matches!(err, TransportError::Connection { .. }));
    }

    #[tokio::test]
    async fn mock_logs_calls_with_identifiers() {
        let mock = MockTransmissionApi::new();
        let doc = payload(1);
        let _ = mock.submit_single(&doc).await;
        let _ = mock.query_document(&doc.cdc).await;
        let calls = mock.calls();
        assert!(calls[0].starts_with("submit_single:"));
        assert!(calls[1].starts_with("query_document:"));
    }

    #[tokio::test]
    async fn batch_size_limit_enforced_before_any_wire_activity() {
        let mock = MockTransmissionApi::new();
        let docs: Vec<_> = (0..51).map(payload).collect();
        let err = mock.submit_batch(&docs).await.unwrap_err();
        assert!(matches!(err, TransportError::BatchTooLarge { count: 51 }));
        assert!(mock.calls().is_empty());
    }

    #[test]
    fn only_connection_errors_are_retryable() {
        assert!(TransportError::Connection {
            reason: String::new()
        }
        .is_retryable());
        assert!(!TransportError::OutcomeUnknown { elapsed_ms: 60_000 }.is_retryable());
        assert!(!TransportError::Protocol {
            status: 400,
            body: String::new()
        }
        .is_retryable());
        assert!(!TransportError::BatchTooLarge { count: 51 }.is_retryable());
    }

    #[test]
    fn payload_carries_window_instants() {
        let doc = payload(3);
        assert!(doc.signed_at.since(doc.emitted_at) >= chrono::Duration::zero());
        let _ = ts(T);
    }
}
