//! # sifen-transport — Wire Transport and Orchestration
//!
//! Everything between a signed document and its recorded outcome: SOAP
//! envelopes over mutually-authenticated TLS, the windowed retry policy,
//! the shared rate limiter, batch orchestration, the contingency ledger,
//! and the [`DocumentService`] facade the invoicing layer calls.
//!
//! ## Invariant
//!
//! Within one control code's lifecycle, transmission attempts are strictly
//! sequential; concurrency exists only across documents, and every worker
//! that touches the wire draws from the one shared token bucket. The
//! facade returns only the closed outcome set from `sifen-rules` — a raw
//! transport error never crosses it for a submission.

pub mod batch;
pub mod client;
pub mod config;
pub mod contingency;
pub mod limiter;
pub mod record;
pub mod retry;
pub mod service;
pub mod signing;
pub mod soap;

pub use batch::{BatchJob, BatchJobState, BatchOrchestrator};
pub use client::{
    HttpTransmissionClient, MockTransmissionApi, SignedPayload, TransmissionApi, TransportError,
};
pub use config::{ConfigError, Environment, SifenConfig};
pub use contingency::{ContingencyLedger, FailureRecord};
pub use limiter::TokenBucket;
pub use record::{DocumentStatus, RecordLog, TransmissionRecord};
pub use retry::{BackoffPolicy, Clock, SystemClock, TestClock};
pub use service::{DocumentEvent, DocumentService};
pub use signing::{BatchSigner, UnsignedDocument};
pub use soap::{SoapError, SubmitResponse, TaxpayerQueryResponse};
