//! # Transmission Records
//!
//! Append-only history of every transmission attempt and its outcome. The
//! invoicing layer consumes these to update its own state; nothing in this
//! module ever mutates or removes an existing record.

use serde::{Deserialize, Serialize};

use parking_lot::RwLock;
use sifen_core::{Cdc, Timestamp};
use sifen_rules::{Outcome, WindowClass};

/// Longest transcript excerpt retained per record.
pub const EXCERPT_MAX_BYTES: usize = 512;

/// One transmission attempt's result, as handed to the invoicing layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransmissionRecord {
    pub cdc: Cdc,
    /// One-based attempt number within this document's lifecycle.
    pub attempt: u32,
    /// Window framing of the attempt.
    pub window: WindowClass,
    pub outcome: Outcome,
    /// Excerpt of the submitted document XML.
    pub request_excerpt: String,
    /// Excerpt of the authority's response fields; empty when the attempt
    /// never completed an exchange.
    pub response_excerpt: String,
    pub recorded_at: Timestamp,
}

/// Truncate transcript text to the retained excerpt length, cutting on a
/// character boundary.
pub fn excerpt(s: &str) -> String {
    if s.len() <= EXCERPT_MAX_BYTES {
        return s.to_string();
    }
    let mut end = EXCERPT_MAX_BYTES;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

/// The authority's current view of one document, from a query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentStatus {
    pub cdc: Cdc,
    /// Whether the authority has any record of the control code.
    pub known: bool,
    pub code: u16,
    pub message: String,
    pub transaction_id: String,
    pub queried_at: Timestamp,
}

/// In-memory append-only record log, shared across workers.
#[derive(Debug, Default)]
pub struct RecordLog {
    records: RwLock<Vec<TransmissionRecord>>,
}

impl RecordLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one record. Records are never updated in place; a later
    /// attempt for the same control code gets its own entry.
    pub fn append(&self, record: TransmissionRecord) {
        self.records.write().push(record);
    }

    /// Snapshot of the full history.
    pub fn snapshot(&self) -> Vec<TransmissionRecord> {
        self.records.read().clone()
    }

    /// History for one control code, in append order.
    pub fn for_cdc(&self, cdc: &Cdc) -> Vec<TransmissionRecord> {
        self.records
            .read()
            .iter()
            .filter(|r| &r.cdc == cdc)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{payload, ts, T};

    fn record(attempt: u32, doc: u64, outcome: Outcome) -> TransmissionRecord {
        let payload = payload(doc);
        TransmissionRecord {
            cdc: payload.cdc,
            attempt,
            window: WindowClass::Normal,
            outcome,
            request_excerpt: excerpt(&payload.xml),
            response_excerpt: String::new(),
            recorded_at: ts(T),
        }
    }

    #[test]
    fn log_preserves_append_order() {
        let log = RecordLog::new();
        log.append(record(1, 1, Outcome::PendingContingency));
        log.append(record(
            2,
            1,
            Outcome::Approved {
                transaction_id: "tx".into(),
            },
        ));
        let history = log.snapshot();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].attempt, 1);
        assert_eq!(history[1].attempt, 2);
    }

    #[test]
    fn per_cdc_history_filters_other_documents() {
        let log = RecordLog::new();
        log.append(record(1, 1, Outcome::PendingContingency));
        log.append(record(1, 2, Outcome::PendingContingency));
        let target = payload(1).cdc;
        let history = log.for_cdc(&target);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].cdc, target);
    }

    #[test]
    fn records_serialize_for_the_invoicing_layer() {
        let r = record(
            1,
            1,
            Outcome::RejectedFatal {
                code: 420,
                message: "certificado".into(),
            },
        );
        let json = serde_json::to_string(&r).unwrap();
        let back: TransmissionRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, r);
    }

    #[test]
    fn excerpt_truncates_on_a_char_boundary() {
        assert_eq!(excerpt("short"), "short");
        let long = "á".repeat(600);
        let cut = excerpt(&long);
        assert!(cut.len() <= EXCERPT_MAX_BYTES);
        assert!(cut.chars().all(|c| c == 'á'));
    }
}
