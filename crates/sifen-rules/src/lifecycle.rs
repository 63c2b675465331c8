//! # Document Lifecycle State Machine
//!
//! Tracks one electronic document from generation through its terminal
//! state. Transitions are explicit methods; an out-of-order call is a typed
//! error, never a silent overwrite.
//!
//! ## Cancellation deadlines
//!
//! Only an approved document can be cancelled, via a later event, within a
//! deadline measured from approval: 48 hours for standard invoices, 168
//! hours for every other document type.
//!
//! ## Re-emission
//!
//! Rejection is terminal for the document instance. When the rejection code
//! classifies as requiring re-emission, the caller abandons this control
//! code (optionally inutilizing its sequence number) and generates a new
//! document; that new instance gets its own lifecycle.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use sifen_core::{DocumentType, Timestamp};

/// Cancellation deadline for standard invoices, in hours from approval.
pub const INVOICE_CANCEL_HOURS: i64 = 48;

/// Cancellation deadline for all other document types.
pub const OTHER_CANCEL_HOURS: i64 = 168;

/// Lifecycle violation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    /// The requested transition is not legal from the current state.
    #[error("cannot {action} a document in state {state}")]
    InvalidTransition {
        state: &'static str,
        action: &'static str,
    },

    /// The cancellation deadline has passed.
    #[error("cancellation window closed at {deadline}")]
    CancellationWindowClosed { deadline: Timestamp },
}

/// Where a document sits in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentState {
    /// Assembled, control code computed, not yet signed.
    Generated,
    /// Signature applied; ready for transmission.
    Signed { signed_at: Timestamp },
    /// Accepted into a batch; outcome pending.
    TransmittedPending,
    /// Submitted synchronously; response received in the same exchange.
    TransmittedImmediate,
    /// Accepted by the authority.
    Approved { approved_at: Timestamp },
    /// Accepted late, flagged for sanction bookkeeping.
    ApprovedWithObservation { approved_at: Timestamp },
    /// Terminal rejection; `reemit_required` says whether the caller must
    /// issue a replacement document under a fresh control code.
    Rejected { code: u16, reemit_required: bool },
    /// Cancelled by a later event within the deadline.
    Cancelled { cancelled_at: Timestamp },
}

impl DocumentState {
    fn name(&self) -> &'static str {
        match self {
            DocumentState::Generated => "generated",
            DocumentState::Signed { .. } => "signed",
            DocumentState::TransmittedPending => "transmitted-pending",
            DocumentState::TransmittedImmediate => "transmitted-immediate",
            DocumentState::Approved { .. } => "approved",
            DocumentState::ApprovedWithObservation { .. } => "approved-with-observation",
            DocumentState::Rejected { .. } => "rejected",
            DocumentState::Cancelled { .. } => "cancelled",
        }
    }
}

/// The state machine for one document instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentLifecycle {
    document_type: DocumentType,
    state: DocumentState,
}

impl DocumentLifecycle {
    /// A freshly generated document.
    pub fn new(document_type: DocumentType) -> Self {
        Self {
            document_type,
            state: DocumentState::Generated,
        }
    }

    pub fn state(&self) -> &DocumentState {
        &self.state
    }

    pub fn document_type(&self) -> DocumentType {
        self.document_type
    }

    fn invalid(&self, action: &'static str) -> LifecycleError {
        LifecycleError::InvalidTransition {
            state: self.state.name(),
            action,
        }
    }

    /// Record the signature.
    pub fn mark_signed(&mut self, signed_at: Timestamp) -> Result<(), LifecycleError> {
        match self.state {
            DocumentState::Generated => {
                self.state = DocumentState::Signed { signed_at };
                Ok(())
            }
            _ => Err(self.invalid("sign")),
        }
    }

    /// Record transmission: `immediate` for a synchronous submit, pending
    /// for batch acceptance.
    pub fn mark_transmitted(&mut self, immediate: bool) -> Result<(), LifecycleError> {
        match self.state {
            DocumentState::Signed { .. } => {
                self.state = if immediate {
                    DocumentState::TransmittedImmediate
                } else {
                    DocumentState::TransmittedPending
                };
                Ok(())
            }
            _ => Err(self.invalid("transmit")),
        }
    }

    /// Record the authority's verdict.
    pub fn mark_outcome(
        &mut self,
        code: u16,
        approved_at: Timestamp,
    ) -> Result<(), LifecycleError> {
        match self.state {
            DocumentState::TransmittedPending | DocumentState::TransmittedImmediate => {
                self.state = match crate::classifier::classify(code) {
                    crate::classifier::CodeClass::Approved => {
                        DocumentState::Approved { approved_at }
                    }
                    crate::classifier::CodeClass::ApprovedWithObservation => {
                        DocumentState::ApprovedWithObservation { approved_at }
                    }
                    crate::classifier::CodeClass::Rejected(_) => DocumentState::Rejected {
                        code,
                        reemit_required: crate::classifier::requires_reemit(code),
                    },
                };
                Ok(())
            }
            _ => Err(self.invalid("record an outcome for")),
        }
    }

    /// Instant after which cancellation is no longer possible, if the
    /// document is in an approved state.
    pub fn cancellation_deadline(&self) -> Option<Timestamp> {
        let approved_at = match self.state {
            DocumentState::Approved { approved_at }
            | DocumentState::ApprovedWithObservation { approved_at } => approved_at,
            _ => return None,
        };
        let hours = if self.document_type == DocumentType::Invoice {
            INVOICE_CANCEL_HOURS
        } else {
            OTHER_CANCEL_HOURS
        };
        Some(approved_at.plus_hours(hours))
    }

    /// Cancel an approved document. The deadline boundary is inclusive.
    pub fn cancel(&mut self, now: Timestamp) -> Result<(), LifecycleError> {
        let deadline = self
            .cancellation_deadline()
            .ok_or_else(|| self.invalid("cancel"))?;
        if now.since(deadline) > Duration::zero() {
            return Err(LifecycleError::CancellationWindowClosed { deadline });
        }
        self.state = DocumentState::Cancelled { cancelled_at: now };
        Ok(())
    }
}
