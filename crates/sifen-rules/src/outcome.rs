//! # Closed Outcome Set
//!
//! The only result surface the invoicing layer ever sees. Every transport
//! response, retry exhaustion, and contingency capture collapses into one
//! of these five variants, so callers write one exhaustive match and the
//! compiler flags any future addition.

use serde::{Deserialize, Serialize};

use crate::classifier::{self, Action, CodeClass};

/// Final disposition of one transmission as reported to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    /// Accepted cleanly; the authority assigned a transaction number.
    Approved {
        transaction_id: String,
    },
    /// Accepted late; carries the authority's observation text.
    ApprovedWithObservation {
        transaction_id: String,
        observation: String,
    },
    /// Rejected with no recovery path for this document instance.
    RejectedFatal {
        code: u16,
        message: String,
    },
    /// Rejected; the control code must be abandoned and the document
    /// re-emitted (or corrected and resent) under a fresh one.
    RejectedReemit {
        code: u16,
        message: String,
    },
    /// The authority was unreachable; the signed document is held in the
    /// contingency ledger for replay.
    PendingContingency,
}

impl Outcome {
    /// Build an outcome from an authority response code.
    pub fn from_response(code: u16, transaction_id: String, message: String) -> Self {
        match classifier::classify(code) {
            CodeClass::Approved => Outcome::Approved { transaction_id },
            CodeClass::ApprovedWithObservation => Outcome::ApprovedWithObservation {
                transaction_id,
                observation: message,
            },
            CodeClass::Rejected(c) => match c.action {
                Action::Reemit | Action::CorrectAndResend => {
                    Outcome::RejectedReemit { code, message }
                }
                Action::AcceptWithObservation => Outcome::ApprovedWithObservation {
                    transaction_id,
                    observation: message,
                },
                Action::Fatal => Outcome::RejectedFatal { code, message },
            },
        }
    }

    /// Whether the authority accepted the document.
    pub fn is_approved(&self) -> bool {
        matches!(
            self,
            Outcome::Approved { .. } | Outcome::ApprovedWithObservation { .. }
        )
    }

    /// Whether this outcome ends the document instance's lifecycle. Only a
    /// contingency hold leaves the document pending.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Outcome::PendingContingency)
    }
}
