//! # Response-Code Taxonomy
//!
//! The static mapping from the authority's four-digit response codes to a
//! classification the transport layer can act on. This table is the single
//! source of truth: the transmission client and the batch orchestrator both
//! consult it and never interpret raw codes themselves.
//!
//! Documented ranges:
//!
//! | Range     | Category    | Retryable | Action                    |
//! |-----------|-------------|-----------|---------------------------|
//! | 0160-0199 | Connection  | yes       | Fatal (once retries stop) |
//! | 0260      | approval    | —         | —                         |
//! | 0261      | approval with observation (extemporaneous)            |
//! | 0300-0399 | Schema      | no        | CorrectAndResend          |
//! | 0400-0499 | Certificate | no        | Fatal                     |
//! | 0500-0599 | Signature   | no        | Fatal                     |
//! | 0700-0799 | Business    | no        | CorrectAndResend          |
//! | 0800-0899 | Business    | no        | Reemit                    |
//! | 0900-0999 | Temporal    | no        | Reemit                    |
//!
//! ## Invariant
//!
//! [`classify()`] is exhaustive: every `u16` maps to something, and any
//! code outside the documented ranges maps to `{Unknown, non-retryable,
//! Fatal}` rather than silently passing.

use serde::{Deserialize, Serialize};

/// Code for a clean approval.
pub const CODE_APPROVED: u16 = 260;

/// Code for approval with an extemporaneous-transmission observation.
pub const CODE_APPROVED_WITH_OBSERVATION: u16 = 261;

/// Which layer of the protocol a rejection code belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    /// Transient transport or service faults.
    Connection,
    /// The payload failed schema validation; a defect in document assembly.
    Schema,
    /// The signing certificate was rejected.
    Certificate,
    /// The XML signature failed validation.
    Signature,
    /// A business rule rejected the document's content.
    Business,
    /// The transmission fell outside the acceptance windows.
    Temporal,
    /// A code outside every documented range.
    Unknown,
}

/// What the caller must do about a rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    /// Abandon this control code and emit a fresh document.
    Reemit,
    /// Regenerate the document with corrected facts and a new control code.
    CorrectAndResend,
    /// The document was accepted; record the observation.
    AcceptWithObservation,
    /// Terminal for this document instance.
    Fatal,
}

/// Classification of one rejection code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub category: Category,
    pub retryable: bool,
    pub action: Action,
}

/// The full disposition of a response code, approvals included.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CodeClass {
    /// Clean approval.
    Approved,
    /// Accepted, flagged for extemporaneous transmission.
    ApprovedWithObservation,
    /// Rejected; the classification says how to proceed.
    Rejected(Classification),
}

impl CodeClass {
    pub fn is_approval(self) -> bool {
        matches!(
            self,
            CodeClass::Approved | CodeClass::ApprovedWithObservation
        )
    }
}

const fn rejected(category: Category, retryable: bool, action: Action) -> CodeClass {
    CodeClass::Rejected(Classification {
        category,
        retryable,
        action,
    })
}

/// Map a response code to its disposition.
pub fn classify(code: u16) -> CodeClass {
    match code {
        CODE_APPROVED => CodeClass::Approved,
        CODE_APPROVED_WITH_OBSERVATION => CodeClass::ApprovedWithObservation,
        160..=199 => rejected(Category::Connection, true, Action::Fatal),
        300..=399 => rejected(Category::Schema, false, Action::CorrectAndResend),
        400..=499 => rejected(Category::Certificate, false, Action::Fatal),
        500..=599 => rejected(Category::Signature, false, Action::Fatal),
        700..=799 => rejected(Category::Business, false, Action::CorrectAndResend),
        800..=899 => rejected(Category::Business, false, Action::Reemit),
        900..=999 => rejected(Category::Temporal, false, Action::Reemit),
        _ => rejected(Category::Unknown, false, Action::Fatal),
    }
}

/// Whether a rejection code allows abandoning the control code and
/// re-emitting under a fresh one.
pub fn requires_reemit(code: u16) -> bool {
    matches!(
        classify(code),
        CodeClass::Rejected(Classification {
            action: Action::Reemit,
            ..
        })
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    // -- approvals --------------------------------------------------------------

    #[test]
    fn approval_codes() {
        assert_eq!(classify(260), CodeClass::Approved);
        assert_eq!(classify(261), CodeClass::ApprovedWithObservation);
        assert!(classify(260).is_approval());
        assert!(classify(261).is_approval());
    }

    // -- documented ranges ------------------------------------------------------

    #[test]
    fn connection_codes_are_retryable() {
        for code in [160, 180, 199] {
            let CodeClass::Rejected(c) = classify(code) else {
                panic!("code {code} must reject");
            };
            assert_eq!(c.category, Category::Connection);
            assert!(c.retryable);
        }
    }

    #[test]
    fn schema_codes_demand_correction() {
        let CodeClass::Rejected(c) = classify(310) else {
            panic!("schema code must reject");
        };
        assert_eq!(c.category, Category::Schema);
        assert!(!c.retryable);
        assert_eq!(c.action, Action::CorrectAndResend);
    }

    #[test]
    fn certificate_and_signature_codes_are_fatal() {
        for (code, category) in [(420, Category::Certificate), (540, Category::Signature)] {
            let CodeClass::Rejected(c) = classify(code) else {
                panic!("code {code} must reject");
            };
            assert_eq!(c.category, category);
            assert!(!c.retryable);
            assert_eq!(c.action, Action::Fatal);
        }
    }

    #[test]
    fn business_range_splits_on_action() {
        let CodeClass::Rejected(low) = classify(750) else {
            panic!()
        };
        assert_eq!(low.action, Action::CorrectAndResend);
        let CodeClass::Rejected(high) = classify(850) else {
            panic!()
        };
        assert_eq!(high.action, Action::Reemit);
        assert_eq!(low.category, Category::Business);
        assert_eq!(high.category, Category::Business);
    }

    #[test]
    fn temporal_rejection_requires_reemission() {
        let CodeClass::Rejected(c) = classify(950) else {
            panic!()
        };
        assert_eq!(c.category, Category::Temporal);
        assert!(requires_reemit(950));
    }

    // -- unknown codes ----------------------------------------------------------

    #[test]
    fn unknown_codes_default_to_fatal() {
        for code in [0, 159, 200, 259, 262, 299, 600, 699, 1000, 9999, u16::MAX] {
            let CodeClass::Rejected(c) = classify(code) else {
                panic!("code {code} must not pass silently");
            };
            assert_eq!(c.category, Category::Unknown);
            assert!(!c.retryable);
            assert_eq!(c.action, Action::Fatal);
        }
    }

    proptest! {
        #[test]
        fn prop_only_connection_codes_retry(code in any::<u16>()) {
            if let CodeClass::Rejected(c) = classify(code) {
                if c.retryable {
                    prop_assert_eq!(c.category, Category::Connection);
                }
            }
        }

        #[test]
        fn prop_only_two_codes_approve(code in any::<u16>()) {
            if classify(code).is_approval() {
                prop_assert!(code == 260 || code == 261);
            }
        }
    }
}
