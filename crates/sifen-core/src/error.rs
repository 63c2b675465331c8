//! # Error Types — Structured Error Hierarchy
//!
//! Defines the error types shared across the SIFEN stack. All errors use
//! `thiserror` for derive-based `Display` and `Error` implementations.
//!
//! ## Design
//!
//! - Identifier validation errors name the offending field and the expected
//!   digit pattern.
//! - Control-code errors distinguish malformed input from a failed check
//!   digit — a parse that fails the mod-11 check is reported as such, never
//!   as a generic format error.
//! - No variant ever carries key material or a full document payload.

use thiserror::Error;

/// Top-level error type for the SIFEN stack.
#[derive(Error, Debug)]
pub enum SifenError {
    /// An identifier field failed validation.
    #[error("identity error: {0}")]
    Identity(#[from] IdentityError),

    /// Control-code computation or validation failed.
    #[error("control code error: {0}")]
    Cdc(#[from] CdcError),

    /// Timestamp parsing or arithmetic failed.
    #[error("temporal error: {0}")]
    Temporal(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error validating a fixed-width identifier field.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    /// A digit field has the wrong width or contains non-digits.
    #[error("{field} must be exactly {width} digits, got {value:?}")]
    MalformedDigits {
        /// The name of the offending field.
        field: &'static str,
        /// Required width in digits.
        width: usize,
        /// The rejected input.
        value: String,
    },

    /// A document-type code is not one of the five electronic document kinds.
    #[error("unknown document type code: {0:?}")]
    UnknownDocumentType(String),

    /// An emission-mode digit is not 1 (normal) or 2 (contingency).
    #[error("unknown emission mode digit: {0:?}")]
    UnknownEmissionMode(String),

    /// A taxpayer-type digit is not 1 (natural person) or 2 (legal entity).
    #[error("unknown taxpayer type digit: {0:?}")]
    UnknownTaxpayerType(String),
}

/// Error computing or validating a CDC control code.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CdcError {
    /// Input facts contain an out-of-range field.
    #[error("malformed facts: {0}")]
    MalformedFacts(#[from] IdentityError),

    /// A candidate control code is not exactly 44 ASCII digits.
    #[error("control code must be 44 digits, got {len} characters")]
    MalformedCode {
        /// Length of the rejected candidate.
        len: usize,
    },

    /// The 44th digit does not match the mod-11 digest of the first 43.
    #[error("check digit mismatch: expected {expected}, found {found}")]
    CheckDigitMismatch {
        /// Digit the mod-11 digest produces.
        expected: u8,
        /// Digit present in the candidate.
        found: u8,
    },
}
