//! # sifen-core — Foundational Types for the SIFEN Transmission Core
//!
//! This crate is the bedrock of the SIFEN electronic-document stack. It
//! defines the type-system primitives every other crate builds on: validated
//! identifier newtypes, the UTC-only timestamp, and the CDC control-code
//! codec. Every other crate in the workspace depends on `sifen-core`; it
//! depends on nothing internal.
//!
//! ## Key Design Principles
//!
//! 1. **Newtype wrappers for document facts.** `Ruc`, `Establishment`,
//!    `ExpeditionPoint`, `DocumentNumber`, `SecurityCode` — all newtypes with
//!    validated constructors. No bare strings for fixed-width digit fields.
//!
//! 2. **`Cdc` has a private inner field.** The only ways to obtain a control
//!    code are `Cdc::compute()` over validated facts or `Cdc::parse()`, which
//!    re-verifies the mod-11 check digit. A `Cdc` in hand is always valid.
//!
//! 3. **UTC-only timestamps.** `Timestamp` enforces UTC with Z suffix and
//!    seconds precision — the plazo window arithmetic never sees an offset.
//!
//! ## Crate Policy
//!
//! - No dependencies on other `sifen-*` crates (this is the leaf of the DAG).
//! - No `unsafe` code.
//! - No `panic!()` or `.unwrap()` outside tests.
//! - All public types derive `Debug`, `Clone`, and implement
//!   `Serialize`/`Deserialize`.

pub mod cdc;
pub mod error;
pub mod identity;
pub mod temporal;

// Re-export primary types for ergonomic imports.
pub use cdc::{Cdc, CdcFacts};
pub use error::{CdcError, IdentityError, SifenError};
pub use identity::{
    DocumentNumber, DocumentType, EmissionMode, Establishment, ExpeditionPoint, Ruc, SecurityCode,
    TaxpayerType,
};
pub use temporal::Timestamp;
