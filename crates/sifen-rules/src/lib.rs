//! # sifen-rules — Transmission Decision Rules
//!
//! The pure decision layer between the cryptographic core and the
//! transport: plazo window classification, the authority's response-code
//! taxonomy, the closed outcome set the invoicing layer consumes, and the
//! per-document lifecycle state machine.
//!
//! Nothing in this crate performs I/O or suspends; every function here is
//! deterministic given its arguments, which keeps the transport layer's
//! policy decisions testable without a network or a real clock.

pub mod classifier;
pub mod lifecycle;
pub mod outcome;
pub mod window;

pub use classifier::{Action, Category, Classification, CodeClass};
pub use lifecycle::{DocumentLifecycle, DocumentState, LifecycleError};
pub use outcome::Outcome;
pub use window::{RejectReason, WindowClass};
