//! Governance observability.
//!
//! - [`GovernanceAccounting`]: lock-free counters for admission, termination,
//!   liveness, and token validation
//!
//! Structured logging goes through [`crate::tracing_compat`]; the diagnostic
//! dumps and text report live in [`crate::spawn`].

pub mod accounting;

pub use accounting::{AccountingSnapshot, GovernanceAccounting, VALIDATION_THRESHOLD};
