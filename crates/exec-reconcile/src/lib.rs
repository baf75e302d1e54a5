//! Reconciliation Engine: resolves mutations whose outcome wasn't known
//! synchronously (§4.2).
//!
//! Handlers report `needs_reconcile` when a side-effect call times out or
//! the process crashes mid-call; this crate is what eventually turns that
//! into `applied` or `failed` by polling a registered [`MutationProbe`].

mod backoff;
mod engine;
mod probe;
mod registry;

pub use backoff::BackoffPolicy;
pub use engine::ReconciliationEngine;
pub use probe::{MutationProbe, ProbeError, ProbeOutcome};
pub use registry::ProbeRegistry;
