//! The Execution Model Manager: the single writer to the Store (§4.1).
//!
//! Every public method here is one call to [`exec_store::run_tx`] — it
//! either fully applies or leaves no trace. Concurrent callers (the
//! scheduler, the reconciliation engine, recovery) never touch the Store
//! directly; they only ever go through an `Emm`.

mod boundary;
mod emm;
mod error;

pub use boundary::{classify, MutationBoundary};
pub use emm::Emm;
pub use error::EmmError;
