//! Shared data model for the durable execution core.
//!
//! This crate has no behavior of its own — it is the vocabulary every other
//! `exec-*` crate shares: the persistent entities of the Durable Execution
//! Model (handler run, event, mutation, session, the system-owned slice of
//! workflow) and the enums that encode their phase/status/outcome lattices.
//!
//! Types here are intentionally dumb. Invariant enforcement lives in
//! `exec-emm`; this crate only guarantees that invalid *representations*
//! (e.g. a phase string that doesn't round-trip) can't be constructed.

mod error;
mod event;
mod handler_run;
mod mutation;
mod phase;
mod session;
mod status;
mod workflow;

pub use error::ModelError;
pub use event::{Event, EventReservation, EventStatus};
pub use handler_run::{HandlerRun, HandlerType, PrepareResult};
pub use mutation::{Mutation, MutationStatus, ResolvedBy};
pub use phase::{ConsumerPhase, PhaseKind, ProducerPhase};
pub use session::{Session, SessionDisposition};
pub use status::{MutationOutcome, RunStatus};
pub use workflow::WorkflowRecord;
