//! Scheduler contract, reference scheduler, and Crash Recovery (§4.3, §4.4).
//!
//! This crate is the one place in the workspace that is explicitly *not*
//! the full picture: §4.3 describes the Scheduler as an external
//! collaborator, and actual handler dispatch (running user script bodies,
//! calling tools, deciding which workflow gets the next session) is out of
//! this core's scope per §1. What lives here is the slice the spec does
//! pin down — eligibility (`can_schedule`), the pending-retry handoff
//! (`drive_pending_retries`), Crash Recovery's four startup steps, runtime
//! configuration, and a read-only admin surface over persisted state —
//! plus the reference in-memory wiring (`Runtime`) that `exec-reconcile`'s
//! and `exec-emm`'s own test suites use as a worked example of how the
//! pieces compose end to end.

mod admin;
mod config;
mod error;
mod recovery;
mod scheduler;

pub use admin::{routes, AppState, HealthResponse};
pub use config::{Config, ConfigError};
pub use error::{RecoveryError, SchedulerError};
pub use recovery::{Recovery, RecoverySummary};
pub use scheduler::Scheduler;

use std::sync::Arc;

use exec_emm::Emm;
use exec_reconcile::{ProbeRegistry, ReconciliationEngine};
use exec_store::Store;

/// Wires one `Store` to the `Emm`, `Scheduler`, `Recovery`, and
/// `ReconciliationEngine` that share it (§2's control-flow summary, in
/// struct form). A binary entrypoint builds one of these from `Config`
/// and a concrete `Store`, runs `Recovery::run` once, then starts the
/// scheduler/reconciliation loops; tests build one directly over
/// `exec_store::InMemoryStore` to exercise the full stack without a
/// database.
#[derive(Clone)]
pub struct Runtime {
    pub store: Arc<dyn Store>,
    pub emm: Emm,
}

impl Runtime {
    pub fn new(store: Arc<dyn Store>) -> Self {
        let emm = Emm::new(store.clone());
        Self { store, emm }
    }

    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(self.store.clone(), self.emm.clone())
    }

    pub fn recovery(&self) -> Recovery {
        Recovery::new(self.store.clone(), self.emm.clone())
    }

    pub fn reconciliation_engine(&self, registry: ProbeRegistry) -> ReconciliationEngine {
        ReconciliationEngine::new(self.store.clone(), self.emm.clone(), registry)
    }

    pub fn admin_state(&self) -> AppState {
        AppState { store: self.store.clone() }
    }
}
