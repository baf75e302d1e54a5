use std::sync::Arc;

use exec_emm::Emm;
use exec_model::{HandlerRun, WorkflowRecord};
use exec_store::{run_tx, Store};
use tracing::{info, instrument, warn};

use crate::error::SchedulerError;

/// The four boundary obligations of §4.3/§6.3. Actually dispatching a
/// handler's body is an out-of-scope external collaborator (§1) — this
/// crate has no handler executor — so `Scheduler` only implements the part
/// of the contract the core itself owns: eligibility and the
/// `pending_retry_run_id` handoff, both driven exclusively through `Emm`.
pub struct Scheduler {
    store: Arc<dyn Store>,
    emm: Emm,
}

impl Scheduler {
    pub fn new(store: Arc<dyn Store>, emm: Emm) -> Self {
        Self { store, emm }
    }

    /// Whether `workflow` may have a new run dispatched for it right now
    /// (§4.3, first two bullets). A caller — the external dispatcher that
    /// owns handler execution — must check this before creating any new
    /// handler run for the workflow.
    pub fn can_schedule(workflow: &WorkflowRecord) -> bool {
        if workflow.status == "paused" {
            return false;
        }
        if workflow.error.as_ref().is_some_and(|e| !e.is_empty()) {
            return false;
        }
        true
    }

    /// §4.3's third bullet: for every workflow with a `pending_retry_run_id`
    /// and no blocking error, creates the replacement run and hands it back
    /// to the caller to drive from `emitting`. Read-only against the Store
    /// beyond that — the retry run itself is created by `Emm::create_retry_run`,
    /// never written here directly (the fourth bullet).
    ///
    /// A retry is a new dispatch, not a continuation of the failed run's own
    /// session: by the time `pending_retry_run_id` is set, the failed run's
    /// status write already ran `finalize_session_on_run_exit` and stamped
    /// that session terminal (§4.1.2). Creating the retry into that same,
    /// already-`Failed` session would put an `active` run in a session with
    /// `end_ts` set, violating invariant 5 / testable property 5. So this
    /// opens a fresh session per workflow (glossary: "one scheduler
    /// dispatch") and hands that id to `create_retry_run`; the caller
    /// finishes it once the retry run commits, same as any other session.
    #[instrument(skip(self))]
    pub async fn drive_pending_retries(&self) -> Result<Vec<HandlerRun>, SchedulerError> {
        let workflows = run_tx(&*self.store, |tx| Box::pin(async move { tx.list_workflows().await })).await?;

        let mut created = Vec::new();
        for workflow in workflows {
            let Some(failed_run_id) = workflow.pending_retry_run_id else {
                continue;
            };
            if !Self::can_schedule(&workflow) {
                continue;
            }

            let workflow_id = workflow.id;
            let session = run_tx(&*self.store, |tx| {
                Box::pin(async move { tx.start_session(workflow_id).await })
            })
            .await?;

            match self.emm.create_retry_run(failed_run_id, session.id).await {
                Ok(run) => {
                    info!(workflow_id = %workflow.id, failed_run_id = %failed_run_id, session_id = %session.id, retry_run_id = %run.id, "created retry run");
                    created.push(run);
                }
                Err(err) => {
                    warn!(workflow_id = %workflow.id, failed_run_id = %failed_run_id, error = %err, "failed to create retry run");
                }
            }
        }
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workflow(status: &str, error: Option<&str>) -> WorkflowRecord {
        WorkflowRecord {
            id: uuid::Uuid::now_v7(),
            status: status.to_string(),
            error: error.map(str::to_string),
            maintenance: false,
            pending_retry_run_id: None,
        }
    }

    #[test]
    fn paused_workflow_cannot_be_scheduled() {
        assert!(!Scheduler::can_schedule(&workflow("paused", None)));
    }

    #[test]
    fn blocked_workflow_cannot_be_scheduled() {
        assert!(!Scheduler::can_schedule(&workflow("active", Some("boom"))));
    }

    #[test]
    fn active_workflow_with_no_error_can_be_scheduled() {
        assert!(Scheduler::can_schedule(&workflow("active", None)));
        assert!(Scheduler::can_schedule(&workflow("active", Some(""))));
    }
}
