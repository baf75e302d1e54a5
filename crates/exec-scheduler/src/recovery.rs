use std::sync::Arc;

use exec_emm::Emm;
use exec_model::{MutationStatus, RunStatus, WorkflowRecord};
use exec_store::{run_tx, Store};
use tracing::{error, info, instrument, warn};

use crate::error::RecoveryError;

/// Counts of what each recovery step did, returned from [`Recovery::run`] so
/// a startup binary has something to log without re-deriving it from the
/// individual step calls.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoverySummary {
    pub runs_recovered: usize,
    pub sessions_finished: usize,
    pub workflows_in_maintenance: usize,
    pub orphaned_reservations: usize,
}

/// Runs the four startup recovery steps of §4.4, in order, before the
/// Scheduler and Reconciliation Engine are allowed to resume. Every write
/// goes through [`Emm`]; this struct only ever reads the Store directly to
/// decide what to classify a row as.
pub struct Recovery {
    store: Arc<dyn Store>,
    emm: Emm,
}

impl Recovery {
    pub fn new(store: Arc<dyn Store>, emm: Emm) -> Self {
        Self { store, emm }
    }

    /// Runs all four recovery steps and returns their combined counts. A
    /// failure in one step surfaces instead of silently continuing —
    /// unlike a single step's per-row handling, there is no sound partial
    /// state to resume the Scheduler into if, say, listing workflows itself
    /// fails.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<RecoverySummary, RecoveryError> {
        info!("starting crash recovery");
        let runs_recovered = self.recover_crashed_runs().await?;
        let sessions_finished = self.recover_unfinished_sessions().await?;
        let workflows_in_maintenance = self.recover_maintenance_mode().await?.len();
        let orphaned_reservations = self.check_orphaned_reservations().await?;
        info!(
            runs_recovered,
            sessions_finished,
            workflows_in_maintenance,
            orphaned_reservations,
            "crash recovery complete"
        );
        Ok(RecoverySummary {
            runs_recovered,
            sessions_finished,
            workflows_in_maintenance,
            orphaned_reservations,
        })
    }

    /// §4.4 step 1. `get_incomplete_handler_runs` is exactly the set of
    /// runs still `active` — every other status-setting path through
    /// `update_handler_run_status` stamps `end_ts`, so a null `end_ts` and
    /// `status == active` coincide.
    #[instrument(skip(self))]
    pub async fn recover_crashed_runs(&self) -> Result<usize, RecoveryError> {
        let runs = run_tx(&*self.store, |tx| {
            Box::pin(async move { tx.get_incomplete_handler_runs().await })
        })
        .await?;

        let mut recovered = 0;
        for run in runs {
            if run.status != RunStatus::Active {
                continue;
            }
            let target = self.classify_crashed_run(&run).await?;
            match self.emm.update_handler_run_status(run.id, target, None, None).await {
                Ok(_) => {
                    info!(run_id = %run.id, new_status = %target, "recovered crashed run");
                    recovered += 1;
                }
                Err(err) => {
                    warn!(run_id = %run.id, error = %err, "failed to recover crashed run");
                }
            }
        }
        Ok(recovered)
    }

    /// `mutating` with no recorded outcome and an in-flight/needs-reconcile
    /// mutation means the call may or may not have landed — route to
    /// `paused:reconciliation` so the Reconciliation Engine picks it up.
    /// Everything else (including any producer run, which has no mutate
    /// phase at all) is an unambiguous crash.
    async fn classify_crashed_run(&self, run: &exec_model::HandlerRun) -> Result<RunStatus, RecoveryError> {
        if !run.is_consumer() || run.phase != "mutating" || run.mutation_outcome.is_some() {
            return Ok(RunStatus::Crashed);
        }
        let run_id = run.id;
        let mutation = run_tx(&*self.store, |tx| {
            Box::pin(async move { tx.get_mutation_by_run_id(run_id).await })
        })
        .await?;
        match mutation {
            Some(m) if matches!(m.status, MutationStatus::InFlight | MutationStatus::NeedsReconcile) => {
                Ok(RunStatus::PausedReconciliation)
            }
            _ => Ok(RunStatus::Crashed),
        }
    }

    /// §4.4 step 2. Step 1 already moved every surviving `active` run to a
    /// terminal status, so a session whose runs are all `committed` here is
    /// exactly the happy-path case the scheduler's own `finishSession`
    /// follow-up missed before the crash; sessions with any
    /// failed/paused/crashed run were already finalized by `EMM` when that
    /// run's status was written.
    #[instrument(skip(self))]
    pub async fn recover_unfinished_sessions(&self) -> Result<usize, RecoveryError> {
        let sessions = run_tx(&*self.store, |tx| {
            Box::pin(async move { tx.get_active_sessions().await })
        })
        .await?;

        let mut recovered = 0;
        for session in sessions {
            let session_id = session.id;
            let runs = run_tx(&*self.store, |tx| {
                Box::pin(async move { tx.get_handler_runs_by_session(session_id).await })
            })
            .await?;
            if !runs.iter().all(|r| r.status == RunStatus::Committed) {
                continue;
            }
            match self.emm.finish_session(session_id).await {
                Ok(_) => {
                    info!(session_id = %session_id, "recovered unfinished session");
                    recovered += 1;
                }
                Err(err) => {
                    warn!(session_id = %session_id, error = %err, "failed to recover unfinished session");
                }
            }
        }
        Ok(recovered)
    }

    /// §4.4 step 3. This crate has no maintainer-task scheduler of its own
    /// (that lives in the external system per §1) — recovery only surfaces
    /// the list so the surrounding system can create one.
    #[instrument(skip(self))]
    pub async fn recover_maintenance_mode(&self) -> Result<Vec<WorkflowRecord>, RecoveryError> {
        let workflows = run_tx(&*self.store, |tx| Box::pin(async move { tx.list_workflows().await })).await?;
        let surfaced: Vec<_> = workflows.into_iter().filter(|w| w.maintenance).collect();
        for workflow in &surfaced {
            warn!(workflow_id = %workflow.id, "workflow in maintenance mode; surfacing for maintainer task creation");
        }
        Ok(surfaced)
    }

    /// §4.4 step 4. A reserved event whose owning run is neither `active`
    /// nor the workflow's own `pending_retry_run_id` has no run left that
    /// could ever commit or release it — that's a bug, not a recoverable
    /// state, so this only logs loudly and counts; it never calls
    /// `release_events` itself.
    #[instrument(skip(self))]
    pub async fn check_orphaned_reservations(&self) -> Result<usize, RecoveryError> {
        let reserved = run_tx(&*self.store, |tx| {
            Box::pin(async move { tx.get_all_reserved_events().await })
        })
        .await?;

        let mut orphaned = 0;
        for event in reserved {
            let Some(run_id) = event.reserved_by_run_id else {
                continue;
            };
            let run = run_tx(&*self.store, |tx| Box::pin(async move { tx.get_handler_run(run_id).await })).await?;
            let workflow_id = run.workflow_id;
            let workflow = run_tx(&*self.store, |tx| Box::pin(async move { tx.get_workflow(workflow_id).await })).await?;

            let is_pending_retry = workflow.pending_retry_run_id == Some(run.id);
            if run.status != RunStatus::Active && !is_pending_retry {
                orphaned += 1;
                error!(
                    event_id = %event.id,
                    run_id = %run.id,
                    run_status = %run.status,
                    workflow_id = %workflow.id,
                    "orphaned event reservation: owning run is neither active nor the pending retry; not auto-releasing"
                );
            }
        }
        Ok(orphaned)
    }
}
