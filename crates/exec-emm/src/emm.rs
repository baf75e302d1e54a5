use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::instrument;
use uuid::Uuid;

use exec_model::{
    ConsumerPhase, HandlerRun, Mutation, MutationOutcome, MutationStatus, PhaseKind, PrepareResult,
    ProducerPhase, ResolvedBy, RunStatus, Session, SessionDisposition, WorkflowRecord,
};
use exec_store::{run_tx, HandlerRunFields, MutationFields, NewHandlerRun, Store, StoreTx, WorkflowFields};

use crate::boundary::{classify, MutationBoundary};
use crate::error::EmmError;

fn parse_consumer_phase(s: &str) -> Result<ConsumerPhase, EmmError> {
    serde_json::from_value(serde_json::Value::String(s.to_string()))
        .map_err(|_| EmmError::Invariant(format!("unrecognized consumer phase: {s}")))
}

fn parse_producer_phase(s: &str) -> Result<ProducerPhase, EmmError> {
    serde_json::from_value(serde_json::Value::String(s.to_string()))
        .map_err(|_| EmmError::Invariant(format!("unrecognized producer phase: {s}")))
}

fn phase_str(phase: impl serde::Serialize) -> String {
    match serde_json::to_value(phase) {
        Ok(serde_json::Value::String(s)) => s,
        _ => unreachable!("phase enums always serialize to a string"),
    }
}

/// The exact edges §4.1.3 names for a consumer run. Rank strictly
/// increasing isn't enough on its own — it would also accept e.g.
/// `preparing -> mutating`, skipping the reservation step that makes a
/// mutate phase meaningful. Listing edges explicitly is what the spec's
/// table actually describes.
fn consumer_edge_allowed(current: ConsumerPhase, new_phase: ConsumerPhase) -> bool {
    use ConsumerPhase::*;
    matches!(
        (current, new_phase),
        (Pending, Preparing)
            | (Preparing, Prepared)
            | (Prepared, Mutating)
            | (Prepared, Emitting)
            | (Mutating, Mutated)
            | (Mutated, Emitting)
    )
}

fn producer_edge_allowed(current: ProducerPhase, new_phase: ProducerPhase) -> bool {
    matches!((current, new_phase), (ProducerPhase::Pending, ProducerPhase::Executing))
}

/// The exact non-terminal edges §4.1.9 names: `pending -> in_flight`,
/// `in_flight -> {needs_reconcile, indeterminate}`, `needs_reconcile ->
/// indeterminate`. Listed explicitly rather than by rank, same reasoning
/// as `consumer_edge_allowed` — e.g. `pending -> indeterminate` skips the
/// in-flight attempt the status is meant to record ever having happened.
fn mutation_edge_allowed(current: MutationStatus, new_status: MutationStatus) -> bool {
    use MutationStatus::*;
    matches!(
        (current, new_status),
        (Pending, InFlight) | (InFlight, NeedsReconcile) | (InFlight, Indeterminate) | (NeedsReconcile, Indeterminate)
    )
}

/// Releases or preserves a consumer run's reserved events per §4.1.1, and
/// reports the workflow-error message the Indeterminate row forces
/// (`None` for the other two rows, which don't dictate one).
async fn apply_mutation_boundary(tx: &mut dyn StoreTx, run: &HandlerRun) -> Result<Option<String>, EmmError> {
    let phase = parse_consumer_phase(&run.phase)?;
    match classify(phase, run.mutation_outcome) {
        MutationBoundary::PreMutation => {
            tx.release_events(run.id).await?;
            Ok(None)
        }
        MutationBoundary::Indeterminate => {
            tx.update_workflow_fields(
                run.workflow_id,
                WorkflowFields {
                    pending_retry_run_id: Some(Some(run.id)),
                    ..Default::default()
                },
            )
            .await?;
            Ok(Some("Mutation outcome uncertain".to_string()))
        }
        MutationBoundary::PostMutation => {
            tx.update_workflow_fields(
                run.workflow_id,
                WorkflowFields {
                    pending_retry_run_id: Some(Some(run.id)),
                    ..Default::default()
                },
            )
            .await?;
            Ok(None)
        }
    }
}

/// Closes out a session abnormally (§4.1.2: "finalizes the session with
/// aggregated cost and terminal disposition" for any non-`committed`
/// status write). `run` is folded into the session's running cost total
/// here because, unlike a normal commit, a run that never reaches
/// `committed` never goes through `increment_handler_count` itself.
/// A no-op if the session is already closed — a sibling run's earlier
/// failure may have finalized it first.
async fn finalize_session_on_run_exit(tx: &mut dyn StoreTx, run: &HandlerRun) -> Result<(), EmmError> {
    let session = tx.get_session(run.session_id).await?;
    if !session.is_open() {
        return Ok(());
    }
    tx.increment_handler_count(run.session_id, run.cost).await?;
    tx.finish_session(run.session_id, SessionDisposition::Failed).await?;
    Ok(())
}

/// The single writer to the Store (§4.1, §5). Holds the Store behind an
/// `Arc<dyn Store>` so the scheduler, the reconciliation engine, and tests
/// can all share one `Emm` without generic parameters leaking into every
/// call site — the same type-erasure the reference engine uses for its
/// workflow registry.
#[derive(Clone)]
pub struct Emm {
    store: Arc<dyn Store>,
}

impl Emm {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Generic status transition (§4.1.2): the one entry point that
    /// applies the mutation boundary, finalizes the session, flips
    /// `maintenance`, and writes `workflow.error` from the status table,
    /// all atomically. `commit_consumer`/`commit_producer` reach
    /// `RunStatus::Committed` through this same logic with the
    /// boundary/finalization/maintenance steps skipped, matching the
    /// table's `committed` row.
    #[instrument(skip(self), fields(run_id = %run_id, new_status = %new_status))]
    pub async fn update_handler_run_status(
        &self,
        run_id: Uuid,
        new_status: RunStatus,
        error: Option<String>,
        error_type: Option<String>,
    ) -> Result<HandlerRun, EmmError> {
        run_tx(&*self.store, |tx| {
            Box::pin(async move {
                let run = tx.get_handler_run(run_id).await?;
                if run.status == RunStatus::Committed {
                    return Err(EmmError::Invariant(format!(
                        "run {run_id} already committed, cannot change status"
                    )));
                }

                let is_commit = new_status == RunStatus::Committed;

                // Table 4.1.2's workflow.error column: `None` means leave
                // the field untouched, `Some(None)`/`Some(Some(_))` write it.
                let mut workflow_error: Option<Option<String>> = if is_commit {
                    None
                } else {
                    error
                        .clone()
                        .or_else(|| new_status.default_workflow_error().map(str::to_string))
                        .map(Some)
                };

                if !is_commit && run.is_consumer() {
                    if let Some(forced) = apply_mutation_boundary(tx, &run).await? {
                        let existing = workflow_error.and_then(|w| w);
                        workflow_error = Some(Some(existing.unwrap_or(forced)));
                    }
                }

                if new_status == RunStatus::FailedLogic {
                    tx.update_workflow_fields(
                        run.workflow_id,
                        WorkflowFields {
                            maintenance: Some(true),
                            ..Default::default()
                        },
                    )
                    .await?;
                }

                if let Some(write) = workflow_error {
                    tx.update_workflow_fields(
                        run.workflow_id,
                        WorkflowFields {
                            error: Some(write),
                            ..Default::default()
                        },
                    )
                    .await?;
                }

                let updated = tx
                    .update_handler_run(
                        run_id,
                        HandlerRunFields {
                            status: Some(new_status),
                            error: Some(error),
                            error_type: Some(error_type),
                            end_ts: Some(Some(Utc::now())),
                            ..Default::default()
                        },
                    )
                    .await?;

                if !is_commit {
                    finalize_session_on_run_exit(tx, &updated).await?;
                }

                Ok(updated)
            })
        })
        .await
    }

    /// Advances a consumer run's phase (§3, §4.1.3). Only the edges the
    /// spec names are legal; `committed` is rejected as a target
    /// (reachable only via `commit_consumer`); advancing into `prepared`
    /// requires a prepare result and reserves its events, persisting its
    /// `wake_at` to per-handler state; advancing out of `prepared` into
    /// `mutating` requires that result to hold at least one non-empty
    /// reservation (testable property 10); advancing `mutated ->
    /// emitting` is rejected when the mutation outcome was a failure
    /// (testable property 11).
    #[instrument(skip(self, prepare_result), fields(run_id = %run_id, new_phase = ?new_phase))]
    pub async fn update_consumer_phase(
        &self,
        run_id: Uuid,
        new_phase: ConsumerPhase,
        prepare_result: Option<PrepareResult>,
    ) -> Result<HandlerRun, EmmError> {
        run_tx(&*self.store, |tx| {
            Box::pin(async move {
                let run = tx.get_handler_run(run_id).await?;
                if !run.is_consumer() {
                    return Err(EmmError::Invariant(format!("run {run_id} is not a consumer run")));
                }
                let current = parse_consumer_phase(&run.phase)?;
                if new_phase.is_committed() {
                    return Err(EmmError::Invariant(
                        "committed is only reachable through commit_consumer".to_string(),
                    ));
                }
                if !consumer_edge_allowed(current, new_phase) {
                    return Err(EmmError::Invariant(format!(
                        "illegal consumer phase transition: {current:?} -> {new_phase:?}"
                    )));
                }

                if new_phase == ConsumerPhase::Prepared {
                    let pr = prepare_result
                        .as_ref()
                        .ok_or_else(|| EmmError::Invariant("prepared requires a prepare result".to_string()))?;
                    if !pr.reservations.is_empty() {
                        tx.reserve_events(run_id, &pr.reservations).await?;
                    }
                    tx.update_handler_wake_at(run_id, pr.wake_at).await?;
                }

                if current == ConsumerPhase::Prepared && new_phase == ConsumerPhase::Mutating {
                    let pr = run.prepare_result.as_ref().ok_or_else(|| {
                        EmmError::Invariant("mutating requires the prepare result recorded at prepared".to_string())
                    })?;
                    if !pr.has_nonempty_reservation() {
                        return Err(EmmError::Invariant(
                            "prepared -> mutating requires a non-empty reservation".to_string(),
                        ));
                    }
                }

                if current == ConsumerPhase::Mutated
                    && new_phase == ConsumerPhase::Emitting
                    && run.mutation_outcome == Some(MutationOutcome::Failure)
                {
                    return Err(EmmError::Invariant(
                        "mutated -> emitting is rejected when the mutation outcome is failure".to_string(),
                    ));
                }

                tx.update_handler_run_phase(run_id, &phase_str(new_phase)).await?;
                if prepare_result.is_some() {
                    tx.update_handler_run(
                        run_id,
                        HandlerRunFields {
                            prepare_result: Some(prepare_result),
                            ..Default::default()
                        },
                    )
                    .await?;
                }
                Ok(tx.get_handler_run(run_id).await?)
            })
        })
        .await
    }

    /// Advances a producer run's phase. Producers have no mutate phase and
    /// never reserve events, so there is no boundary logic to apply here.
    #[instrument(skip(self), fields(run_id = %run_id, new_phase = ?new_phase))]
    pub async fn update_producer_phase(
        &self,
        run_id: Uuid,
        new_phase: ProducerPhase,
    ) -> Result<HandlerRun, EmmError> {
        run_tx(&*self.store, |tx| {
            Box::pin(async move {
                let run = tx.get_handler_run(run_id).await?;
                if run.is_consumer() {
                    return Err(EmmError::Invariant(format!("run {run_id} is not a producer run")));
                }
                let current = parse_producer_phase(&run.phase)?;
                if new_phase.is_committed() {
                    return Err(EmmError::Invariant(
                        "committed is only reachable through commit_producer".to_string(),
                    ));
                }
                if !producer_edge_allowed(current, new_phase) {
                    return Err(EmmError::Invariant(format!(
                        "illegal producer phase transition: {current:?} -> {new_phase:?}"
                    )));
                }
                Ok(tx.update_handler_run_phase(run_id, &phase_str(new_phase)).await?)
            })
        })
        .await
    }

    /// Finalizes a consumer run (§4.1.5). Disposes of reserved events per
    /// the mutation boundary (rejecting an indeterminate outcome —
    /// testable property 9 via the `commit_consumer` boundary path),
    /// persists handler-private `state` under this run id if supplied,
    /// writes `output_state`, then performs the same status write
    /// `update_handler_run_status(committed)` would (no boundary, no
    /// session finalization — both already handled above), and finally
    /// bumps the session's running cost/handler count.
    #[instrument(skip(self, state, output_state), fields(run_id = %run_id))]
    pub async fn commit_consumer(
        &self,
        run_id: Uuid,
        state: Option<serde_json::Value>,
        output_state: Option<serde_json::Value>,
    ) -> Result<HandlerRun, EmmError> {
        run_tx(&*self.store, |tx| {
            Box::pin(async move {
                let run = tx.get_handler_run(run_id).await?;
                if !run.is_consumer() {
                    return Err(EmmError::Invariant(format!("run {run_id} is not a consumer run")));
                }
                if run.status == RunStatus::Committed {
                    return Err(EmmError::Invariant(format!("run {run_id} already committed")));
                }
                let current = parse_consumer_phase(&run.phase)?;
                if current.is_committed() {
                    return Err(EmmError::Invariant(format!("run {run_id} already committed")));
                }

                match classify(current, run.mutation_outcome) {
                    MutationBoundary::Indeterminate => {
                        return Err(EmmError::Invariant(format!(
                            "run {run_id} has an indeterminate mutation outcome; cannot commit until reconciled"
                        )));
                    }
                    MutationBoundary::PreMutation => {
                        tx.release_events(run_id).await?;
                    }
                    MutationBoundary::PostMutation => {
                        tx.consume_events(run_id).await?;
                    }
                }

                if let Some(s) = state {
                    tx.set_handler_state(run_id, s).await?;
                }

                tx.update_handler_run_phase(run_id, &phase_str(ConsumerPhase::Committed)).await?;
                let updated = tx
                    .update_handler_run(
                        run_id,
                        HandlerRunFields {
                            status: Some(RunStatus::Committed),
                            output_state: Some(output_state),
                            error: Some(None),
                            error_type: Some(None),
                            end_ts: Some(Some(Utc::now())),
                            ..Default::default()
                        },
                    )
                    .await?;
                tx.increment_handler_count(updated.session_id, updated.cost).await?;
                Ok(updated)
            })
        })
        .await
    }

    /// Finalizes a producer run (§4.1.6). As `commit_consumer`, minus
    /// event disposition (producers never reserve events); additionally
    /// schedules the producer's next wakeup.
    #[instrument(skip(self, state, output_state), fields(run_id = %run_id))]
    pub async fn commit_producer(
        &self,
        run_id: Uuid,
        state: Option<serde_json::Value>,
        output_state: Option<serde_json::Value>,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<HandlerRun, EmmError> {
        run_tx(&*self.store, |tx| {
            Box::pin(async move {
                let run = tx.get_handler_run(run_id).await?;
                if run.is_consumer() {
                    return Err(EmmError::Invariant(format!("run {run_id} is not a producer run")));
                }
                if run.status == RunStatus::Committed {
                    return Err(EmmError::Invariant(format!("run {run_id} already committed")));
                }
                let current = parse_producer_phase(&run.phase)?;
                if current.is_committed() {
                    return Err(EmmError::Invariant(format!("run {run_id} already committed")));
                }

                if let Some(s) = state {
                    tx.set_handler_state(run_id, s).await?;
                }
                tx.update_handler_wake_at(run_id, next_run_at).await?;

                tx.update_handler_run_phase(run_id, &phase_str(ProducerPhase::Committed)).await?;
                let updated = tx
                    .update_handler_run(
                        run_id,
                        HandlerRunFields {
                            status: Some(RunStatus::Committed),
                            output_state: Some(output_state),
                            error: Some(None),
                            error_type: Some(None),
                            end_ts: Some(Some(Utc::now())),
                            ..Default::default()
                        },
                    )
                    .await?;
                tx.increment_handler_count(updated.session_id, updated.cost).await?;
                Ok(updated)
            })
        })
        .await
    }

    /// Records a confirmed external side-effect (§4.1.7). Once a
    /// mutation reaches `applied` it is immutable (invariant 4); a
    /// second call on the same mutation is rejected, not silently
    /// ignored, so a handler or reconciler that reports success twice is
    /// caught rather than masked. Advances the owning run to `mutated`
    /// (unconditionally, possibly on a non-active run — §4.1.3) and
    /// clears `workflow.error`. Never touches run status, which is
    /// orthogonal and left to the caller.
    #[instrument(skip(self, result), fields(mutation_id = %mutation_id, resolved_by = ?resolved_by))]
    pub async fn apply_mutation(
        &self,
        mutation_id: Uuid,
        result: serde_json::Value,
        resolved_by: Option<ResolvedBy>,
    ) -> Result<Mutation, EmmError> {
        run_tx(&*self.store, |tx| {
            Box::pin(async move {
                let mutation = tx.get_mutation(mutation_id).await?;
                if mutation.status.is_terminal() {
                    return Err(EmmError::Invariant(format!(
                        "mutation {mutation_id} already terminal ({:?})",
                        mutation.status
                    )));
                }
                let run = tx.get_handler_run(mutation.handler_run_id).await?;
                if !run.is_consumer() {
                    return Err(EmmError::Invariant(format!(
                        "mutation {mutation_id} belongs to a non-consumer run"
                    )));
                }

                let updated_mutation = tx
                    .update_mutation(
                        mutation_id,
                        MutationFields {
                            status: Some(MutationStatus::Applied),
                            result: Some(Some(result)),
                            resolved_by: Some(resolved_by),
                            resolved_at: Some(Some(Utc::now())),
                            ..Default::default()
                        },
                    )
                    .await?;
                tx.update_handler_run(
                    run.id,
                    HandlerRunFields {
                        mutation_outcome: Some(Some(MutationOutcome::Success)),
                        ..Default::default()
                    },
                )
                .await?;

                let phase = parse_consumer_phase(&run.phase)?;
                if phase.rank() < ConsumerPhase::Mutated.rank() {
                    tx.update_handler_run_phase(run.id, &phase_str(ConsumerPhase::Mutated)).await?;
                }

                tx.update_workflow_fields(
                    run.workflow_id,
                    WorkflowFields {
                        error: Some(None),
                        ..Default::default()
                    },
                )
                .await?;

                Ok(updated_mutation)
            })
        })
        .await
    }

    /// Records a confirmed-failed external side-effect (§4.1.8), mirroring
    /// `apply_mutation`, plus releasing the run's reserved events (the
    /// mutation is now known not to have happened, so they're safe to
    /// retry from scratch) and clearing `workflow.pending_retry_run_id`.
    #[instrument(skip(self, error), fields(mutation_id = %mutation_id, resolved_by = ?resolved_by))]
    pub async fn fail_mutation(
        &self,
        mutation_id: Uuid,
        error: String,
        resolved_by: Option<ResolvedBy>,
    ) -> Result<Mutation, EmmError> {
        run_tx(&*self.store, |tx| {
            Box::pin(async move {
                let mutation = tx.get_mutation(mutation_id).await?;
                if mutation.status.is_terminal() {
                    return Err(EmmError::Invariant(format!(
                        "mutation {mutation_id} already terminal ({:?})",
                        mutation.status
                    )));
                }
                let run = tx.get_handler_run(mutation.handler_run_id).await?;
                if !run.is_consumer() {
                    return Err(EmmError::Invariant(format!(
                        "mutation {mutation_id} belongs to a non-consumer run"
                    )));
                }

                let updated_mutation = tx
                    .update_mutation(
                        mutation_id,
                        MutationFields {
                            status: Some(MutationStatus::Failed),
                            error: Some(Some(error)),
                            resolved_by: Some(resolved_by),
                            resolved_at: Some(Some(Utc::now())),
                            ..Default::default()
                        },
                    )
                    .await?;
                tx.update_handler_run(
                    run.id,
                    HandlerRunFields {
                        mutation_outcome: Some(Some(MutationOutcome::Failure)),
                        ..Default::default()
                    },
                )
                .await?;

                let phase = parse_consumer_phase(&run.phase)?;
                if phase.rank() < ConsumerPhase::Mutated.rank() {
                    tx.update_handler_run_phase(run.id, &phase_str(ConsumerPhase::Mutated)).await?;
                }

                tx.release_events(run.id).await?;
                tx.update_workflow_fields(
                    run.workflow_id,
                    WorkflowFields {
                        pending_retry_run_id: Some(None),
                        error: Some(None),
                        ..Default::default()
                    },
                )
                .await?;

                Ok(updated_mutation)
            })
        })
        .await
    }

    /// Moves a mutation through its non-terminal statuses (§4.1.9):
    /// `pending -> in_flight -> {needs_reconcile, indeterminate}`,
    /// `needs_reconcile -> indeterminate`. Pure label change; no run,
    /// event, or workflow side-effects. Terminal statuses are only
    /// reachable through `apply_mutation`/`fail_mutation`.
    #[instrument(skip(self), fields(mutation_id = %mutation_id, status = ?status))]
    pub async fn update_mutation_status(
        &self,
        mutation_id: Uuid,
        status: MutationStatus,
    ) -> Result<Mutation, EmmError> {
        run_tx(&*self.store, |tx| {
            Box::pin(async move {
                let mutation = tx.get_mutation(mutation_id).await?;
                if mutation.status.is_terminal() {
                    return Err(EmmError::Invariant(format!("mutation {mutation_id} already terminal")));
                }
                if status.is_terminal() {
                    return Err(EmmError::Invariant(
                        "terminal statuses are only reachable through apply_mutation/fail_mutation".to_string(),
                    ));
                }
                if !mutation_edge_allowed(mutation.status, status) {
                    return Err(EmmError::Invariant(format!(
                        "illegal mutation status transition: {:?} -> {status:?}",
                        mutation.status
                    )));
                }
                Ok(tx
                    .update_mutation(
                        mutation_id,
                        MutationFields {
                            status: Some(status),
                            ..Default::default()
                        },
                    )
                    .await?)
            })
        })
        .await
    }

    /// Creates the replacement run for a workflow blocked by a
    /// post-mutation failure (§4.1.10). Rejects a pre-mutation failed
    /// run (testable property 12): a mutation outcome of `failure`, or an
    /// empty outcome at a phase short of `mutated`, means nothing
    /// external happened yet, so there is nothing to resume from
    /// `emitting` — the scheduler should simply dispatch a fresh run
    /// instead. The new run starts at `emitting` carrying the failed
    /// run's `prepare_result`, `input_state`, and `mutation_outcome`;
    /// its reservations are transferred, and the workflow's
    /// `pending_retry_run_id` pointer (which must still name this run)
    /// is cleared so a second call can't create a duplicate retry.
    #[instrument(skip(self), fields(failed_run_id = %failed_run_id, session_id = %session_id))]
    pub async fn create_retry_run(&self, failed_run_id: Uuid, session_id: Uuid) -> Result<HandlerRun, EmmError> {
        run_tx(&*self.store, |tx| {
            Box::pin(async move {
                let original = tx.get_handler_run(failed_run_id).await?;
                if !original.is_consumer() {
                    return Err(EmmError::Invariant(format!(
                        "run {failed_run_id} is a producer run; producers have no mutate phase to retry from"
                    )));
                }
                let phase = parse_consumer_phase(&original.phase)?;
                let is_post_mutation = match original.mutation_outcome {
                    Some(MutationOutcome::Success) | Some(MutationOutcome::Skipped) => true,
                    None => phase.rank() >= ConsumerPhase::Mutated.rank(),
                    Some(MutationOutcome::Failure) => false,
                };
                if !is_post_mutation {
                    return Err(EmmError::Invariant(format!(
                        "run {failed_run_id} is pre-mutation; cannot create a retry run from it"
                    )));
                }

                let workflow = tx.get_workflow(original.workflow_id).await?;
                if workflow.pending_retry_run_id != Some(failed_run_id) {
                    return Err(EmmError::Invariant(format!(
                        "workflow {} has no pending retry for run {failed_run_id}",
                        original.workflow_id
                    )));
                }

                let created = tx
                    .create_handler_run(NewHandlerRun {
                        session_id,
                        workflow_id: original.workflow_id,
                        handler_name: original.handler_name.clone(),
                        handler_type: original.handler_type,
                        phase: phase_str(ConsumerPhase::Emitting),
                        retry_of: Some(failed_run_id),
                        input_state: original.input_state.clone(),
                        start_ts: Utc::now(),
                    })
                    .await?;
                tx.update_handler_run(
                    created.id,
                    HandlerRunFields {
                        prepare_result: Some(original.prepare_result.clone()),
                        mutation_outcome: Some(original.mutation_outcome),
                        ..Default::default()
                    },
                )
                .await?;
                tx.transfer_reservations(failed_run_id, created.id).await?;
                tx.update_workflow_fields(
                    original.workflow_id,
                    WorkflowFields {
                        pending_retry_run_id: Some(None),
                        ..Default::default()
                    },
                )
                .await?;
                Ok(tx.get_handler_run(created.id).await?)
            })
        })
        .await
    }

    /// Closes out a session on the happy path (§4.1.11): every handler
    /// run the session spawned has already committed (each bumping the
    /// running cost/handler-count total via `commit_consumer`/
    /// `commit_producer`), so this just flips the terminal marker.
    /// Deliberately not atomic with those commits — it is the scheduler's
    /// follow-up call once it observes the session's last run commit, so
    /// if the process dies in between, Crash Recovery step 2 re-runs it.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub async fn finish_session(&self, session_id: Uuid) -> Result<Session, EmmError> {
        run_tx(&*self.store, |tx| {
            Box::pin(async move {
                let session = tx.get_session(session_id).await?;
                if !session.is_open() {
                    return Err(EmmError::Invariant(format!("session {session_id} already finished")));
                }
                Ok(tx.finish_session(session_id, SessionDisposition::Completed).await?)
            })
        })
        .await
    }

    /// Scheduler-level block (§4.1.12): e.g. max transient retries
    /// exceeded, or missing configuration. Sets `workflow.error`;
    /// optionally clears `pending_retry_run_id`. Never touches
    /// `maintenance` or `workflow.status` — this is not the
    /// logic-error/maintenance path (that's `update_handler_run_status`
    /// with `failed:logic`), just a generic "don't schedule this
    /// workflow right now" marker.
    #[instrument(skip(self, error), fields(workflow_id = %workflow_id, clear_pending_retry = clear_pending_retry))]
    pub async fn block_workflow(
        &self,
        workflow_id: Uuid,
        error: String,
        clear_pending_retry: bool,
    ) -> Result<WorkflowRecord, EmmError> {
        run_tx(&*self.store, |tx| {
            Box::pin(async move {
                Ok(tx
                    .update_workflow_fields(
                        workflow_id,
                        WorkflowFields {
                            error: Some(Some(error)),
                            pending_retry_run_id: if clear_pending_retry { Some(None) } else { None },
                            ..Default::default()
                        },
                    )
                    .await?)
            })
        })
        .await
    }

    /// Records a reconciliation attempt without resolving the mutation
    /// (§4.2 step 3, `Retry` branch). Not one of §4.1's core
    /// transitions, but it still only ever touches a non-terminal
    /// mutation, so it goes through the same single-writer path as
    /// everything else rather than letting the reconciliation engine
    /// write to the Store directly.
    #[instrument(skip(self), fields(mutation_id = %mutation_id))]
    pub async fn schedule_next_reconcile(
        &self,
        mutation_id: Uuid,
        next_reconcile_at: DateTime<Utc>,
        reconcile_attempts: u32,
    ) -> Result<Mutation, EmmError> {
        run_tx(&*self.store, |tx| {
            Box::pin(async move {
                let mutation = tx.get_mutation(mutation_id).await?;
                if mutation.status.is_terminal() {
                    return Err(EmmError::Invariant(format!("mutation {mutation_id} already terminal")));
                }
                Ok(tx
                    .schedule_next_reconcile(mutation_id, next_reconcile_at, reconcile_attempts)
                    .await?)
            })
        })
        .await
    }

    /// Clears maintenance mode (§4.1.13; §9 open question on the
    /// interaction with a pending retry, resolved here: the two fields
    /// are independent system-owned markers with independent clearers.
    /// `exit_maintenance_mode` only ever touches `maintenance`; a
    /// workflow that also has a stuck `pending_retry_run_id` still needs
    /// `create_retry_run` called on it separately).
    #[instrument(skip(self), fields(workflow_id = %workflow_id))]
    pub async fn exit_maintenance_mode(&self, workflow_id: Uuid) -> Result<WorkflowRecord, EmmError> {
        run_tx(&*self.store, |tx| {
            Box::pin(async move {
                let workflow = tx.get_workflow(workflow_id).await?;
                if !workflow.maintenance {
                    return Err(EmmError::Invariant(format!("workflow {workflow_id} is not in maintenance mode")));
                }
                Ok(tx
                    .update_workflow_fields(
                        workflow_id,
                        WorkflowFields {
                            maintenance: Some(false),
                            ..Default::default()
                        },
                    )
                    .await?)
            })
        })
        .await
    }
}
