use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use exec_emm::Emm;
use exec_model::{MutationStatus, ResolvedBy};
use exec_store::{run_tx, Store};
use tracing::{info, instrument, warn};

use crate::backoff::BackoffPolicy;
use crate::probe::ProbeOutcome;
use crate::registry::ProbeRegistry;

/// Polls mutations stuck `needs_reconcile`/`indeterminate` and drives them
/// to a terminal outcome through registered probes (§4.2).
///
/// Grounded on the reference durable-execution engine's worker poller: a
/// `tick` that fetches due work, dispatches it, and is driven by an
/// external loop (`run`) on a fixed interval rather than owning its own
/// scheduling thread, so tests can call `tick` directly without waiting
/// out a real interval.
pub struct ReconciliationEngine {
    store: Arc<dyn Store>,
    emm: Emm,
    registry: ProbeRegistry,
    backoff: BackoffPolicy,
    check_interval: Duration,
}

impl ReconciliationEngine {
    pub fn new(store: Arc<dyn Store>, emm: Emm, registry: ProbeRegistry) -> Self {
        Self {
            store,
            emm,
            registry,
            backoff: BackoffPolicy::default(),
            check_interval: Duration::from_secs(10),
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    /// Runs `tick` on `check_interval` until the process shuts down. Each
    /// mutation's own `next_reconcile_at` governs when it is individually
    /// due; this interval just bounds how often the due-list is re-read.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.check_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.tick().await {
                        warn!(error = %err, "reconciliation tick failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    /// Fetches every mutation due for reconciliation and processes each in
    /// turn. A probe error on one mutation doesn't stop the others.
    #[instrument(skip(self))]
    pub async fn tick(&self) -> Result<usize, exec_store::StoreError> {
        let now = Utc::now();
        let due = run_tx(&*self.store, |tx| {
            Box::pin(async move { tx.get_due_for_reconciliation(now).await })
        })
        .await?;

        for mutation in &due {
            if let Err(err) = self.reconcile_one(mutation).await {
                warn!(mutation_id = %mutation.id, error = %err, "failed to reconcile mutation");
            }
        }
        Ok(due.len())
    }

    /// Marks `mutation` `indeterminate` if it isn't already — a pure label
    /// change, so it's safe to call on a mutation that's already there.
    async fn mark_indeterminate(&self, mutation: &exec_model::Mutation) -> Result<(), exec_emm::EmmError> {
        if !matches!(mutation.status, MutationStatus::Indeterminate) {
            self.emm
                .update_mutation_status(mutation.id, MutationStatus::Indeterminate)
                .await?;
        }
        Ok(())
    }

    async fn reconcile_one(&self, mutation: &exec_model::Mutation) -> Result<(), exec_emm::EmmError> {
        let attempt = mutation.reconcile_attempts + 1;

        // §4.2 step 2: the attempt budget and probe registration are both
        // checked before ever invoking a probe — an exhausted or
        // unprobeable mutation has nothing left to try.
        if self.backoff.delay_for_attempt(attempt).is_none() {
            warn!(
                mutation_id = %mutation.id,
                attempts = attempt,
                "exhausted reconciliation attempts; surfacing to operator"
            );
            self.mark_indeterminate(mutation).await?;
            // `get_due_for_reconciliation` treats a null `next_reconcile_at`
            // as immediately due, so without a scheduled time this mutation
            // would be probed again on every tick forever. Push it a year
            // out instead: it stays `indeterminate` and visible, but
            // automatic polling effectively stops until an operator resolves
            // it directly (via `apply_mutation`/`fail_mutation`, which don't
            // check `next_reconcile_at`).
            self.emm
                .schedule_next_reconcile(mutation.id, Utc::now() + chrono::Duration::days(365), attempt)
                .await?;
            return Ok(());
        }

        let Some(probe) = self.registry.get(&mutation.tool_namespace, &mutation.tool_method) else {
            warn!(
                tool_namespace = %mutation.tool_namespace,
                tool_method = %mutation.tool_method,
                "no probe registered; leaving mutation indeterminate"
            );
            self.mark_indeterminate(mutation).await?;
            return Ok(());
        };

        match probe.check(mutation).await {
            Ok(ProbeOutcome::Applied(result)) => {
                self.emm
                    .apply_mutation(mutation.id, result, Some(ResolvedBy::Reconciliation))
                    .await?;
                info!(mutation_id = %mutation.id, "reconciled as applied");
            }
            Ok(ProbeOutcome::Failed(error)) => {
                self.emm
                    .fail_mutation(mutation.id, error, Some(ResolvedBy::Reconciliation))
                    .await?;
                info!(mutation_id = %mutation.id, "reconciled as failed");
            }
            Ok(ProbeOutcome::StillPending) | Err(_) => {
                // §4.2 step 3's `Retry` row is a pure reschedule: attempts
                // and `next_reconcile_at` move, `status` does not. Only the
                // attempts-exhausted and no-probe-registered branches above
                // mark a mutation `indeterminate` — doing it here too would
                // mean the very first `Retry` ever observed immediately
                // short-circuits every later attempt's backoff bookkeeping
                // into "already given up".
                let delay = self
                    .backoff
                    .delay_for_attempt(attempt)
                    .expect("checked above: attempt is within the backoff budget");
                self.emm
                    .schedule_next_reconcile(mutation.id, Utc::now() + delay, attempt)
                    .await?;
            }
        }
        Ok(())
    }
}
