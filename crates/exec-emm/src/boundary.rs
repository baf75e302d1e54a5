use exec_model::{ConsumerPhase, MutationOutcome, PhaseKind};

/// Where a consumer run's reserved events stand relative to its mutation
/// attempt (§4.1.1). `commitConsumer` and crash recovery both need this to
/// decide whether reserved events go back to `pending` (safe to retry),
/// get marked `consumed` (the mutation is known to have happened), or are
/// left untouched pending reconciliation (unknown).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationBoundary {
    /// The run never reached (or hasn't yet reached) its mutation attempt.
    /// Reserved events can be safely released back to `pending`.
    PreMutation,
    /// The run was mutating when it stopped and no outcome was recorded.
    /// Whether the external call actually took effect is unknown; events
    /// stay reserved until reconciliation resolves it.
    Indeterminate,
    /// The mutation attempt concluded (success or failure) before the run
    /// stopped. Reserved events are consumed regardless of which outcome,
    /// since the attempt is what makes them "used" (invariant 7).
    PostMutation,
}

/// Classifies a consumer run's mutation boundary from its current phase
/// and recorded outcome.
///
/// The indeterminate case is checked first deliberately: phase `mutating`
/// with no outcome recorded satisfies both "rank hasn't crossed the
/// mutated boundary" and "mutation was attempted", so the more specific
/// rule (indeterminate) must win or every indeterminate run would be
/// silently treated as safe-to-retry and its possibly-applied mutation
/// would be retried a second time.
///
/// A recorded `Failure` outcome is pre-mutation regardless of phase (§4.1.1
/// row 1 names it explicitly alongside `phase < mutated`): the external
/// call is known not to have taken effect, so its reserved events are
/// safe to release even though the run has already advanced to `mutated`
/// or beyond. `fail_mutation` (§4.1.8) releases them directly; this keeps
/// any later boundary re-check (e.g. a subsequent status transition on the
/// same run) agreeing with that release instead of trying to preserve.
pub fn classify(phase: ConsumerPhase, mutation_outcome: Option<MutationOutcome>) -> MutationBoundary {
    if phase == ConsumerPhase::Mutating && mutation_outcome.is_none() {
        return MutationBoundary::Indeterminate;
    }
    if mutation_outcome == Some(MutationOutcome::Failure) || !phase.has_crossed_mutation_boundary() {
        return MutationBoundary::PreMutation;
    }
    MutationBoundary::PostMutation
}
