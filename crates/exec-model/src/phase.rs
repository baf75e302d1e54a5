//! Phase lattices for the two handler types.
//!
//! Consumers and producers advance through disjoint phase sets (§3), so they
//! get separate enums rather than one enum with invalid combinations. Both
//! implement [`PhaseKind`] so `exec-emm` can share the forward-only advance
//! logic across both.

use serde::{Deserialize, Serialize};

/// Shared behavior of a handler run's phase lattice: a total order with a
/// distinguished terminal value that can only be reached through a commit
/// method, never a plain phase advance (invariant 1).
pub trait PhaseKind: Copy + Eq + std::fmt::Debug + Send + Sync + 'static {
    /// Position in the forward-only order. Must be strictly increasing along
    /// the lattice's natural progression.
    fn rank(self) -> u8;

    /// The terminal phase. `updateXPhase` must reject this as a target;
    /// only `commitConsumer`/`commitProducer` may reach it.
    fn committed() -> Self;

    fn is_committed(self) -> bool {
        self.rank() == Self::committed().rank()
    }
}

/// Phase of a consumer handler run: `pending → preparing → prepared →
/// mutating → mutated → emitting → committed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumerPhase {
    Pending,
    Preparing,
    Prepared,
    Mutating,
    Mutated,
    Emitting,
    Committed,
}

impl PhaseKind for ConsumerPhase {
    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Preparing => 1,
            Self::Prepared => 2,
            Self::Mutating => 3,
            Self::Mutated => 4,
            Self::Emitting => 5,
            Self::Committed => 6,
        }
    }

    fn committed() -> Self {
        Self::Committed
    }
}

impl ConsumerPhase {
    pub fn has_crossed_mutation_boundary(self) -> bool {
        self.rank() >= Self::Mutated.rank()
    }
}

/// Phase of a producer handler run: `pending → executing → committed`.
/// Producers never reserve events, so the mutation boundary (§4.1.1) never
/// applies to them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProducerPhase {
    Pending,
    Executing,
    Committed,
}

impl PhaseKind for ProducerPhase {
    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Executing => 1,
            Self::Committed => 2,
        }
    }

    fn committed() -> Self {
        Self::Committed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consumer_phase_ranks_are_strictly_increasing() {
        let ordered = [
            ConsumerPhase::Pending,
            ConsumerPhase::Preparing,
            ConsumerPhase::Prepared,
            ConsumerPhase::Mutating,
            ConsumerPhase::Mutated,
            ConsumerPhase::Emitting,
            ConsumerPhase::Committed,
        ];
        for pair in ordered.windows(2) {
            assert!(pair[0].rank() < pair[1].rank());
        }
    }

    #[test]
    fn mutation_boundary_crossed_at_mutated() {
        assert!(!ConsumerPhase::Mutating.has_crossed_mutation_boundary());
        assert!(ConsumerPhase::Mutated.has_crossed_mutation_boundary());
        assert!(ConsumerPhase::Emitting.has_crossed_mutation_boundary());
    }

    #[test]
    fn producer_has_no_mutate_phase() {
        assert_eq!(ProducerPhase::Pending.rank(), 0);
        assert_eq!(ProducerPhase::Executing.rank(), 1);
        assert_eq!(ProducerPhase::Committed.rank(), 2);
    }
}
