/// Errors raised by the Execution Model Manager.
///
/// `Invariant` carries every precondition failure from §4.1's "throws"
/// column (testable properties 9-12): phase rank moving backward, a
/// mutation transition attempted after it already reached a terminal
/// status, `prepared -> mutating` with no reservation, and so on. It is
/// one variant rather than one per rule because callers (the scheduler,
/// the reconciliation engine, tests) all handle it the same way: the
/// transaction never committed, nothing changed, log and stop.
#[derive(Debug, thiserror::Error)]
pub enum EmmError {
    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error(transparent)]
    Store(#[from] exec_store::StoreError),

    #[error(transparent)]
    Model(#[from] exec_model::ModelError),
}
