use async_trait::async_trait;
use exec_model::Mutation;

/// What a probe learned about a mutation it can't get a synchronous answer
/// for from the handler itself (§4.2, §6.2).
#[derive(Debug, Clone)]
pub enum ProbeOutcome {
    /// The external side-effect is confirmed to have happened.
    Applied(serde_json::Value),
    /// The external side-effect is confirmed to have NOT happened.
    Failed(String),
    /// No new information; try again later.
    StillPending,
}

/// Error from a probe's external check itself (network failure, auth
/// failure...), distinct from `ProbeOutcome::Failed`, which means the
/// probe got a definitive answer and that answer was "it failed".
#[derive(Debug, thiserror::Error)]
#[error("probe check failed: {0}")]
pub struct ProbeError(pub String);

/// One external system's way of answering "did `mutation` actually
/// happen?" (§6.2). Implementations live outside this crate — this trait
/// is the seam the out-of-scope tool/connector layer plugs into.
#[async_trait]
pub trait MutationProbe: Send + Sync {
    async fn check(&self, mutation: &Mutation) -> Result<ProbeOutcome, ProbeError>;
}
