/// Errors from the scheduler and crash-recovery surfaces.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Emm(#[from] exec_emm::EmmError),

    #[error(transparent)]
    Store(#[from] exec_store::StoreError),

    #[error("workflow {0} is in maintenance mode")]
    WorkflowInMaintenance(uuid::Uuid),

    #[error("workflow {0} already has an open session")]
    SessionAlreadyOpen(uuid::Uuid),
}

/// Errors surfaced by crash recovery. Recovery logs and continues past
/// individual failures (one broken workflow shouldn't block recovering
/// the rest of the fleet at startup), so this type mostly exists for the
/// per-item log line rather than to stop the recovery pass itself.
#[derive(Debug, thiserror::Error)]
pub enum RecoveryError {
    #[error(transparent)]
    Emm(#[from] exec_emm::EmmError),

    #[error(transparent)]
    Store(#[from] exec_store::StoreError),
}
