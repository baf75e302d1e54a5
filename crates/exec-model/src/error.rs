/// Errors raised when a persisted enum representation doesn't parse.
///
/// These only ever come from corrupted or hand-edited storage; a healthy
/// system writes nothing but values these parsers accept.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("unrecognized run status: {0}")]
    UnknownRunStatus(String),

    #[error("unrecognized mutation outcome: {0}")]
    UnknownMutationOutcome(String),

    #[error("unrecognized event status: {0}")]
    UnknownEventStatus(String),

    #[error("unrecognized mutation status: {0}")]
    UnknownMutationStatus(String),

    #[error("unrecognized resolved_by: {0}")]
    UnknownResolvedBy(String),
}
