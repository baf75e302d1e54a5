use uuid::Uuid;

/// Error type for store operations, mirroring the reference durable-execution
/// engine's `StoreError` shape: not-found variants per entity, a generic
/// database error, and a serialization error for the JSON columns.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("handler run not found: {0}")]
    HandlerRunNotFound(Uuid),

    #[error("mutation not found: {0}")]
    MutationNotFound(Uuid),

    #[error("workflow not found: {0}")]
    WorkflowNotFound(Uuid),

    #[error("session not found: {0}")]
    SessionNotFound(Uuid),

    #[error("event not found: {0}")]
    EventNotFound(Uuid),

    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("model error: {0}")]
    Model(#[from] exec_model::ModelError),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}
