use chrono::{DateTime, Utc};
use uuid::Uuid;

use exec_model::{HandlerType, MutationOutcome, MutationStatus, PrepareResult, ResolvedBy, RunStatus};

/// Patch for `updateHandlerRun` (§6.1). `Option<T>` at the outer level means
/// "leave unchanged"; fields that are themselves nullable on the row use
/// `Option<Option<T>>` so a caller can distinguish "don't touch" from
/// "clear it" (e.g. clearing `error`/`error_type` on a retry that commits).
#[derive(Debug, Clone, Default)]
pub struct HandlerRunFields {
    pub status: Option<RunStatus>,
    pub mutation_outcome: Option<Option<MutationOutcome>>,
    pub prepare_result: Option<Option<PrepareResult>>,
    pub input_state: Option<Option<serde_json::Value>>,
    pub output_state: Option<Option<serde_json::Value>>,
    pub error: Option<Option<String>>,
    pub error_type: Option<Option<String>>,
    pub end_ts: Option<Option<DateTime<Utc>>>,
    pub cost: Option<f64>,
}

/// Patch for `updateMutation` (§6.1), same leave-unchanged convention.
#[derive(Debug, Clone, Default)]
pub struct MutationFields {
    pub status: Option<MutationStatus>,
    pub result: Option<Option<serde_json::Value>>,
    pub error: Option<Option<String>>,
    pub reconcile_attempts: Option<u32>,
    pub last_reconcile_at: Option<Option<DateTime<Utc>>>,
    pub next_reconcile_at: Option<Option<DateTime<Utc>>>,
    pub resolved_by: Option<Option<ResolvedBy>>,
    pub resolved_at: Option<Option<DateTime<Utc>>>,
}

/// Patch for `updateWorkflowFields` (§6.1). `status` is deliberately absent:
/// it is user-owned and the core never writes it (invariant 3).
#[derive(Debug, Clone, Default)]
pub struct WorkflowFields {
    pub error: Option<Option<String>>,
    pub maintenance: Option<bool>,
    pub pending_retry_run_id: Option<Option<Uuid>>,
}

/// Arguments to create a new handler run (§4.3's scheduler, `createRetryRun`).
#[derive(Debug, Clone)]
pub struct NewHandlerRun {
    pub session_id: Uuid,
    pub workflow_id: Uuid,
    pub handler_name: String,
    pub handler_type: HandlerType,
    pub phase: String,
    pub retry_of: Option<Uuid>,
    pub input_state: Option<serde_json::Value>,
    pub start_ts: DateTime<Utc>,
}

/// Arguments to create a new mutation row, one-to-one with the handler run
/// that performs it (invariant 2).
#[derive(Debug, Clone)]
pub struct NewMutation {
    pub handler_run_id: Uuid,
    pub workflow_id: Uuid,
    pub tool_namespace: String,
    pub tool_method: String,
    pub params: serde_json::Value,
    pub idempotency_key: String,
}

/// One batch of events to publish to a topic (producer emit phase, and test
/// fixtures for the reconciliation/scheduler suites).
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub topic_id: Uuid,
    pub workflow_id: Uuid,
    pub message_id: String,
    pub created_by_run_id: Option<Uuid>,
    pub caused_by: Vec<Uuid>,
    pub payload: serde_json::Value,
}
