use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use exec_model::{Event, EventReservation, HandlerRun, Mutation, Session, WorkflowRecord};

use crate::error::StoreError;
use crate::types::{HandlerRunFields, MutationFields, NewEvent, NewHandlerRun, NewMutation, WorkflowFields};

/// The full persistence surface an `exec-emm` transaction body is written
/// against (§6.1). A `StoreTx` is only ever obtained from `Store::begin`;
/// it is dropped (and its writes rolled back) unless the caller's body
/// returns `Ok`, per `Store::run_tx`.
///
/// Reads taken through a `StoreTx` observe its own prior writes within the
/// same transaction — both implementations guarantee this structurally:
/// the in-memory one by mutating the shared maps directly under one lock
/// scope, the Postgres one because it is a thin wrapper over one
/// `sqlx::Transaction`.
#[async_trait]
pub trait StoreTx: Send {
    // -- handler runs --------------------------------------------------
    async fn get_handler_run(&mut self, id: Uuid) -> Result<HandlerRun, StoreError>;
    async fn create_handler_run(&mut self, new: NewHandlerRun) -> Result<HandlerRun, StoreError>;
    async fn update_handler_run(
        &mut self,
        id: Uuid,
        fields: HandlerRunFields,
    ) -> Result<HandlerRun, StoreError>;
    async fn update_handler_run_phase(&mut self, id: Uuid, phase: &str) -> Result<HandlerRun, StoreError>;
    async fn get_handler_runs_by_session(&mut self, session_id: Uuid) -> Result<Vec<HandlerRun>, StoreError>;
    async fn get_incomplete_handler_runs(&mut self) -> Result<Vec<HandlerRun>, StoreError>;

    // -- mutations --------------------------------------------------------
    async fn get_mutation(&mut self, id: Uuid) -> Result<Mutation, StoreError>;
    async fn get_mutation_by_run_id(&mut self, handler_run_id: Uuid) -> Result<Option<Mutation>, StoreError>;
    async fn create_mutation(&mut self, new: NewMutation) -> Result<Mutation, StoreError>;
    async fn update_mutation(&mut self, id: Uuid, fields: MutationFields) -> Result<Mutation, StoreError>;
    async fn get_due_for_reconciliation(&mut self, now: DateTime<Utc>) -> Result<Vec<Mutation>, StoreError>;
    async fn schedule_next_reconcile(
        &mut self,
        id: Uuid,
        next_reconcile_at: DateTime<Utc>,
        reconcile_attempts: u32,
    ) -> Result<Mutation, StoreError>;

    // -- events -----------------------------------------------------------
    async fn publish_event(&mut self, new: NewEvent) -> Result<Event, StoreError>;
    async fn reserve_events(
        &mut self,
        run_id: Uuid,
        reservations: &[EventReservation],
    ) -> Result<(), StoreError>;
    async fn release_events(&mut self, run_id: Uuid) -> Result<(), StoreError>;
    async fn consume_events(&mut self, run_id: Uuid) -> Result<(), StoreError>;
    async fn transfer_reservations(&mut self, from_run_id: Uuid, to_run_id: Uuid) -> Result<(), StoreError>;
    async fn get_reserved_events_for_run(&mut self, run_id: Uuid) -> Result<Vec<Event>, StoreError>;
    /// All events currently `reserved`, across every run. Used only by
    /// crash recovery's orphan check (§4.4 step 4) — nothing in normal
    /// operation needs a system-wide view of reservations.
    async fn get_all_reserved_events(&mut self) -> Result<Vec<Event>, StoreError>;

    // -- per-handler state --------------------------------------------------
    async fn set_handler_state(&mut self, handler_run_id: Uuid, state: serde_json::Value) -> Result<(), StoreError>;
    async fn get_handler_state(&mut self, handler_run_id: Uuid) -> Result<Option<serde_json::Value>, StoreError>;
    async fn update_handler_wake_at(
        &mut self,
        handler_run_id: Uuid,
        wake_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;

    // -- workflows ----------------------------------------------------------
    async fn get_workflow(&mut self, id: Uuid) -> Result<WorkflowRecord, StoreError>;
    async fn update_workflow_fields(&mut self, id: Uuid, fields: WorkflowFields) -> Result<WorkflowRecord, StoreError>;
    async fn list_workflows(&mut self) -> Result<Vec<WorkflowRecord>, StoreError>;

    // -- sessions -----------------------------------------------------------
    async fn start_session(&mut self, workflow_id: Uuid) -> Result<Session, StoreError>;
    async fn get_session(&mut self, id: Uuid) -> Result<Session, StoreError>;
    async fn finish_session(
        &mut self,
        id: Uuid,
        disposition: exec_model::SessionDisposition,
    ) -> Result<Session, StoreError>;
    async fn get_active_sessions(&mut self) -> Result<Vec<Session>, StoreError>;
    async fn increment_handler_count(&mut self, session_id: Uuid, cost_delta: f64) -> Result<Session, StoreError>;
}
