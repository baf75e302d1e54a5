use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use exec_model::{
    Event, EventReservation, EventStatus, HandlerRun, Mutation, Session, SessionDisposition,
    WorkflowRecord,
};

use crate::error::StoreError;
use crate::store::{Store, StoreTransaction};
use crate::tx::StoreTx;
use crate::types::{HandlerRunFields, MutationFields, NewEvent, NewHandlerRun, NewMutation, WorkflowFields};

/// In-process persistence backend for tests, grounded on the reference
/// durable-execution engine's `InMemoryWorkflowEventStore`: one
/// `RwLock`-guarded map per entity, no write-ahead log.
///
/// Writes are applied eagerly as each `StoreTx` method runs rather than
/// buffered until commit, so there is no true multi-statement rollback —
/// the same limitation the reference in-memory store accepts. This is
/// sound here because every `exec-emm` method validates all of its
/// preconditions before performing its first write (the "throws" column
/// of §4.1 is checked up front), so a failing method never leaves a
/// partial write behind for this store to need to undo.
#[derive(Default, Clone)]
pub struct InMemoryStore {
    inner: Arc<Tables>,
}

#[derive(Default)]
struct Tables {
    handler_runs: RwLock<HashMap<Uuid, HandlerRun>>,
    mutations: RwLock<HashMap<Uuid, Mutation>>,
    mutation_by_run: RwLock<HashMap<Uuid, Uuid>>,
    events: RwLock<HashMap<Uuid, Event>>,
    events_by_topic_message: RwLock<HashMap<(Uuid, String), Uuid>>,
    handler_state: RwLock<HashMap<Uuid, serde_json::Value>>,
    handler_wake_at: RwLock<HashMap<Uuid, DateTime<Utc>>>,
    workflows: RwLock<HashMap<Uuid, WorkflowRecord>>,
    sessions: RwLock<HashMap<Uuid, Session>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test/seed helper: insert a workflow row directly, bypassing the
    /// transaction machinery (there is no "create workflow" operation in
    /// §6.1 — workflows are owned by the external system and merely
    /// referenced here).
    pub fn seed_workflow(&self, workflow: WorkflowRecord) {
        self.inner.workflows.write().insert(workflow.id, workflow);
    }

    /// Test introspection helper: read one event regardless of its current
    /// status. `StoreTx` has no single-event getter (§6.1 lists none — the
    /// EMM never needs to look an event up by id outside a reservation
    /// batch it already knows), so assertions that need to observe an
    /// event's disposition directly go through this instead.
    pub fn get_event(&self, id: Uuid) -> Option<Event> {
        self.inner.events.read().get(&id).cloned()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        Ok(Box::new(InMemoryTx {
            tables: self.inner.clone(),
        }))
    }
}

pub struct InMemoryTx {
    tables: Arc<Tables>,
}

#[async_trait]
impl StoreTransaction for InMemoryTx {
    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

fn apply_handler_run_fields(run: &mut HandlerRun, fields: HandlerRunFields) {
    if let Some(v) = fields.status {
        run.status = v;
    }
    if let Some(v) = fields.mutation_outcome {
        run.mutation_outcome = v;
    }
    if let Some(v) = fields.prepare_result {
        run.prepare_result = v;
    }
    if let Some(v) = fields.input_state {
        run.input_state = v;
    }
    if let Some(v) = fields.output_state {
        run.output_state = v;
    }
    if let Some(v) = fields.error {
        run.error = v;
    }
    if let Some(v) = fields.error_type {
        run.error_type = v;
    }
    if let Some(v) = fields.end_ts {
        run.end_ts = v;
    }
    if let Some(v) = fields.cost {
        run.cost = v;
    }
}

fn apply_mutation_fields(mutation: &mut Mutation, fields: MutationFields) {
    if let Some(v) = fields.status {
        mutation.status = v;
    }
    if let Some(v) = fields.result {
        mutation.result = v;
    }
    if let Some(v) = fields.error {
        mutation.error = v;
    }
    if let Some(v) = fields.reconcile_attempts {
        mutation.reconcile_attempts = v;
    }
    if let Some(v) = fields.last_reconcile_at {
        mutation.last_reconcile_at = v;
    }
    if let Some(v) = fields.next_reconcile_at {
        mutation.next_reconcile_at = v;
    }
    if let Some(v) = fields.resolved_by {
        mutation.resolved_by = v;
    }
    if let Some(v) = fields.resolved_at {
        mutation.resolved_at = v;
    }
}

fn apply_workflow_fields(workflow: &mut WorkflowRecord, fields: WorkflowFields) {
    if let Some(v) = fields.error {
        workflow.error = v;
    }
    if let Some(v) = fields.maintenance {
        workflow.maintenance = v;
    }
    if let Some(v) = fields.pending_retry_run_id {
        workflow.pending_retry_run_id = v;
    }
}

#[async_trait]
impl StoreTx for InMemoryTx {
    async fn get_handler_run(&mut self, id: Uuid) -> Result<HandlerRun, StoreError> {
        self.tables
            .handler_runs
            .read()
            .get(&id)
            .cloned()
            .ok_or(StoreError::HandlerRunNotFound(id))
    }

    async fn create_handler_run(&mut self, new: NewHandlerRun) -> Result<HandlerRun, StoreError> {
        let run = HandlerRun {
            id: Uuid::now_v7(),
            session_id: new.session_id,
            workflow_id: new.workflow_id,
            handler_name: new.handler_name,
            handler_type: new.handler_type,
            phase: new.phase,
            status: exec_model::RunStatus::Active,
            mutation_outcome: None,
            prepare_result: None,
            input_state: new.input_state,
            output_state: None,
            retry_of: new.retry_of,
            error: None,
            error_type: None,
            start_ts: new.start_ts,
            end_ts: None,
            cost: 0.0,
        };
        self.tables.handler_runs.write().insert(run.id, run.clone());
        Ok(run)
    }

    async fn update_handler_run(
        &mut self,
        id: Uuid,
        fields: HandlerRunFields,
    ) -> Result<HandlerRun, StoreError> {
        let mut guard = self.tables.handler_runs.write();
        let run = guard.get_mut(&id).ok_or(StoreError::HandlerRunNotFound(id))?;
        apply_handler_run_fields(run, fields);
        Ok(run.clone())
    }

    async fn update_handler_run_phase(&mut self, id: Uuid, phase: &str) -> Result<HandlerRun, StoreError> {
        let mut guard = self.tables.handler_runs.write();
        let run = guard.get_mut(&id).ok_or(StoreError::HandlerRunNotFound(id))?;
        run.phase = phase.to_string();
        Ok(run.clone())
    }

    async fn get_handler_runs_by_session(&mut self, session_id: Uuid) -> Result<Vec<HandlerRun>, StoreError> {
        Ok(self
            .tables
            .handler_runs
            .read()
            .values()
            .filter(|r| r.session_id == session_id)
            .cloned()
            .collect())
    }

    async fn get_incomplete_handler_runs(&mut self) -> Result<Vec<HandlerRun>, StoreError> {
        Ok(self
            .tables
            .handler_runs
            .read()
            .values()
            .filter(|r| r.end_ts.is_none())
            .cloned()
            .collect())
    }

    async fn get_mutation(&mut self, id: Uuid) -> Result<Mutation, StoreError> {
        self.tables
            .mutations
            .read()
            .get(&id)
            .cloned()
            .ok_or(StoreError::MutationNotFound(id))
    }

    async fn get_mutation_by_run_id(&mut self, handler_run_id: Uuid) -> Result<Option<Mutation>, StoreError> {
        let Some(mutation_id) = self.tables.mutation_by_run.read().get(&handler_run_id).copied() else {
            return Ok(None);
        };
        Ok(self.tables.mutations.read().get(&mutation_id).cloned())
    }

    async fn create_mutation(&mut self, new: NewMutation) -> Result<Mutation, StoreError> {
        let mutation = Mutation {
            id: Uuid::now_v7(),
            handler_run_id: new.handler_run_id,
            workflow_id: new.workflow_id,
            tool_namespace: new.tool_namespace,
            tool_method: new.tool_method,
            params: new.params,
            idempotency_key: new.idempotency_key,
            status: exec_model::MutationStatus::Pending,
            result: None,
            error: None,
            reconcile_attempts: 0,
            last_reconcile_at: None,
            next_reconcile_at: None,
            resolved_by: None,
            resolved_at: None,
        };
        self.tables
            .mutation_by_run
            .write()
            .insert(mutation.handler_run_id, mutation.id);
        self.tables.mutations.write().insert(mutation.id, mutation.clone());
        Ok(mutation)
    }

    async fn update_mutation(&mut self, id: Uuid, fields: MutationFields) -> Result<Mutation, StoreError> {
        let mut guard = self.tables.mutations.write();
        let mutation = guard.get_mut(&id).ok_or(StoreError::MutationNotFound(id))?;
        apply_mutation_fields(mutation, fields);
        Ok(mutation.clone())
    }

    async fn get_due_for_reconciliation(&mut self, now: DateTime<Utc>) -> Result<Vec<Mutation>, StoreError> {
        Ok(self
            .tables
            .mutations
            .read()
            .values()
            .filter(|m| {
                matches!(
                    m.status,
                    exec_model::MutationStatus::NeedsReconcile | exec_model::MutationStatus::Indeterminate
                ) && m.next_reconcile_at.map(|t| t <= now).unwrap_or(true)
            })
            .cloned()
            .collect())
    }

    async fn schedule_next_reconcile(
        &mut self,
        id: Uuid,
        next_reconcile_at: DateTime<Utc>,
        reconcile_attempts: u32,
    ) -> Result<Mutation, StoreError> {
        let mut guard = self.tables.mutations.write();
        let mutation = guard.get_mut(&id).ok_or(StoreError::MutationNotFound(id))?;
        mutation.next_reconcile_at = Some(next_reconcile_at);
        mutation.reconcile_attempts = reconcile_attempts;
        mutation.last_reconcile_at = Some(Utc::now());
        Ok(mutation.clone())
    }

    async fn publish_event(&mut self, new: NewEvent) -> Result<Event, StoreError> {
        let key = (new.topic_id, new.message_id.clone());
        if let Some(existing_id) = self.tables.events_by_topic_message.read().get(&key).copied() {
            let mut guard = self.tables.events.write();
            let event = guard.get_mut(&existing_id).expect("indexed event must exist");
            event.payload = new.payload;
            event.caused_by = new.caused_by;
            return Ok(event.clone());
        }
        let event = Event {
            id: Uuid::now_v7(),
            topic_id: new.topic_id,
            workflow_id: new.workflow_id,
            message_id: new.message_id,
            status: EventStatus::Pending,
            reserved_by_run_id: None,
            created_by_run_id: new.created_by_run_id,
            caused_by: new.caused_by,
            payload: new.payload,
            attempt_number: 0,
        };
        self.tables.events_by_topic_message.write().insert(key, event.id);
        self.tables.events.write().insert(event.id, event.clone());
        Ok(event)
    }

    async fn reserve_events(
        &mut self,
        run_id: Uuid,
        reservations: &[EventReservation],
    ) -> Result<(), StoreError> {
        let mut guard = self.tables.events.write();
        for batch in reservations {
            for event_id in &batch.event_ids {
                let event = guard.get_mut(event_id).ok_or(StoreError::EventNotFound(*event_id))?;
                event.status = EventStatus::Reserved;
                event.reserved_by_run_id = Some(run_id);
            }
        }
        Ok(())
    }

    async fn release_events(&mut self, run_id: Uuid) -> Result<(), StoreError> {
        let mut guard = self.tables.events.write();
        for event in guard.values_mut() {
            if event.reserved_by_run_id == Some(run_id) {
                event.status = EventStatus::Pending;
                event.reserved_by_run_id = None;
                event.attempt_number += 1;
            }
        }
        Ok(())
    }

    async fn consume_events(&mut self, run_id: Uuid) -> Result<(), StoreError> {
        let mut guard = self.tables.events.write();
        for event in guard.values_mut() {
            if event.reserved_by_run_id == Some(run_id) {
                event.status = EventStatus::Consumed;
            }
        }
        Ok(())
    }

    async fn transfer_reservations(&mut self, from_run_id: Uuid, to_run_id: Uuid) -> Result<(), StoreError> {
        let mut guard = self.tables.events.write();
        for event in guard.values_mut() {
            if event.reserved_by_run_id == Some(from_run_id) {
                event.reserved_by_run_id = Some(to_run_id);
            }
        }
        Ok(())
    }

    async fn get_reserved_events_for_run(&mut self, run_id: Uuid) -> Result<Vec<Event>, StoreError> {
        Ok(self
            .tables
            .events
            .read()
            .values()
            .filter(|e| e.reserved_by_run_id == Some(run_id) && e.status == EventStatus::Reserved)
            .cloned()
            .collect())
    }

    async fn get_all_reserved_events(&mut self) -> Result<Vec<Event>, StoreError> {
        Ok(self
            .tables
            .events
            .read()
            .values()
            .filter(|e| e.status == EventStatus::Reserved)
            .cloned()
            .collect())
    }

    async fn set_handler_state(&mut self, handler_run_id: Uuid, state: serde_json::Value) -> Result<(), StoreError> {
        self.tables.handler_state.write().insert(handler_run_id, state);
        Ok(())
    }

    async fn get_handler_state(&mut self, handler_run_id: Uuid) -> Result<Option<serde_json::Value>, StoreError> {
        Ok(self.tables.handler_state.read().get(&handler_run_id).cloned())
    }

    async fn update_handler_wake_at(
        &mut self,
        handler_run_id: Uuid,
        wake_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        match wake_at {
            Some(t) => {
                self.tables.handler_wake_at.write().insert(handler_run_id, t);
            }
            None => {
                self.tables.handler_wake_at.write().remove(&handler_run_id);
            }
        }
        Ok(())
    }

    async fn get_workflow(&mut self, id: Uuid) -> Result<WorkflowRecord, StoreError> {
        self.tables
            .workflows
            .read()
            .get(&id)
            .cloned()
            .ok_or(StoreError::WorkflowNotFound(id))
    }

    async fn update_workflow_fields(&mut self, id: Uuid, fields: WorkflowFields) -> Result<WorkflowRecord, StoreError> {
        let mut guard = self.tables.workflows.write();
        let workflow = guard.get_mut(&id).ok_or(StoreError::WorkflowNotFound(id))?;
        apply_workflow_fields(workflow, fields);
        Ok(workflow.clone())
    }

    async fn list_workflows(&mut self) -> Result<Vec<WorkflowRecord>, StoreError> {
        Ok(self.tables.workflows.read().values().cloned().collect())
    }

    async fn start_session(&mut self, workflow_id: Uuid) -> Result<Session, StoreError> {
        let session = Session {
            id: Uuid::now_v7(),
            workflow_id,
            cost: 0.0,
            handler_count: 0,
            end_ts: None,
            disposition: None,
        };
        self.tables.sessions.write().insert(session.id, session.clone());
        Ok(session)
    }

    async fn get_session(&mut self, id: Uuid) -> Result<Session, StoreError> {
        self.tables
            .sessions
            .read()
            .get(&id)
            .cloned()
            .ok_or(StoreError::SessionNotFound(id))
    }

    async fn finish_session(
        &mut self,
        id: Uuid,
        disposition: SessionDisposition,
    ) -> Result<Session, StoreError> {
        let mut guard = self.tables.sessions.write();
        let session = guard.get_mut(&id).ok_or(StoreError::SessionNotFound(id))?;
        session.disposition = Some(disposition);
        session.end_ts = Some(Utc::now());
        Ok(session.clone())
    }

    async fn get_active_sessions(&mut self) -> Result<Vec<Session>, StoreError> {
        Ok(self
            .tables
            .sessions
            .read()
            .values()
            .filter(|s| s.is_open())
            .cloned()
            .collect())
    }

    async fn increment_handler_count(&mut self, session_id: Uuid, cost_delta: f64) -> Result<Session, StoreError> {
        let mut guard = self.tables.sessions.write();
        let session = guard.get_mut(&session_id).ok_or(StoreError::SessionNotFound(session_id))?;
        session.handler_count += 1;
        session.cost += cost_delta;
        Ok(session.clone())
    }
}
