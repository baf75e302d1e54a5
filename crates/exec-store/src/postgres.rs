use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Postgres, Row, Transaction};
use uuid::Uuid;

use exec_model::{
    Event, EventReservation, EventStatus, HandlerRun, HandlerType, Mutation, MutationOutcome,
    MutationStatus, PrepareResult, ResolvedBy, RunStatus, Session, SessionDisposition, WorkflowRecord,
};

use crate::error::StoreError;
use crate::store::{Store, StoreTransaction};
use crate::tx::StoreTx;
use crate::types::{HandlerRunFields, MutationFields, NewEvent, NewHandlerRun, NewMutation, WorkflowFields};

/// Postgres-backed `Store`, grounded on the reference durable-execution
/// engine's `PostgresWorkflowEventStore`: a `PgPool`, runtime-checked
/// queries (no `sqlx::query!` macro, so the crate builds without a live
/// database), manual row decoding through the `as_str`/`parse` pairs on
/// the `exec-model` enums to keep the on-disk string vocabulary stable.
pub struct PostgresStore {
    pool: sqlx::PgPool,
}

impl PostgresStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PostgresTx { tx }))
    }
}

pub struct PostgresTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTransaction for PostgresTx {
    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

fn decode_handler_run(row: &sqlx::postgres::PgRow) -> Result<HandlerRun, StoreError> {
    let handler_type_str: String = row.try_get("handler_type")?;
    let handler_type = match handler_type_str.as_str() {
        "producer" => HandlerType::Producer,
        "consumer" => HandlerType::Consumer,
        other => return Err(StoreError::Database(format!("unknown handler_type {other}"))),
    };
    let status: String = row.try_get("status")?;
    let mutation_outcome: String = row.try_get("mutation_outcome")?;
    let prepare_result_json: Option<serde_json::Value> = row.try_get("prepare_result")?;

    Ok(HandlerRun {
        id: row.try_get("id")?,
        session_id: row.try_get("session_id")?,
        workflow_id: row.try_get("workflow_id")?,
        handler_name: row.try_get("handler_name")?,
        handler_type,
        phase: row.try_get("phase")?,
        status: RunStatus::parse(&status)?,
        mutation_outcome: MutationOutcome::parse_nullable(&mutation_outcome)?,
        prepare_result: prepare_result_json
            .map(serde_json::from_value::<PrepareResult>)
            .transpose()?,
        input_state: row.try_get("input_state")?,
        output_state: row.try_get("output_state")?,
        retry_of: row.try_get("retry_of")?,
        error: row.try_get("error")?,
        error_type: row.try_get("error_type")?,
        start_ts: row.try_get("start_ts")?,
        end_ts: row.try_get("end_ts")?,
        cost: row.try_get("cost")?,
    })
}

fn decode_mutation(row: &sqlx::postgres::PgRow) -> Result<Mutation, StoreError> {
    let status: String = row.try_get("status")?;
    let resolved_by: String = row.try_get("resolved_by")?;
    Ok(Mutation {
        id: row.try_get("id")?,
        handler_run_id: row.try_get("handler_run_id")?,
        workflow_id: row.try_get("workflow_id")?,
        tool_namespace: row.try_get("tool_namespace")?,
        tool_method: row.try_get("tool_method")?,
        params: row.try_get("params")?,
        idempotency_key: row.try_get("idempotency_key")?,
        status: MutationStatus::parse(&status)?,
        result: row.try_get("result")?,
        error: row.try_get("error")?,
        reconcile_attempts: row.try_get::<i32, _>("reconcile_attempts")? as u32,
        last_reconcile_at: row.try_get("last_reconcile_at")?,
        next_reconcile_at: row.try_get("next_reconcile_at")?,
        resolved_by: ResolvedBy::parse_nullable(&resolved_by)?,
        resolved_at: row.try_get("resolved_at")?,
    })
}

fn decode_event(row: &sqlx::postgres::PgRow) -> Result<Event, StoreError> {
    let status: String = row.try_get("status")?;
    Ok(Event {
        id: row.try_get("id")?,
        topic_id: row.try_get("topic_id")?,
        workflow_id: row.try_get("workflow_id")?,
        message_id: row.try_get("message_id")?,
        status: EventStatus::parse(&status)?,
        reserved_by_run_id: row.try_get("reserved_by_run_id")?,
        created_by_run_id: row.try_get("created_by_run_id")?,
        caused_by: row.try_get::<Vec<Uuid>, _>("caused_by")?,
        payload: row.try_get("payload")?,
        attempt_number: row.try_get::<i32, _>("attempt_number")? as u32,
    })
}

fn decode_workflow(row: &sqlx::postgres::PgRow) -> Result<WorkflowRecord, StoreError> {
    Ok(WorkflowRecord {
        id: row.try_get("id")?,
        status: row.try_get("status")?,
        error: row.try_get("error")?,
        maintenance: row.try_get("maintenance")?,
        pending_retry_run_id: row.try_get("pending_retry_run_id")?,
    })
}

fn decode_session(row: &sqlx::postgres::PgRow) -> Result<Session, StoreError> {
    let disposition: Option<String> = row.try_get("disposition")?;
    Ok(Session {
        id: row.try_get("id")?,
        workflow_id: row.try_get("workflow_id")?,
        cost: row.try_get("cost")?,
        handler_count: row.try_get::<i32, _>("handler_count")? as u32,
        end_ts: row.try_get("end_ts")?,
        disposition: disposition
            .map(|d| match d.as_str() {
                "completed" => Ok(SessionDisposition::Completed),
                "failed" => Ok(SessionDisposition::Failed),
                other => Err(StoreError::Database(format!("unknown disposition {other}"))),
            })
            .transpose()?,
    })
}

#[async_trait]
impl StoreTx for PostgresTx {
    async fn get_handler_run(&mut self, id: Uuid) -> Result<HandlerRun, StoreError> {
        let row = sqlx::query("SELECT * FROM handler_runs WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?
            .ok_or(StoreError::HandlerRunNotFound(id))?;
        decode_handler_run(&row)
    }

    async fn create_handler_run(&mut self, new: NewHandlerRun) -> Result<HandlerRun, StoreError> {
        let id = Uuid::now_v7();
        let row = sqlx::query(
            "INSERT INTO handler_runs
                (id, session_id, workflow_id, handler_name, handler_type, phase, status,
                 mutation_outcome, retry_of, input_state, start_ts, cost)
             VALUES ($1, $2, $3, $4, $5, $6, $7, '', $8, $9, $10, 0)
             RETURNING *",
        )
        .bind(id)
        .bind(new.session_id)
        .bind(new.workflow_id)
        .bind(&new.handler_name)
        .bind(match new.handler_type {
            HandlerType::Producer => "producer",
            HandlerType::Consumer => "consumer",
        })
        .bind(&new.phase)
        .bind(RunStatus::Active.as_str())
        .bind(new.retry_of)
        .bind(&new.input_state)
        .bind(new.start_ts)
        .fetch_one(&mut *self.tx)
        .await?;
        decode_handler_run(&row)
    }

    async fn update_handler_run(
        &mut self,
        id: Uuid,
        fields: HandlerRunFields,
    ) -> Result<HandlerRun, StoreError> {
        // Postgres has no first-class "patch" query builder in the
        // runtime-checked API used here, so unchanged fields are
        // re-written with their current value: read-modify-write inside
        // the same transaction is safe because nothing else can observe
        // the intermediate state.
        let mut run = self.get_handler_run(id).await?;
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

        let prepare_result_json = run.prepare_result.as_ref().map(serde_json::to_value).transpose()?;
        let row = sqlx::query(
            "UPDATE handler_runs SET
                status = $2, mutation_outcome = $3, prepare_result = $4, input_state = $5,
                output_state = $6, error = $7, error_type = $8, end_ts = $9, cost = $10
             WHERE id = $1
             RETURNING *",
        )
        .bind(id)
        .bind(run.status.as_str())
        .bind(MutationOutcome::to_column(run.mutation_outcome))
        .bind(prepare_result_json)
        .bind(&run.input_state)
        .bind(&run.output_state)
        .bind(&run.error)
        .bind(&run.error_type)
        .bind(run.end_ts)
        .bind(run.cost)
        .fetch_one(&mut *self.tx)
        .await?;
        decode_handler_run(&row)
    }

    async fn update_handler_run_phase(&mut self, id: Uuid, phase: &str) -> Result<HandlerRun, StoreError> {
        let row = sqlx::query("UPDATE handler_runs SET phase = $2 WHERE id = $1 RETURNING *")
            .bind(id)
            .bind(phase)
            .fetch_optional(&mut *self.tx)
            .await?
            .ok_or(StoreError::HandlerRunNotFound(id))?;
        decode_handler_run(&row)
    }

    async fn get_handler_runs_by_session(&mut self, session_id: Uuid) -> Result<Vec<HandlerRun>, StoreError> {
        let rows = sqlx::query("SELECT * FROM handler_runs WHERE session_id = $1")
            .bind(session_id)
            .fetch_all(&mut *self.tx)
            .await?;
        rows.iter().map(decode_handler_run).collect()
    }

    async fn get_incomplete_handler_runs(&mut self) -> Result<Vec<HandlerRun>, StoreError> {
        let rows = sqlx::query("SELECT * FROM handler_runs WHERE end_ts IS NULL")
            .fetch_all(&mut *self.tx)
            .await?;
        rows.iter().map(decode_handler_run).collect()
    }

    async fn get_mutation(&mut self, id: Uuid) -> Result<Mutation, StoreError> {
        let row = sqlx::query("SELECT * FROM mutations WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?
            .ok_or(StoreError::MutationNotFound(id))?;
        decode_mutation(&row)
    }

    async fn get_mutation_by_run_id(&mut self, handler_run_id: Uuid) -> Result<Option<Mutation>, StoreError> {
        let row = sqlx::query("SELECT * FROM mutations WHERE handler_run_id = $1")
            .bind(handler_run_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(decode_mutation).transpose()
    }

    async fn create_mutation(&mut self, new: NewMutation) -> Result<Mutation, StoreError> {
        let id = Uuid::now_v7();
        let row = sqlx::query(
            "INSERT INTO mutations
                (id, handler_run_id, workflow_id, tool_namespace, tool_method, params,
                 idempotency_key, status, resolved_by, reconcile_attempts)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, '', 0)
             RETURNING *",
        )
        .bind(id)
        .bind(new.handler_run_id)
        .bind(new.workflow_id)
        .bind(&new.tool_namespace)
        .bind(&new.tool_method)
        .bind(&new.params)
        .bind(&new.idempotency_key)
        .bind(MutationStatus::Pending.as_str())
        .fetch_one(&mut *self.tx)
        .await?;
        decode_mutation(&row)
    }

    async fn update_mutation(&mut self, id: Uuid, fields: MutationFields) -> Result<Mutation, StoreError> {
        let mut mutation = self.get_mutation(id).await?;
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

        let row = sqlx::query(
            "UPDATE mutations SET
                status = $2, result = $3, error = $4, reconcile_attempts = $5,
                last_reconcile_at = $6, next_reconcile_at = $7, resolved_by = $8, resolved_at = $9
             WHERE id = $1
             RETURNING *",
        )
        .bind(id)
        .bind(mutation.status.as_str())
        .bind(&mutation.result)
        .bind(&mutation.error)
        .bind(mutation.reconcile_attempts as i32)
        .bind(mutation.last_reconcile_at)
        .bind(mutation.next_reconcile_at)
        .bind(mutation.resolved_by.map(ResolvedBy::as_str).unwrap_or(""))
        .bind(mutation.resolved_at)
        .fetch_one(&mut *self.tx)
        .await?;
        decode_mutation(&row)
    }

    async fn get_due_for_reconciliation(&mut self, now: DateTime<Utc>) -> Result<Vec<Mutation>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM mutations
             WHERE status IN ('needs_reconcile', 'indeterminate')
               AND (next_reconcile_at IS NULL OR next_reconcile_at <= $1)",
        )
        .bind(now)
        .fetch_all(&mut *self.tx)
        .await?;
        rows.iter().map(decode_mutation).collect()
    }

    async fn schedule_next_reconcile(
        &mut self,
        id: Uuid,
        next_reconcile_at: DateTime<Utc>,
        reconcile_attempts: u32,
    ) -> Result<Mutation, StoreError> {
        let row = sqlx::query(
            "UPDATE mutations SET next_reconcile_at = $2, reconcile_attempts = $3, last_reconcile_at = now()
             WHERE id = $1
             RETURNING *",
        )
        .bind(id)
        .bind(next_reconcile_at)
        .bind(reconcile_attempts as i32)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or(StoreError::MutationNotFound(id))?;
        decode_mutation(&row)
    }

    async fn publish_event(&mut self, new: NewEvent) -> Result<Event, StoreError> {
        let id = Uuid::now_v7();
        let row = sqlx::query(
            "INSERT INTO events (id, topic_id, workflow_id, message_id, status, created_by_run_id,
                                  caused_by, payload, attempt_number)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 0)
             ON CONFLICT (topic_id, message_id) DO UPDATE SET payload = EXCLUDED.payload, caused_by = EXCLUDED.caused_by
             RETURNING *",
        )
        .bind(id)
        .bind(new.topic_id)
        .bind(new.workflow_id)
        .bind(&new.message_id)
        .bind(EventStatus::Pending.as_str())
        .bind(new.created_by_run_id)
        .bind(&new.caused_by)
        .bind(&new.payload)
        .fetch_one(&mut *self.tx)
        .await?;
        decode_event(&row)
    }

    async fn reserve_events(
        &mut self,
        run_id: Uuid,
        reservations: &[EventReservation],
    ) -> Result<(), StoreError> {
        for batch in reservations {
            sqlx::query(
                "UPDATE events SET status = $2, reserved_by_run_id = $3 WHERE id = ANY($1)",
            )
            .bind(&batch.event_ids)
            .bind(EventStatus::Reserved.as_str())
            .bind(run_id)
            .execute(&mut *self.tx)
            .await?;
        }
        Ok(())
    }

    async fn release_events(&mut self, run_id: Uuid) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE events SET status = $2, reserved_by_run_id = NULL, attempt_number = attempt_number + 1
             WHERE reserved_by_run_id = $1",
        )
        .bind(run_id)
        .bind(EventStatus::Pending.as_str())
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn consume_events(&mut self, run_id: Uuid) -> Result<(), StoreError> {
        sqlx::query("UPDATE events SET status = $2 WHERE reserved_by_run_id = $1")
            .bind(run_id)
            .bind(EventStatus::Consumed.as_str())
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn transfer_reservations(&mut self, from_run_id: Uuid, to_run_id: Uuid) -> Result<(), StoreError> {
        sqlx::query("UPDATE events SET reserved_by_run_id = $2 WHERE reserved_by_run_id = $1")
            .bind(from_run_id)
            .bind(to_run_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn get_reserved_events_for_run(&mut self, run_id: Uuid) -> Result<Vec<Event>, StoreError> {
        let rows = sqlx::query("SELECT * FROM events WHERE reserved_by_run_id = $1 AND status = $2")
            .bind(run_id)
            .bind(EventStatus::Reserved.as_str())
            .fetch_all(&mut *self.tx)
            .await?;
        rows.iter().map(decode_event).collect()
    }

    async fn get_all_reserved_events(&mut self) -> Result<Vec<Event>, StoreError> {
        let rows = sqlx::query("SELECT * FROM events WHERE status = $1")
            .bind(EventStatus::Reserved.as_str())
            .fetch_all(&mut *self.tx)
            .await?;
        rows.iter().map(decode_event).collect()
    }

    async fn set_handler_state(&mut self, handler_run_id: Uuid, state: serde_json::Value) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO handler_state (handler_run_id, state) VALUES ($1, $2)
             ON CONFLICT (handler_run_id) DO UPDATE SET state = EXCLUDED.state",
        )
        .bind(handler_run_id)
        .bind(state)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn get_handler_state(&mut self, handler_run_id: Uuid) -> Result<Option<serde_json::Value>, StoreError> {
        let row = sqlx::query("SELECT state FROM handler_state WHERE handler_run_id = $1")
            .bind(handler_run_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.map(|r| r.try_get::<serde_json::Value, _>("state")).transpose().map_err(Into::into)
    }

    async fn update_handler_wake_at(
        &mut self,
        handler_run_id: Uuid,
        wake_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO handler_wake_at (handler_run_id, wake_at) VALUES ($1, $2)
             ON CONFLICT (handler_run_id) DO UPDATE SET wake_at = EXCLUDED.wake_at",
        )
        .bind(handler_run_id)
        .bind(wake_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn get_workflow(&mut self, id: Uuid) -> Result<WorkflowRecord, StoreError> {
        let row = sqlx::query("SELECT * FROM workflows WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?
            .ok_or(StoreError::WorkflowNotFound(id))?;
        decode_workflow(&row)
    }

    async fn update_workflow_fields(&mut self, id: Uuid, fields: WorkflowFields) -> Result<WorkflowRecord, StoreError> {
        let mut workflow = self.get_workflow(id).await?;
        if let Some(v) = fields.error {
            workflow.error = v;
        }
        if let Some(v) = fields.maintenance {
            workflow.maintenance = v;
        }
        if let Some(v) = fields.pending_retry_run_id {
            workflow.pending_retry_run_id = v;
        }
        let row = sqlx::query(
            "UPDATE workflows SET error = $2, maintenance = $3, pending_retry_run_id = $4
             WHERE id = $1
             RETURNING *",
        )
        .bind(id)
        .bind(&workflow.error)
        .bind(workflow.maintenance)
        .bind(workflow.pending_retry_run_id)
        .fetch_one(&mut *self.tx)
        .await?;
        decode_workflow(&row)
    }

    async fn list_workflows(&mut self) -> Result<Vec<WorkflowRecord>, StoreError> {
        let rows = sqlx::query("SELECT * FROM workflows").fetch_all(&mut *self.tx).await?;
        rows.iter().map(decode_workflow).collect()
    }

    async fn start_session(&mut self, workflow_id: Uuid) -> Result<Session, StoreError> {
        let id = Uuid::now_v7();
        let row = sqlx::query(
            "INSERT INTO sessions (id, workflow_id, cost, handler_count) VALUES ($1, $2, 0, 0) RETURNING *",
        )
        .bind(id)
        .bind(workflow_id)
        .fetch_one(&mut *self.tx)
        .await?;
        decode_session(&row)
    }

    async fn get_session(&mut self, id: Uuid) -> Result<Session, StoreError> {
        let row = sqlx::query("SELECT * FROM sessions WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?
            .ok_or(StoreError::SessionNotFound(id))?;
        decode_session(&row)
    }

    async fn finish_session(
        &mut self,
        id: Uuid,
        disposition: SessionDisposition,
    ) -> Result<Session, StoreError> {
        let row = sqlx::query(
            "UPDATE sessions SET end_ts = now(), disposition = $2 WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(disposition.as_str())
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or(StoreError::SessionNotFound(id))?;
        decode_session(&row)
    }

    async fn get_active_sessions(&mut self) -> Result<Vec<Session>, StoreError> {
        let rows = sqlx::query("SELECT * FROM sessions WHERE end_ts IS NULL")
            .fetch_all(&mut *self.tx)
            .await?;
        rows.iter().map(decode_session).collect()
    }

    async fn increment_handler_count(&mut self, session_id: Uuid, cost_delta: f64) -> Result<Session, StoreError> {
        let row = sqlx::query(
            "UPDATE sessions SET handler_count = handler_count + 1, cost = cost + $2
             WHERE id = $1
             RETURNING *",
        )
        .bind(session_id)
        .bind(cost_delta)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or(StoreError::SessionNotFound(session_id))?;
        decode_session(&row)
    }
}
