use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event::EventReservation;
use crate::status::{MutationOutcome, RunStatus};

/// Whether a handler consumes events from topics or only produces them.
///
/// Producers never reserve events, so the mutation boundary (§4.1.1) never
/// applies to them; the Store and EMM both branch on this field before
/// touching event disposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerType {
    Producer,
    Consumer,
}

/// What a consumer's prepare phase hands to its later phases: the event
/// reservations it made, free-form UI hints, and an optional wake time
/// persisted into per-handler state (§4.1.3, `preparing → prepared`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PrepareResult {
    pub reservations: Vec<EventReservation>,
    #[serde(default)]
    pub ui_hints: serde_json::Value,
    pub wake_at: Option<DateTime<Utc>>,
}

impl PrepareResult {
    /// `prepared → mutating` is allowed only when at least one reservation
    /// batch is non-empty (§4.1.3, testable property 10).
    pub fn has_nonempty_reservation(&self) -> bool {
        self.reservations.iter().any(|r| !r.is_empty())
    }
}

/// One execution attempt of a named handler inside a session (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerRun {
    pub id: Uuid,
    pub session_id: Uuid,
    pub workflow_id: Uuid,
    pub handler_name: String,
    pub handler_type: HandlerType,
    /// Serialized phase string; which enum it decodes to depends on
    /// `handler_type`. Kept as a string at this layer because the two phase
    /// lattices (`ConsumerPhase`/`ProducerPhase`) don't share a common Rust
    /// type, and the Store column is untyped text regardless.
    pub phase: String,
    pub status: RunStatus,
    pub mutation_outcome: Option<MutationOutcome>,
    pub prepare_result: Option<PrepareResult>,
    pub input_state: Option<serde_json::Value>,
    pub output_state: Option<serde_json::Value>,
    pub retry_of: Option<Uuid>,
    pub error: Option<String>,
    pub error_type: Option<String>,
    pub start_ts: DateTime<Utc>,
    pub end_ts: Option<DateTime<Utc>>,
    pub cost: f64,
}

impl HandlerRun {
    pub fn is_consumer(&self) -> bool {
        matches!(self.handler_type, HandlerType::Consumer)
    }
}
