use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ModelError;

/// Disposition of a per-topic event (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Pending,
    Reserved,
    Consumed,
    Skipped,
}

impl EventStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Reserved => "reserved",
            Self::Consumed => "consumed",
            Self::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ModelError> {
        Ok(match s {
            "pending" => Self::Pending,
            "reserved" => Self::Reserved,
            "consumed" => Self::Consumed,
            "skipped" => Self::Skipped,
            other => return Err(ModelError::UnknownEventStatus(other.to_string())),
        })
    }
}

/// A message published to a topic for a workflow (§3).
///
/// `(topic_id, message_id)` is unique; re-publishing the same pair is
/// last-write-wins on `payload` (invariant 7 / testable property 7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub topic_id: Uuid,
    pub workflow_id: Uuid,
    pub message_id: String,
    pub status: EventStatus,
    pub reserved_by_run_id: Option<Uuid>,
    pub created_by_run_id: Option<Uuid>,
    pub caused_by: Vec<Uuid>,
    pub payload: serde_json::Value,
    pub attempt_number: u32,
}

/// One batch of a prepare-phase reservation: a topic plus the event ids
/// within it that a consumer run wants to hold for its mutate/emit phases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventReservation {
    pub topic_id: Uuid,
    pub event_ids: Vec<Uuid>,
}

impl EventReservation {
    pub fn is_empty(&self) -> bool {
        self.event_ids.is_empty()
    }
}
