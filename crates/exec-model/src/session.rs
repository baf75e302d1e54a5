use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Terminal disposition of a session (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionDisposition {
    Completed,
    Failed,
}

impl SessionDisposition {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// A grouping of handler runs from one scheduler dispatch (§3, GLOSSARY).
///
/// `end_ts` is set iff `disposition` is populated (invariant 5); the two
/// fields are kept separate here rather than folded into one enum because
/// the Store's row shape mirrors this (a nullable timestamp column plus a
/// nullable disposition column), and `exec-emm`/`exec-scheduler` need to
/// tell "still open" apart from "closed, no disposition recorded yet"
/// during the narrow window `finishSession` is writing both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub cost: f64,
    pub handler_count: u32,
    pub end_ts: Option<DateTime<Utc>>,
    pub disposition: Option<SessionDisposition>,
}

impl Session {
    pub fn is_open(&self) -> bool {
        self.end_ts.is_none()
    }
}
