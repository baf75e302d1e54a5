use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ModelError;

/// Status of an external side-effect attempt (§3).
///
/// `Applied`/`Failed` are terminal and, per invariant 4 / testable property
/// 4, immutable once reached — `exec-emm` enforces this by rejecting any
/// further transition, not by this type alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationStatus {
    Pending,
    InFlight,
    NeedsReconcile,
    Indeterminate,
    Applied,
    Failed,
}

impl MutationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InFlight => "in_flight",
            Self::NeedsReconcile => "needs_reconcile",
            Self::Indeterminate => "indeterminate",
            Self::Applied => "applied",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ModelError> {
        Ok(match s {
            "pending" => Self::Pending,
            "in_flight" => Self::InFlight,
            "needs_reconcile" => Self::NeedsReconcile,
            "indeterminate" => Self::Indeterminate,
            "applied" => Self::Applied,
            "failed" => Self::Failed,
            other => return Err(ModelError::UnknownMutationStatus(other.to_string())),
        })
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Applied | Self::Failed)
    }
}

/// Who/what resolved an uncertain mutation (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolvedBy {
    Reconciliation,
    UserAssertApplied,
    UserAssertFailed,
    UserSkipped,
    Skipped,
}

impl ResolvedBy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Reconciliation => "reconciliation",
            Self::UserAssertApplied => "user_assert_applied",
            Self::UserAssertFailed => "user_assert_failed",
            Self::UserSkipped => "user_skipped",
            Self::Skipped => "skipped",
        }
    }

    pub fn parse_nullable(s: &str) -> Result<Option<Self>, ModelError> {
        Ok(match s {
            "" => None,
            "reconciliation" => Some(Self::Reconciliation),
            "user_assert_applied" => Some(Self::UserAssertApplied),
            "user_assert_failed" => Some(Self::UserAssertFailed),
            "user_skipped" => Some(Self::UserSkipped),
            "skipped" => Some(Self::Skipped),
            other => return Err(ModelError::UnknownResolvedBy(other.to_string())),
        })
    }
}

/// One external side-effect attempt, one-to-one with the handler run that
/// performed it (invariant 2) (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mutation {
    pub id: Uuid,
    pub handler_run_id: Uuid,
    pub workflow_id: Uuid,
    pub tool_namespace: String,
    pub tool_method: String,
    pub params: serde_json::Value,
    pub idempotency_key: String,
    pub status: MutationStatus,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub reconcile_attempts: u32,
    pub last_reconcile_at: Option<DateTime<Utc>>,
    pub next_reconcile_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<ResolvedBy>,
    pub resolved_at: Option<DateTime<Utc>>,
}
