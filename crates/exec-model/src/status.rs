use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Health of a handler run, orthogonal to phase (§3, GLOSSARY).
///
/// The `paused:*`/`failed:*` string forms are part of the on-disk contract
/// (§6.4) — existing rows must keep parsing after a binary upgrade, so the
/// wire representation is spelled out explicitly rather than left to serde's
/// default enum tagging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Active,
    Committed,
    PausedTransient,
    PausedApproval,
    PausedReconciliation,
    FailedLogic,
    FailedInternal,
    Crashed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Committed => "committed",
            Self::PausedTransient => "paused:transient",
            Self::PausedApproval => "paused:approval",
            Self::PausedReconciliation => "paused:reconciliation",
            Self::FailedLogic => "failed:logic",
            Self::FailedInternal => "failed:internal",
            Self::Crashed => "crashed",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ModelError> {
        Ok(match s {
            "active" => Self::Active,
            "committed" => Self::Committed,
            "paused:transient" => Self::PausedTransient,
            "paused:approval" => Self::PausedApproval,
            "paused:reconciliation" => Self::PausedReconciliation,
            "failed:logic" => Self::FailedLogic,
            "failed:internal" => Self::FailedInternal,
            "crashed" => Self::Crashed,
            other => return Err(ModelError::UnknownRunStatus(other.to_string())),
        })
    }

    /// Terminal statuses close out a session's handler-run count (§4.1.2,
    /// §4.1.11). `active` is the only non-terminal status.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Active)
    }

    /// Default `workflow.error` message for statuses whose row in the
    /// §4.1.2 table supplies one when the caller didn't.
    pub fn default_workflow_error(self) -> Option<&'static str> {
        match self {
            Self::PausedApproval => Some("Authentication required"),
            Self::PausedReconciliation => Some("Mutation outcome uncertain"),
            Self::FailedInternal => Some("Internal error"),
            _ => None,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Disposition of the single mutation a consumer run may perform.
///
/// Persisted as `"" | success | failure | skipped` (§3); modeled here as
/// `Option<MutationOutcome>` with `None` standing in for the empty string,
/// which is friendlier to match on than a four-way enum with an `Empty`
/// variant nobody outside the Store needs to see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationOutcome {
    Success,
    Failure,
    Skipped,
}

impl MutationOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Skipped => "skipped",
        }
    }

    /// Parses the persisted column, where an empty string means "no outcome
    /// yet" (`Ok(None)`), distinct from a parse failure (`Err`).
    pub fn parse_nullable(s: &str) -> Result<Option<Self>, ModelError> {
        Ok(match s {
            "" => None,
            "success" => Some(Self::Success),
            "failure" => Some(Self::Failure),
            "skipped" => Some(Self::Skipped),
            other => return Err(ModelError::UnknownMutationOutcome(other.to_string())),
        })
    }

    pub fn to_column(opt: Option<Self>) -> &'static str {
        opt.map(Self::as_str).unwrap_or("")
    }
}
