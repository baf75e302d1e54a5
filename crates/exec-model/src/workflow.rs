use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The slice of a workflow's fields the core reads and writes (§3).
///
/// A real workflow row carries far more (name, script source, connector
/// credentials...) that belongs entirely to the external systems named in
/// §1's out-of-scope list. This struct is deliberately narrow: `status` is
/// user-owned and the core only ever reads it; `error`, `maintenance`, and
/// `pending_retry_run_id` are system-owned and only `exec-emm` writes them
/// (invariant 4). No other field of a real workflow row belongs in this
/// crate's vocabulary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRecord {
    pub id: Uuid,
    /// User-owned. The core reads this to decide whether scheduling is
    /// allowed (§4.3) but never writes it (invariant 3, testable property 3).
    pub status: String,
    /// System-owned: free-text reason currently blocking progress, or empty
    /// when nothing blocks the workflow.
    pub error: Option<String>,
    /// System-owned: set on `failed:logic`, cleared by `exitMaintenanceMode`.
    pub maintenance: bool,
    /// System-owned: post-mutation failure marker. Non-null blocks the
    /// scheduler from creating new runs until `createRetryRun` clears it.
    pub pending_retry_run_id: Option<Uuid>,
}
