//! Audit trail types.
//!
//! Every engine mutation appends exactly one `WorkflowHistory` entry. Entries
//! are never mutated or deleted; lifecycle events (pause, resume, error,
//! recover) are recorded as degenerate transitions with `from_stage ==
//! to_stage`, and completion/cancellation write the sentinel stage ids below.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sentinel `to_stage` written by the complete operation.
pub const COMPLETED_STAGE: &str = "COMPLETED";
/// Sentinel `to_stage` written by the cancel operation.
pub const CANCELLED_STAGE: &str = "CANCELLED";

/// Action labels written by lifecycle operations. Transition actions are
/// free-form strings chosen by the calling department service.
pub mod actions {
    pub const PAUSE: &str = "PAUSE";
    pub const RESUME: &str = "RESUME";
    pub const COMPLETE: &str = "COMPLETE";
    pub const CANCEL: &str = "CANCEL";
    pub const ERROR: &str = "ERROR";
    pub const RECOVER: &str = "RECOVER";
}

/// One append-only audit entry for a workflow instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowHistory {
    /// UUIDv7 assigned on append.
    pub id: Uuid,
    pub instance_id: Uuid,
    pub from_stage: String,
    pub to_stage: String,
    /// Free-form label (e.g. "DOCS_APROVADOS") or a lifecycle action.
    pub action: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Opaque attachment payload owned by the caller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
    /// Seconds since the previous entry for the same instance.
    /// None for the instance's first entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<i64>,
}
