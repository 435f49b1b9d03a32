//! Workflow instance types.
//!
//! A `WorkflowInstance` is one running case: a protocol bound to a single
//! domain record (enrollment, TFD request, machinery loan, ...) via a weak
//! `entity_type`/`entity_id` back-reference. The engine never dereferences
//! the referenced record; the owning department service does its own lookups.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a workflow instance.
///
/// `Active ⇄ Paused`; `Active`/`Paused`/`Error` may move to the terminal
/// `Completed`/`Cancelled`; `Error` is recoverable back to `Active` only
/// through an explicit recover operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStatus {
    Active,
    Paused,
    Completed,
    Cancelled,
    Error,
}

impl WorkflowStatus {
    /// Terminal statuses admit no further mutation.
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowStatus::Completed | WorkflowStatus::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Active => "ACTIVE",
            WorkflowStatus::Paused => "PAUSED",
            WorkflowStatus::Completed => "COMPLETED",
            WorkflowStatus::Cancelled => "CANCELLED",
            WorkflowStatus::Error => "ERROR",
        }
    }
}

impl std::str::FromStr for WorkflowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "ACTIVE" => Ok(WorkflowStatus::Active),
            "PAUSED" => Ok(WorkflowStatus::Paused),
            "COMPLETED" => Ok(WorkflowStatus::Completed),
            "CANCELLED" => Ok(WorkflowStatus::Cancelled),
            "ERROR" => Ok(WorkflowStatus::Error),
            other => Err(format!("invalid workflow status: '{other}'")),
        }
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One running case bound to a domain record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowInstance {
    /// UUIDv7 assigned on creation.
    pub id: Uuid,
    /// The definition this instance executes. Many instances share one
    /// definition; the definition outlives them all.
    pub definition_id: Uuid,
    /// Kind tag of the owning domain record (e.g. "matricula", "tfd").
    pub entity_type: String,
    /// Weak back-reference to the owning record, used for lookup only.
    /// Starts as a placeholder and is backfilled once the record exists.
    pub entity_id: String,
    /// Optional weak reference to the citizen the case concerns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citizen_id: Option<String>,
    /// Current stage id; always a valid stage of the bound definition.
    pub current_stage: String,
    pub status: WorkflowStatus,
    /// Higher = more urgent.
    pub priority: i64,
    /// Opaque payload owned by the calling department service.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Optimistic concurrency counter, incremented on every write.
    pub revision: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set only when the instance reaches COMPLETED.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Request payload for creating a new instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateInstanceRequest {
    pub definition_id: Uuid,
    pub entity_type: String,
    pub entity_id: String,
    #[serde(default)]
    pub citizen_id: Option<String>,
    pub current_stage: String,
    #[serde(default)]
    pub priority: Option<i64>,
    #[serde(default)]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

/// The user performing an engine operation, recorded in the audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: String,
    #[serde(default)]
    pub user_name: Option<String>,
}

impl Actor {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            user_name: None,
        }
    }

    pub fn named(user_id: impl Into<String>, user_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            user_name: Some(user_name.into()),
        }
    }
}
