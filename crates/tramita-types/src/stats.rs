//! Aggregate statistics over a definition's instances.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-status instance counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub active: u64,
    pub paused: u64,
    pub completed: u64,
    pub cancelled: u64,
    pub error: u64,
}

/// Read-only aggregate over a definition's instances.
///
/// Purely derived; carries no engine state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStatistics {
    /// Total instances matched (after optional period filter).
    pub total: u64,
    pub by_status: StatusCounts,
    /// Mean elapsed minutes from creation to completion over COMPLETED
    /// instances; zero when none completed.
    pub mean_completion_minutes: u64,
    /// Histogram of current stage over ACTIVE instances.
    pub active_by_stage: HashMap<String, u64>,
    /// Echo of the requested created_at window, when given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<StatisticsPeriod>,
}

/// The created_at window a statistics query was filtered to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatisticsPeriod {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<DateTime<Utc>>,
}
