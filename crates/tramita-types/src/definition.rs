//! Workflow definition types.
//!
//! A `WorkflowDefinition` is the versioned process template shared by every
//! department module: a named list of stages, each carrying the set of stage
//! ids it may legally transition to. The stage graph is data, not code --
//! departments define their own vocabularies and the engine interprets them
//! generically.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A named, versioned process template.
///
/// Read-only to the engine: administrators create and activate definitions,
/// the engine only resolves them when creating instances and validating
/// transitions. Must be active for new instances to bind to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// UUIDv7 assigned on creation.
    pub id: Uuid,
    /// Human-readable process name (e.g. "matricula-escolar").
    pub name: String,
    /// Version number; definitions are immutable per version.
    pub version: u32,
    /// Whether new instances may be created against this definition.
    pub is_active: bool,
    /// Ordered stage list forming the transition graph.
    pub stages: Vec<Stage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A single stage in a definition's graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage {
    /// Stage identifier, unique within the definition (e.g. "ANALISE_DOCS").
    pub id: String,
    /// Human-readable stage name.
    pub name: String,
    /// Stage ids this stage may transition to. Empty means unrestricted.
    #[serde(default)]
    pub allowed_transitions: Vec<String>,
}

impl WorkflowDefinition {
    /// Look up a stage by id.
    pub fn stage(&self, stage_id: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.id == stage_id)
    }

    /// Whether the definition contains a stage with the given id.
    pub fn has_stage(&self, stage_id: &str) -> bool {
        self.stage(stage_id).is_some()
    }
}

/// Request payload for creating a new definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDefinitionRequest {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub is_active: bool,
    pub stages: Vec<Stage>,
}

fn default_version() -> u32 {
    1
}
