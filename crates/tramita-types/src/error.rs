use thiserror::Error;

use crate::instance::WorkflowStatus;

/// Errors surfaced by the case workflow engine.
///
/// All validation failures are synchronous and leave the instance and its
/// history completely unchanged. Retries are the caller's responsibility.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("workflow definition not found")]
    DefinitionNotFound,

    #[error("workflow definition is inactive")]
    DefinitionInactive,

    #[error("invalid workflow definition: {0}")]
    DefinitionInvalid(String),

    #[error("workflow instance not found")]
    InstanceNotFound,

    #[error("workflow is not in a valid status for this operation: {0}")]
    InvalidStatus(WorkflowStatus),

    #[error("stage '{0}' does not exist in the workflow definition")]
    UnknownStage(String),

    #[error("transition from '{from}' to '{to}' is not permitted")]
    IllegalTransition { from: String, to: String },

    #[error("workflow has already been completed")]
    AlreadyCompleted,

    #[error("workflow is in terminal status {0} and cannot be mutated")]
    TerminalState(WorkflowStatus),

    #[error("concurrent modification detected, reload the instance and retry")]
    RevisionConflict,

    #[error("storage error: {0}")]
    Storage(String),
}

/// Errors from repository operations (used by trait definitions in tramita-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

impl From<RepositoryError> for WorkflowError {
    fn from(e: RepositoryError) -> Self {
        match e {
            RepositoryError::NotFound => WorkflowError::InstanceNotFound,
            RepositoryError::Conflict(_) => WorkflowError::RevisionConflict,
            other => WorkflowError::Storage(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_illegal_transition_names_both_stages() {
        let err = WorkflowError::IllegalTransition {
            from: "ANALISE".to_string(),
            to: "ENCERRADO".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("ANALISE"));
        assert!(msg.contains("ENCERRADO"));
    }

    #[test]
    fn test_invalid_status_carries_status() {
        let err = WorkflowError::InvalidStatus(WorkflowStatus::Paused);
        assert!(err.to_string().contains("PAUSED"));
    }

    #[test]
    fn test_repository_conflict_maps_to_revision_conflict() {
        let err: WorkflowError = RepositoryError::Conflict("revision".to_string()).into();
        assert!(matches!(err, WorkflowError::RevisionConflict));
    }
}
