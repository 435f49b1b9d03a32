//! Application error type mapping to HTTP status codes and envelope format.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use tramita_types::error::WorkflowError;

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    /// Engine-level workflow errors.
    Workflow(WorkflowError),
    /// Validation error on the request itself.
    Validation(String),
    /// Generic internal error.
    Internal(String),
}

impl From<WorkflowError> for AppError {
    fn from(e: WorkflowError) -> Self {
        AppError::Workflow(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Workflow(e) => {
                let (status, code) = match e {
                    WorkflowError::DefinitionNotFound => {
                        (StatusCode::NOT_FOUND, "DEFINITION_NOT_FOUND")
                    }
                    WorkflowError::InstanceNotFound => {
                        (StatusCode::NOT_FOUND, "INSTANCE_NOT_FOUND")
                    }
                    WorkflowError::DefinitionInactive => {
                        (StatusCode::UNPROCESSABLE_ENTITY, "DEFINITION_INACTIVE")
                    }
                    WorkflowError::DefinitionInvalid(_) => {
                        (StatusCode::BAD_REQUEST, "DEFINITION_INVALID")
                    }
                    WorkflowError::UnknownStage(_) => {
                        (StatusCode::UNPROCESSABLE_ENTITY, "UNKNOWN_STAGE")
                    }
                    WorkflowError::IllegalTransition { .. } => {
                        (StatusCode::UNPROCESSABLE_ENTITY, "ILLEGAL_TRANSITION")
                    }
                    WorkflowError::InvalidStatus(_) => {
                        (StatusCode::CONFLICT, "INVALID_STATUS")
                    }
                    WorkflowError::AlreadyCompleted => {
                        (StatusCode::CONFLICT, "ALREADY_COMPLETED")
                    }
                    WorkflowError::TerminalState(_) => {
                        (StatusCode::CONFLICT, "TERMINAL_STATE")
                    }
                    WorkflowError::RevisionConflict => {
                        (StatusCode::CONFLICT, "REVISION_CONFLICT")
                    }
                    WorkflowError::Storage(_) => {
                        (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR")
                    }
                };
                (status, code, e.to_string())
            }
            AppError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
            }
            AppError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg.clone())
            }
        };

        let body = json!({
            "data": null,
            "meta": {
                "request_id": "",
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "response_time_ms": 0
            },
            "errors": [{
                "code": code,
                "message": message,
            }]
        });

        (
            status,
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            body.to_string(),
        )
            .into_response()
    }
}
