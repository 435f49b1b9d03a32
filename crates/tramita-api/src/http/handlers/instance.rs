//! Workflow instance handlers for the REST API.
//!
//! Department case services call these at each business milestone; the
//! `to_stage`/`action` vocabularies are defined per department and are
//! opaque strings to the engine.

use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use tramita_types::instance::{Actor, CreateInstanceRequest, WorkflowStatus};

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request DTOs
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct AttachEntityRequest {
    pub entity_id: String,
}

#[derive(Debug, Deserialize)]
pub struct TransitionRequest {
    pub to_stage: String,
    pub action: String,
    pub user_id: String,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub attachments: Option<serde_json::Value>,
}

/// Shared body for the lifecycle operations (pause, resume, complete,
/// cancel, error, recover). `notes` doubles as reason/error message.
#[derive(Debug, Deserialize)]
pub struct LifecycleRequest {
    pub user_id: String,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl LifecycleRequest {
    fn actor(&self) -> Actor {
        Actor {
            user_id: self.user_id.clone(),
            user_name: self.user_name.clone(),
        }
    }
}

/// Query parameters for instance lookup. Exactly one lookup family must be
/// present: entity, citizen, or definition+stage.
#[derive(Debug, Deserialize)]
pub struct InstanceListQuery {
    #[serde(default)]
    pub entity_type: Option<String>,
    #[serde(default)]
    pub entity_id: Option<String>,
    #[serde(default)]
    pub citizen_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub definition_id: Option<Uuid>,
    #[serde(default)]
    pub stage: Option<String>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /api/v1/instances - Create a new workflow instance.
pub async fn create_instance(
    State(state): State<AppState>,
    Json(body): Json<CreateInstanceRequest>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let instance = state.engine.create_instance(body).await?;
    let elapsed = start.elapsed().as_millis() as u64;

    let instance_json = serde_json::to_value(&instance).unwrap();
    let resp = ApiResponse::success(instance_json, request_id, elapsed)
        .with_link("self", &format!("/api/v1/instances/{}", instance.id))
        .with_link("history", &format!("/api/v1/instances/{}/history", instance.id));

    Ok(Json(resp))
}

/// GET /api/v1/instances/:id - Get an instance by ID.
pub async fn get_instance(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let instance = state.engine.find_by_id(&id).await?;
    let elapsed = start.elapsed().as_millis() as u64;

    let instance_json = serde_json::to_value(&instance).unwrap();
    let resp = ApiResponse::success(instance_json, request_id, elapsed)
        .with_link("self", &format!("/api/v1/instances/{}", instance.id))
        .with_link("history", &format!("/api/v1/instances/{}/history", instance.id));

    Ok(Json(resp))
}

/// GET /api/v1/instances - Look up instances by entity, citizen, or stage.
pub async fn list_instances(
    State(state): State<AppState>,
    Query(query): Query<InstanceListQuery>,
) -> Result<Json<ApiResponse<Vec<serde_json::Value>>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let instances = match (&query.entity_type, &query.citizen_id, &query.definition_id) {
        (Some(entity_type), None, None) => {
            let entity_id = query.entity_id.as_deref().ok_or_else(|| {
                AppError::Validation("entity_type requires entity_id".to_string())
            })?;
            state.engine.find_by_entity(entity_type, entity_id).await?
        }
        (None, Some(citizen_id), None) => {
            let status = query
                .status
                .as_deref()
                .map(|s| s.parse::<WorkflowStatus>())
                .transpose()
                .map_err(AppError::Validation)?;
            state.engine.find_by_citizen(citizen_id, status).await?
        }
        (None, None, Some(definition_id)) => {
            let stage = query.stage.as_deref().ok_or_else(|| {
                AppError::Validation("definition_id requires stage".to_string())
            })?;
            state.engine.find_by_stage(definition_id, stage).await?
        }
        _ => {
            return Err(AppError::Validation(
                "specify exactly one of entity_type+entity_id, citizen_id, or definition_id+stage"
                    .to_string(),
            ));
        }
    };
    let elapsed = start.elapsed().as_millis() as u64;

    let instances_json: Vec<serde_json::Value> = instances
        .iter()
        .map(|i| serde_json::to_value(i).unwrap())
        .collect();

    let resp = ApiResponse::success(instances_json, request_id, elapsed)
        .with_link("self", "/api/v1/instances");

    Ok(Json(resp))
}

/// PUT /api/v1/instances/:id/entity - Backfill the owning record's id
/// (two-phase link).
pub async fn attach_entity(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<AttachEntityRequest>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let instance = state.engine.attach_entity(&id, &body.entity_id).await?;
    let elapsed = start.elapsed().as_millis() as u64;

    let instance_json = serde_json::to_value(&instance).unwrap();
    let resp = ApiResponse::success(instance_json, request_id, elapsed)
        .with_link("self", &format!("/api/v1/instances/{}", instance.id));

    Ok(Json(resp))
}

/// POST /api/v1/instances/:id/transition - Move to another stage.
pub async fn transition(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<TransitionRequest>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let actor = Actor {
        user_id: body.user_id,
        user_name: body.user_name,
    };
    let instance = state
        .engine
        .transition(&id, &body.to_stage, &body.action, &actor, body.notes, body.attachments)
        .await?;
    let elapsed = start.elapsed().as_millis() as u64;

    let instance_json = serde_json::to_value(&instance).unwrap();
    let resp = ApiResponse::success(instance_json, request_id, elapsed)
        .with_link("self", &format!("/api/v1/instances/{}", instance.id))
        .with_link("history", &format!("/api/v1/instances/{}/history", instance.id));

    Ok(Json(resp))
}

macro_rules! lifecycle_handler {
    ($name:ident, $method:ident, $doc:literal) => {
        #[doc = $doc]
        pub async fn $name(
            State(state): State<AppState>,
            Path(id): Path<Uuid>,
            Json(body): Json<LifecycleRequest>,
        ) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
            let start = Instant::now();
            let request_id = Uuid::now_v7().to_string();

            let instance = state
                .engine
                .$method(&id, &body.actor(), body.notes.clone())
                .await?;
            let elapsed = start.elapsed().as_millis() as u64;

            let instance_json = serde_json::to_value(&instance).unwrap();
            let resp = ApiResponse::success(instance_json, request_id, elapsed)
                .with_link("self", &format!("/api/v1/instances/{}", instance.id));

            Ok(Json(resp))
        }
    };
}

lifecycle_handler!(pause, pause, "POST /api/v1/instances/:id/pause");
lifecycle_handler!(resume, resume, "POST /api/v1/instances/:id/resume");
lifecycle_handler!(complete, complete, "POST /api/v1/instances/:id/complete");
lifecycle_handler!(cancel, cancel, "POST /api/v1/instances/:id/cancel");
lifecycle_handler!(register_error, register_error, "POST /api/v1/instances/:id/error");
lifecycle_handler!(recover, recover, "POST /api/v1/instances/:id/recover");

/// GET /api/v1/instances/:id/history - Full audit trail, oldest first.
pub async fn get_history(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Vec<serde_json::Value>>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let history = state.engine.get_history(&id).await?;
    let elapsed = start.elapsed().as_millis() as u64;

    let history_json: Vec<serde_json::Value> = history
        .iter()
        .map(|e| serde_json::to_value(e).unwrap())
        .collect();

    let resp = ApiResponse::success(history_json, request_id, elapsed)
        .with_link("instance", &format!("/api/v1/instances/{id}"));

    Ok(Json(resp))
}
