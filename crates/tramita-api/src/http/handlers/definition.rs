//! Workflow definition handlers for the REST API.

use std::time::Instant;

use axum::extract::{Path, State};
use axum::Json;
use uuid::Uuid;

use tramita_types::definition::CreateDefinitionRequest;

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// POST /api/v1/definitions - Create a new workflow definition.
pub async fn create_definition(
    State(state): State<AppState>,
    Json(body): Json<CreateDefinitionRequest>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let def = state.engine.create_definition(body).await?;
    let elapsed = start.elapsed().as_millis() as u64;

    let def_json = serde_json::to_value(&def).unwrap();
    let resp = ApiResponse::success(def_json, request_id, elapsed)
        .with_link("self", &format!("/api/v1/definitions/{}", def.id))
        .with_link("statistics", &format!("/api/v1/definitions/{}/statistics", def.id));

    Ok(Json(resp))
}

/// GET /api/v1/definitions - List all definitions.
pub async fn list_definitions(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<serde_json::Value>>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let defs = state.engine.list_definitions().await?;
    let elapsed = start.elapsed().as_millis() as u64;

    let defs_json: Vec<serde_json::Value> = defs
        .iter()
        .map(|d| serde_json::to_value(d).unwrap())
        .collect();

    let resp = ApiResponse::success(defs_json, request_id, elapsed)
        .with_link("self", "/api/v1/definitions");

    Ok(Json(resp))
}

/// GET /api/v1/definitions/:id - Get a definition by ID.
pub async fn get_definition(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let def = state.engine.get_definition(&id).await?;
    let elapsed = start.elapsed().as_millis() as u64;

    let def_json = serde_json::to_value(&def).unwrap();
    let resp = ApiResponse::success(def_json, request_id, elapsed)
        .with_link("self", &format!("/api/v1/definitions/{}", def.id));

    Ok(Json(resp))
}

/// POST /api/v1/definitions/:id/activate - Allow new instances.
pub async fn activate_definition(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    set_active(state, id, true).await
}

/// POST /api/v1/definitions/:id/deactivate - Block new instances.
/// Running instances keep transitioning.
pub async fn deactivate_definition(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    set_active(state, id, false).await
}

async fn set_active(
    state: AppState,
    id: Uuid,
    is_active: bool,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let def = state.engine.set_definition_active(&id, is_active).await?;
    let elapsed = start.elapsed().as_millis() as u64;

    let def_json = serde_json::to_value(&def).unwrap();
    let resp = ApiResponse::success(def_json, request_id, elapsed)
        .with_link("self", &format!("/api/v1/definitions/{}", def.id));

    Ok(Json(resp))
}
