//! Statistics and maintenance query handlers.

use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StatisticsQuery {
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub to: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct StaleQuery {
    #[serde(default)]
    pub threshold_minutes: Option<i64>,
}

/// GET /api/v1/definitions/:id/statistics - Aggregate counts and timings.
pub async fn get_statistics(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<StatisticsQuery>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let stats = state
        .engine
        .get_statistics(&id, query.from, query.to)
        .await?;
    let elapsed = start.elapsed().as_millis() as u64;

    let stats_json = serde_json::to_value(&stats).unwrap();
    let resp = ApiResponse::success(stats_json, request_id, elapsed)
        .with_link("definition", &format!("/api/v1/definitions/{id}"));

    Ok(Json(resp))
}

/// GET /api/v1/definitions/:id/stale - ACTIVE instances untouched for at
/// least the threshold, for maintenance/alerting jobs.
pub async fn find_stale(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<StaleQuery>,
) -> Result<Json<ApiResponse<Vec<serde_json::Value>>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let threshold = query
        .threshold_minutes
        .unwrap_or(state.config.default_stale_threshold_minutes);
    if threshold <= 0 {
        return Err(AppError::Validation(
            "threshold_minutes must be positive".to_string(),
        ));
    }

    let stale = state.engine.find_stale_workflows(&id, threshold).await?;
    let elapsed = start.elapsed().as_millis() as u64;

    let stale_json: Vec<serde_json::Value> = stale
        .iter()
        .map(|i| serde_json::to_value(i).unwrap())
        .collect();

    let resp = ApiResponse::success(stale_json, request_id, elapsed)
        .with_link("definition", &format!("/api/v1/definitions/{id}"));

    Ok(Json(resp))
}
