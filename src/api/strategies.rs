//! Strategy catalog administration.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use serde_json::Value;

use crate::api::state::AppState;
use crate::api_response::{error, service_error};
use crate::models::Strategy;

type ApiResult = Result<Json<Value>, (StatusCode, Json<Value>)>;

#[derive(Deserialize)]
pub struct StrategyListQuery {
    #[serde(default)]
    pub active_only: bool,
}

// GET /api/strategies
pub async fn list_strategies(
    State(state): State<AppState>,
    Query(query): Query<StrategyListQuery>,
) -> ApiResult {
    let records = state.catalog.list(query.active_only);
    Ok(Json(serde_json::to_value(records).unwrap_or(Value::Null)))
}

// GET /api/strategies/{slug}
pub async fn get_strategy(State(state): State<AppState>, Path(slug): Path<String>) -> ApiResult {
    let record = state
        .catalog
        .get(&slug)
        .ok_or_else(|| error(StatusCode::NOT_FOUND, format!("strategy '{slug}' not found")))?;
    Ok(Json(serde_json::to_value(record).unwrap_or(Value::Null)))
}

// POST /api/strategies
pub async fn create_strategy(
    State(state): State<AppState>,
    Json(strategy): Json<Strategy>,
) -> ApiResult {
    let record = state
        .catalog
        .create(&strategy)
        .map_err(|e| service_error(e.to_string()))?;
    Ok(Json(serde_json::to_value(record).unwrap_or(Value::Null)))
}

// PUT /api/strategies/{slug}
pub async fn update_strategy(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Json(strategy): Json<Strategy>,
) -> ApiResult {
    let record = state
        .catalog
        .update(&slug, &strategy)
        .map_err(|e| service_error(e.to_string()))?;
    Ok(Json(serde_json::to_value(record).unwrap_or(Value::Null)))
}

// DELETE /api/strategies/{slug}
pub async fn delete_strategy(State(state): State<AppState>, Path(slug): Path<String>) -> ApiResult {
    state
        .catalog
        .delete(&slug)
        .map_err(|e| service_error(e.to_string()))?;
    Ok(Json(serde_json::json!({"success": true})))
}
