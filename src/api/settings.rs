//! Global settings administration.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Deserialize;
use serde_json::Value;

use crate::api::state::AppState;
use crate::api_response::{error, service_error};

type ApiResult = Result<Json<Value>, (StatusCode, Json<Value>)>;

#[derive(Deserialize)]
pub struct PutSettingBody {
    pub value: Value,
}

// GET /api/settings
pub async fn list_settings(State(state): State<AppState>) -> ApiResult {
    let settings = state
        .settings
        .list()
        .map_err(|e| service_error(e.to_string()))?;
    Ok(Json(serde_json::to_value(settings).unwrap_or(Value::Null)))
}

// GET /api/settings/{key}
pub async fn get_setting(State(state): State<AppState>, Path(key): Path<String>) -> ApiResult {
    let setting = state
        .settings
        .get(&key)
        .map_err(|e| service_error(e.to_string()))?
        .ok_or_else(|| error(StatusCode::NOT_FOUND, format!("setting '{key}' not found")))?;
    Ok(Json(serde_json::to_value(setting).unwrap_or(Value::Null)))
}

// PUT /api/settings/{key}
pub async fn put_setting(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(body): Json<PutSettingBody>,
) -> ApiResult {
    let setting = state
        .settings
        .put(&key, body.value)
        .map_err(|e| service_error(e.to_string()))?;
    Ok(Json(serde_json::to_value(setting).unwrap_or(Value::Null)))
}
