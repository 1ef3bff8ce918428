//! Subscription task CRUD.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::api::state::AppState;
use crate::api_response::{error, service_error};
use crate::models::{Frequency, ResearchTask, ResearchTaskUpdate};

type ApiResult = Result<Json<Value>, (StatusCode, Json<Value>)>;

#[derive(Deserialize)]
pub struct CreateTaskBody {
    pub email: String,
    pub research_topic: String,
    pub frequency: Frequency,
    #[serde(default)]
    pub schedule_time: Option<String>,
}

#[derive(Deserialize)]
pub struct TaskListQuery {
    pub email: Option<String>,
}

fn to_json(task: &ResearchTask) -> Json<Value> {
    Json(serde_json::to_value(task).unwrap_or(Value::Null))
}

// POST /tasks
pub async fn create_task(
    State(state): State<AppState>,
    Json(body): Json<CreateTaskBody>,
) -> ApiResult {
    if body.email.is_empty() || body.research_topic.is_empty() {
        return Err(error(
            StatusCode::BAD_REQUEST,
            "email and research_topic are required".into(),
        ));
    }
    let mut task = ResearchTask::new(body.email, body.research_topic, body.frequency);
    task.schedule_time = body.schedule_time;
    state
        .storage
        .tasks
        .create(&task)
        .map_err(|e| service_error(e.to_string()))?;
    Ok(to_json(&task))
}

// GET /tasks?email=
pub async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<TaskListQuery>,
) -> ApiResult {
    let Some(email) = query.email else {
        return Err(error(
            StatusCode::BAD_REQUEST,
            "the 'email' query parameter is required".into(),
        ));
    };
    let tasks = state
        .storage
        .tasks
        .list_by_email(&email)
        .map_err(|e| service_error(e.to_string()))?;
    Ok(Json(serde_json::to_value(tasks).unwrap_or(Value::Null)))
}

// GET /tasks/{id}
pub async fn get_task(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult {
    let task = state
        .storage
        .tasks
        .get(&id)
        .map_err(|e| service_error(e.to_string()))?
        .ok_or_else(|| error(StatusCode::NOT_FOUND, format!("task '{id}' not found")))?;
    Ok(to_json(&task))
}

// PATCH /tasks/{id}
pub async fn update_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(update): Json<ResearchTaskUpdate>,
) -> ApiResult {
    let mut task = state
        .storage
        .tasks
        .get(&id)
        .map_err(|e| service_error(e.to_string()))?
        .ok_or_else(|| error(StatusCode::NOT_FOUND, format!("task '{id}' not found")))?;
    task.apply(update);
    state
        .storage
        .tasks
        .update(&task)
        .map_err(|e| service_error(e.to_string()))?;
    Ok(to_json(&task))
}

// DELETE /tasks/{id}
pub async fn delete_task(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult {
    state
        .storage
        .tasks
        .remove(&id)
        .map_err(|e| service_error(e.to_string()))?;
    Ok(Json(serde_json::json!({"success": true})))
}
