//! Execution endpoints: scheduled batches and one-off manual runs.

use axum::{Json, extract::State, http::StatusCode};
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;

use crate::api::state::AppState;
use crate::api_response::error;
use crate::models::Frequency;

#[derive(Deserialize)]
pub struct BatchBody {
    pub frequency: Frequency,
    pub callback_url: String,
}

#[derive(Deserialize)]
pub struct ManualBody {
    pub research_topic: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub callback_url: Option<String>,
    #[serde(default)]
    pub nocache: bool,
}

// POST /execute/batch
//
// Fire-and-forget: always answers 200 with a structured status; execution
// proceeds in the background and per-task outcomes travel over webhooks.
pub async fn execute_batch(State(state): State<AppState>, Json(body): Json<BatchBody>) -> Json<Value> {
    match state.batch.start_batch(body.frequency, body.callback_url) {
        Ok(started) => Json(serde_json::to_value(started).unwrap_or(Value::Null)),
        Err(e) => Json(serde_json::json!({
            "status": "failed",
            "error": e.to_string(),
        })),
    }
}

// POST /execute/manual
pub async fn execute_manual(
    State(state): State<AppState>,
    Json(body): Json<ManualBody>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    if body.research_topic.is_empty() {
        return Err(error(
            StatusCode::BAD_REQUEST,
            "research_topic is required".into(),
        ));
    }
    let email = body.email.unwrap_or_default();

    if let Some(callback_url) = body.callback_url {
        let batch = state.batch.clone();
        let topic = body.research_topic;
        tokio::spawn(async move {
            batch
                .execute_manual_with_callback(topic, email, callback_url)
                .await;
        });
        return Ok(Json(serde_json::json!({
            "status": "running",
            "started_at": Utc::now().to_rfc3339(),
        })));
    }

    let payload = state
        .batch
        .execute_manual(&body.research_topic, &email, body.nocache)
        .await;
    Ok(Json(payload))
}
