use axum::Json;
use axum::http::StatusCode;
use serde_json::Value;

/// Structured JSON error body with an HTTP status, for synchronous
/// endpoints.
pub fn error(status: StatusCode, message: String) -> (StatusCode, Json<Value>) {
    (
        status,
        Json(serde_json::json!({
            "status": "error",
            "message": message
        })),
    )
}

/// Map a storage/service error string onto an HTTP status: conflicts and
/// missing rows get their own codes, everything else is a bad request.
pub fn service_error(message: String) -> (StatusCode, Json<Value>) {
    let status = if message.contains("not found") {
        StatusCode::NOT_FOUND
    } else if message.contains("already exists") {
        StatusCode::CONFLICT
    } else {
        StatusCode::BAD_REQUEST
    };
    error(status, message)
}
