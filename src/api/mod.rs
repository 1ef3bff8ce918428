//! HTTP surface: subscription CRUD, execution triggers, strategy and
//! settings administration.

pub mod auth;
pub mod execute;
pub mod settings;
pub mod state;
pub mod strategies;
pub mod tasks;

use axum::{
    Json, Router, middleware,
    routing::{get, post},
};

use crate::api::auth::ApiKeyGuard;
use crate::api::state::AppState;

#[derive(serde::Serialize)]
struct Health {
    status: &'static str,
}

async fn health() -> Json<Health> {
    Json(Health { status: "healthy" })
}

/// Assemble the full router with authentication applied to everything but
/// `GET /health`.
pub fn router(state: AppState, guard: ApiKeyGuard) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/tasks", post(tasks::create_task).get(tasks::list_tasks))
        .route(
            "/tasks/{id}",
            get(tasks::get_task)
                .patch(tasks::update_task)
                .delete(tasks::delete_task),
        )
        .route("/execute/batch", post(execute::execute_batch))
        .route("/execute/manual", post(execute::execute_manual))
        .route(
            "/api/strategies",
            get(strategies::list_strategies).post(strategies::create_strategy),
        )
        .route(
            "/api/strategies/{*slug}",
            get(strategies::get_strategy)
                .put(strategies::update_strategy)
                .delete(strategies::delete_strategy),
        )
        .route("/api/settings", get(settings::list_settings))
        .route(
            "/api/settings/{key}",
            get(settings::get_setting).put(settings::put_setting),
        )
        .layer(middleware::from_fn_with_state(guard, auth::auth_middleware))
        .with_state(state)
}
