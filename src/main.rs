#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::sync::Arc;

use axum::http::{Method, header};
use tower_http::cors::CorsLayer;

use briefcast::adapters::{AdapterRegistry, ExaAdapter, LlmAnalyzerAdapter, SonarAdapter};
use briefcast::api::auth::ApiKeyGuard;
use briefcast::api::state::AppState;
use briefcast::config::ServerConfig;
use briefcast::engine::WorkflowEngine;
use briefcast::llm::LlmFactory;
use briefcast::services::{BatchExecutor, SettingsService, StrategyCatalog, WebhookSender};
use briefcast::storage::Storage;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,briefcast=debug".into()),
        )
        .with_target(false)
        .init();

    let config = ServerConfig::load()?;
    tracing::info!(db = %config.db_path.display(), "starting briefcast");

    let storage = Arc::new(Storage::new(&config.db_path)?);
    let catalog = Arc::new(StrategyCatalog::open(
        storage.strategies.clone(),
        &config.strategies_dir,
    )?);
    let settings = SettingsService::new(storage.settings.clone());

    let llm = Arc::new(LlmFactory::from_config(&config.llm, config.llm_timeout));
    let mut registry = AdapterRegistry::new();
    registry.register(ExaAdapter::new(&config.exa));
    registry.register(SonarAdapter::new(&config.sonar));
    registry.register(LlmAnalyzerAdapter::new(llm.clone()));
    let registry = Arc::new(registry);

    let engine = Arc::new(WorkflowEngine::new(
        catalog.clone(),
        registry,
        llm,
        storage.clone(),
        settings.clone(),
        config.workflow_deadline,
    ));
    let batch = Arc::new(BatchExecutor::new(
        engine,
        storage.tasks.clone(),
        WebhookSender::new(),
        config.max_concurrency,
    ));

    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::PATCH,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::HeaderName::from_static("x-api-key")]);

    let state = AppState {
        storage,
        catalog,
        batch,
        settings,
    };
    let guard = ApiKeyGuard::new(config.api_key.as_deref());
    let app = briefcast::api::router(state, guard).layer(cors);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|err| anyhow::anyhow!("failed to bind to {addr}: {err}"))?;
    tracing::info!("briefcast listening on http://{addr}");

    axum::serve(listener, app)
        .await
        .map_err(|err| anyhow::anyhow!("server error: {err}"))?;
    Ok(())
}
