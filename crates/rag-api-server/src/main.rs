use anyhow::Result;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    cors::CorsLayer,
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};
use tracing::info;

mod config;
mod database;
mod domain;
mod handlers;
mod security;
mod services;
mod state;
mod transport;
mod utils;

use config::Settings;
use database::{DbPool, Repository};
use security::{RateLimiter, WorkspaceGuard};
use services::{
    EmbedCodeIssuer, EmbeddingService, FsStorage, GeneratorAdapter, QuotaManager, RagOrchestrator,
    RerankService, RetrievalEngine, VectorStore,
};
use state::AppState;
use transport::{widget::WidgetState, WidgetHub};
use utils::limiters::Limiters;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,rag_api_server=debug".to_string()),
        )
        .with_target(true)
        .with_thread_ids(true)
        .json()
        .init();

    info!("starting rag api server");

    let settings = Settings::load()?;
    info!("configuration loaded");

    let db_pool = DbPool::new(&settings.database).await?;
    info!("database connection established");

    let repository = Arc::new(Repository::new(db_pool));
    let limiters = Arc::new(Limiters::new(&settings.limits));

    let embedding_service = Arc::new(EmbeddingService::new(
        settings.embedding.clone(),
        limiters.clone(),
    ));
    let vector_store = Arc::new(VectorStore::new(repository.clone(), limiters.clone()));
    let rerank_service = Arc::new(RerankService::new(settings.rerank.clone()));
    let retrieval = Arc::new(RetrievalEngine::new(
        repository.clone(),
        embedding_service.clone(),
        vector_store.clone(),
        rerank_service,
        settings.retrieval.clone(),
    ));
    let generator = Arc::new(GeneratorAdapter::new(
        settings.generator.clone(),
        limiters.clone(),
    ));
    let quota = Arc::new(QuotaManager::new(repository.clone()));
    let orchestrator = Arc::new(RagOrchestrator::new(
        repository.clone(),
        retrieval,
        generator,
        quota,
        settings.retrieval.max_context_tokens,
    ));
    let embed_issuer = Arc::new(EmbedCodeIssuer::new(repository.clone()));
    let workspace_guard = Arc::new(WorkspaceGuard::new(repository.clone()));
    let storage = Arc::new(FsStorage::new(&settings.storage));

    let app_state = AppState {
        repository: repository.clone(),
        workspace_guard,
        orchestrator: orchestrator.clone(),
        embed_issuer: embed_issuer.clone(),
        storage,
        settings: settings.clone(),
    };

    let widget_state = Arc::new(WidgetState {
        embed_issuer,
        orchestrator,
        repository,
        hub: Arc::new(WidgetHub::new()),
        rate_limiter: Arc::new(RateLimiter::new(settings.widget.rate_limit_per_minute)),
    });

    let app = build_router(app_state, widget_state);

    let addr = SocketAddr::from((
        settings.server.host.parse::<std::net::IpAddr>()?,
        settings.server.port,
    ));

    info!(%addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

fn build_router(app_state: AppState, widget_state: Arc<WidgetState>) -> Router {
    let public_routes = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/health/ready", get(handlers::health::readiness_check))
        .route("/widget/{key}", get(handlers::embed_script::widget_script));

    let api_routes = Router::new()
        .route(
            "/api/workspaces/{workspace_id}/documents",
            post(handlers::documents::upload_document).get(handlers::documents::list_documents),
        )
        .route(
            "/api/workspaces/{workspace_id}/documents/{document_id}",
            get(handlers::documents::get_document),
        )
        .route(
            "/api/workspaces/{workspace_id}/sessions",
            post(handlers::query::create_session),
        )
        .route(
            "/api/workspaces/{workspace_id}/sessions/{session_id}/query",
            post(handlers::query::query_session),
        )
        .route(
            "/api/workspaces/{workspace_id}/sessions/{session_id}/messages",
            get(handlers::query::list_messages),
        )
        .route(
            "/api/workspaces/{workspace_id}/embed-codes",
            post(handlers::embed_codes::issue_embed_code).get(handlers::embed_codes::list_embed_codes),
        )
        .route(
            "/api/workspaces/{workspace_id}/embed-codes/{embed_id}",
            delete(handlers::embed_codes::revoke_embed_code),
        )
        .route(
            "/api/workspaces/{workspace_id}/embed-codes/{embed_id}/rotate",
            post(handlers::embed_codes::rotate_embed_code),
        )
        .layer(middleware::from_fn(security::request_context_middleware));

    let widget_routes = Router::new()
        .route("/widget/ws", get(transport::widget::ws_handler))
        .with_state(widget_state);

    public_routes
        .merge(api_routes)
        .with_state(app_state)
        .merge(widget_routes)
        .layer(
            CorsLayer::permissive()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(true)),
        )
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(DefaultBodyLimit::max(100 * 1024 * 1024))
}
