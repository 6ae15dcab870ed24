use anyhow::Result;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::{DefaultMakeSpan, TraceLayer},
};
use tracing::info;

mod config;
mod database;
mod document;
mod handlers;
mod models;
mod services;
mod state;
mod utils;

use config::AppConfig;
use database::DbPool;
use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "info,rag_core=debug".to_string()))
        .with_target(true)
        .with_thread_ids(true)
        .json()
        .init();

    info!("starting rag-core");

    let config = AppConfig::load()?;
    info!("configuration loaded");

    let db_pool = DbPool::connect(&config.database).await?;
    info!("database connection established");

    let server_config = config.server.clone();
    let state = AppState::new(config, db_pool);

    let app = build_router(state, &server_config);

    let addr = SocketAddr::from((server_config.host.parse::<std::net::IpAddr>()?, server_config.port));
    info!(%addr, "server listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;

    Ok(())
}

fn build_router(state: AppState, server_config: &config::ServerConfig) -> Router {
    let cors_origins: Vec<_> = server_config
        .cors_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(cors_origins))
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any);

    let documents_routes = Router::new()
        .route("/", post(handlers::documents::upload_document).get(handlers::documents::list_documents))
        .route(
            "/{document_id}",
            get(handlers::documents::get_document).delete(handlers::documents::delete_document),
        );

    let chats_routes = Router::new()
        .route("/", post(handlers::chat::create_chat))
        .route("/{chat_id}", get(handlers::chat::get_history).delete(handlers::chat::delete_chat))
        .route("/{chat_id}/messages", post(handlers::chat::send_message))
        .route("/{chat_id}/messages/stream", post(handlers::chat::send_message_stream))
        .route("/{chat_id}/branches", post(handlers::chat::create_branch))
        .route("/{chat_id}/branches/{name}/switch", post(handlers::chat::switch_branch));

    let api_routes = Router::new().nest("/documents", documents_routes).nest("/chats", chats_routes);

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/health/ready", get(handlers::health::readiness_check))
        .nest("/api", api_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::default().include_headers(true)))
        .layer(DefaultBodyLimit::max((server_config.max_upload_mb * 1024 * 1024) as usize))
        .with_state(state)
}
