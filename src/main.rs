//! Dataset Access API - Main Application Entry Point
//!
//! This is a REST API server that exposes a fixed catalog of practice datasets held in an external warehouse. Callers can list the catalog, inspect live table statistics, download rows as JSON, CSV or XLSX, and run filtered queries, subject to per-key and per-IP rate limits.
//!
//! # Architecture
//!
//! - **Web Framework**: Axum (async HTTP server)
//! - **Databases**: PostgreSQL with sqlx (service database for API keys, read-only warehouse for datasets)
//! - **Authentication**: API keys with SHA-256 hashing for dataset routes, session tokens for key management
//! - **Rate Limiting**: In-memory fixed windows per tier
//! - **Format**: JSON requests/responses, CSV and XLSX exports
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment variables
//! 2. Create service database pool and run migrations
//! 3. Create warehouse pool
//! 4. Build HTTP router with routes and middleware
//! 5. Start server on configured port

mod config;
mod db;
mod error;
mod handlers;
mod middleware;
mod models;
mod services;
mod state;

#[cfg(test)]
mod test_utils;

use std::{net::SocketAddr, sync::Arc};

use tracing_subscriber::EnvFilter;

use axum::{
    Router,
    http::Method,
    middleware as axum_middleware,
    routing::{delete, get, post},
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    services::{api_key_service::PgApiKeyStore, warehouse::PgWarehouse},
    state::AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging with tracing subscriber. Reads RUST_LOG environment variable (defaults to "info" level)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // Load configuration
    let config = config::Config::from_env()?;
    tracing::info!("Configuration loaded");

    // Service database: API keys
    let pool = db::create_pool(&config.database_url).await?;
    tracing::info!("Database pool created");

    db::run_migrations(&pool).await?;
    tracing::info!("Database migrations complete");

    // Dataset warehouse
    let warehouse_pool = db::create_warehouse_pool(
        &config.warehouse_url,
        config.warehouse_max_connections,
        config.warehouse_timeout_secs,
    )
    .await?;
    tracing::info!(
        max_connections = config.warehouse_max_connections,
        timeout_secs = config.warehouse_timeout_secs,
        "Warehouse pool created"
    );

    let port = config.server_port;
    let state = AppState::new(
        config,
        Arc::new(PgApiKeyStore::new(pool)),
        Arc::new(PgWarehouse::new(warehouse_pool)),
    );

    let app = build_router(state);

    // Bind to network address and start server
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    // Peer addresses feed the anonymous download limits
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Build the HTTP router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    // Key management requires a signed-in user
    let session_routes = Router::new()
        .route(
            "/api/keys",
            post(handlers::api_keys::create_key).get(handlers::api_keys::list_keys),
        )
        .route("/api/keys/{id}", delete(handlers::api_keys::revoke_key))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::session_middleware,
        ));

    // Dataset routes resolve API keys and rate limits inside each handler
    let dataset_routes = Router::new()
        .route("/api/datasets", get(handlers::datasets::list_datasets))
        .route("/api/datasets/{id}", get(handlers::datasets::get_dataset))
        .route(
            "/api/datasets/{id}/download",
            get(handlers::datasets::download_dataset),
        )
        .route(
            "/api/datasets/{id}/query",
            post(handlers::datasets::query_dataset),
        );

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers(Any)
        .expose_headers(Any);

    Router::new()
        // Public routes (no authentication required)
        .route("/health", get(handlers::health::health_check))
        .merge(dataset_routes)
        .merge(session_routes)
        .layer(cors)
        // Add distributed tracing middleware for observability
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
