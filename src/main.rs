//! Scriptly Server
//!
//! REST API turning registered command-line scripts into web forms and
//! running them as jobs.

use anyhow::Context;
use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use scriptly_server::{
    api,
    config::AppConfig,
    logging,
    repository::Repository,
    services::{realtime::RealtimeService, Services},
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let config = AppConfig::load().context("Failed to load configuration")?;
    let _log_guard = logging::init(&config.logging);

    tracing::info!("Starting Scriptly Server v{}", env!("CARGO_PKG_VERSION"));

    // Create database connection pool
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .connect(&config.database.url)
        .await
        .context("Failed to connect to database")?;

    tracing::info!("Connected to database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;

    tracing::info!("Database migrations completed");

    let realtime = match config.realtime.redis_url.as_deref() {
        Some(url) => match RealtimeService::new(Some(url)).await {
            Ok(realtime) => {
                tracing::info!("Connected to Redis, live job output enabled");
                realtime
            }
            Err(e) => {
                tracing::warn!("Redis unavailable ({}), job output goes to the database", e);
                RealtimeService::disabled()
            }
        },
        None => RealtimeService::disabled(),
    };

    tokio::fs::create_dir_all(config.storage.media_root())
        .await
        .with_context(|| format!("Failed to create media root {}", config.storage.media_root))?;

    let addr = SocketAddr::new(
        config.server.host.parse().context("Invalid host address")?,
        config.server.port,
    );
    let body_limit = config.server.max_upload_bytes;

    let repository = Repository::new(pool);
    let services = Services::new(repository, &config, realtime);

    let state = AppState {
        config: Arc::new(config),
        services: Arc::new(services),
    };

    let app = create_router(state, body_limit);

    tracing::info!("Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Create the application router with all routes
fn create_router(state: AppState, body_limit: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_v1 = Router::new()
        // Health check
        .route("/health", get(api::health::health_check))
        .route("/ready", get(api::health::readiness_check))
        // Authentication
        .route("/auth/login", post(api::auth::login))
        .route("/auth/me", get(api::auth::me))
        .route("/auth/api-keys", get(api::auth::list_api_keys).post(api::auth::create_api_key))
        .route("/auth/api-keys/:id", delete(api::auth::delete_api_key))
        // Script groups and forms
        .route("/groups", get(api::scripts::list_groups))
        .route("/groups/:id", get(api::scripts::get_group))
        .route("/scripts/search", get(api::scripts::search_scripts))
        .route("/scripts/submit", post(api::scripts::submit))
        .route("/scripts/:slug", get(api::scripts::get_script))
        .route("/scripts/:slug/versions", get(api::scripts::list_versions))
        // Administration
        .route("/admin/scripts", post(api::admin::add_script))
        // Jobs
        .route("/jobs/queues", get(api::jobs::all_queues))
        .route("/jobs/queue/global", get(api::jobs::global_queue))
        .route("/jobs/queue/user", get(api::jobs::user_queue))
        .route("/jobs/results", get(api::jobs::results))
        .route("/jobs/uuid/:uuid", get(api::jobs::get_job_by_uuid))
        .route("/jobs/:id", get(api::jobs::get_job))
        .route("/jobs/:id/command", post(api::jobs::job_command))
        // Files
        .route("/files/:id/download", get(api::files::download_file))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state);

    // OpenAPI documentation
    let openapi = api::openapi::create_openapi_router();

    Router::new()
        .nest("/api/v1", api_v1)
        .merge(openapi)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(CompressionLayer::new()),
        )
}
