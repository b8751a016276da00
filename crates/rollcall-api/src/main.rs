// Rollcall API server
// Decision: DATABASE_URL selects PostgreSQL storage; without it the server runs in memory
// Decision: promotions run on an in-process worker that drains before exit

mod api;
mod config;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, Method};
use axum::{extract::State, routing::get, Json, Router};
use rollcall_core::{
    AdmissionConfig, AdmissionService, AttendanceLedger, EventDirectory, InMemoryAttendanceLedger,
    InMemoryEventDirectory, PostgresAttendanceLedger, PostgresEventDirectory, PromotionCoordinator,
    PromotionQueue, PromotionWorker, PromotionWorkerConfig, TracingNotifier,
};
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ServerConfig;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    ledger: &'static str,
}

/// State for health endpoint
#[derive(Clone)]
struct HealthState {
    ledger: &'static str,
}

async fn health(State(state): State<HealthState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        ledger: state.ledger,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // RUST_LOG overrides the default filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("rollcall_api=debug,rollcall_core=debug,tower_http=debug")
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("rollcall-api starting...");

    let config = ServerConfig::from_env();

    let (ledger, directory, ledger_kind): (
        Arc<dyn AttendanceLedger>,
        Arc<dyn EventDirectory>,
        &'static str,
    ) = match &config.database_url {
        Some(database_url) => {
            let pool = PgPoolOptions::new()
                .max_connections(config.max_connections)
                .connect(database_url)
                .await
                .context("Failed to connect to database")?;
            tracing::info!("Connected to database");

            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .context("Failed to run migrations")?;

            let ledger: Arc<dyn AttendanceLedger> =
                Arc::new(PostgresAttendanceLedger::new(pool.clone()));
            let directory: Arc<dyn EventDirectory> = Arc::new(PostgresEventDirectory::new(pool));
            (ledger, directory, "postgres")
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory storage (state is lost on exit)");
            let ledger: Arc<dyn AttendanceLedger> = Arc::new(InMemoryAttendanceLedger::new());
            let directory: Arc<dyn EventDirectory> = Arc::new(InMemoryEventDirectory::new());
            (ledger, directory, "memory")
        }
    };

    let admission_config = AdmissionConfig::from_env();
    tracing::info!(
        lock_timeout_ms = admission_config.lock_timeout.as_millis() as u64,
        "Admission configured"
    );

    let coordinator = Arc::new(PromotionCoordinator::new(
        ledger.clone(),
        Arc::new(TracingNotifier),
        admission_config.lock_timeout,
    ));
    let (queue, receiver) = PromotionQueue::new();

    let worker_config = PromotionWorkerConfig::from_env();
    tracing::info!(
        worker_id = %worker_config.worker_id,
        max_concurrency = worker_config.max_concurrency,
        sweep_interval = ?worker_config.sweep_interval,
        "Promotion worker configured"
    );
    let worker = PromotionWorker::new(coordinator, directory.clone(), worker_config);
    worker
        .start(receiver)
        .context("Failed to start promotion worker")?;

    let service = Arc::new(AdmissionService::new(
        ledger,
        directory,
        queue,
        admission_config,
    ));

    if !config.api_prefix.is_empty() {
        tracing::info!(prefix = %config.api_prefix, "API prefix configured");
    }

    let cors_origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|s| s.parse().ok())
        .collect();

    if cors_origins.is_empty() {
        tracing::info!("CORS not configured (same-origin requests only)");
    } else {
        tracing::info!(origins = ?cors_origins, "CORS origins configured");
    }

    let attendance_state = api::attendance::AppState::new(service);
    let health_state = HealthState {
        ledger: ledger_kind,
    };

    let api_routes = Router::new().merge(api::attendance::routes(attendance_state));

    let app = Router::new()
        .route("/health", get(health).with_state(health_state))
        .merge(build_router_with_prefix(api_routes, &config.api_prefix));

    let app = if !cors_origins.is_empty() {
        app.layer(
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(cors_origins))
                .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
                .allow_headers([
                    header::CONTENT_TYPE,
                    header::ACCEPT,
                    header::ORIGIN,
                    header::HeaderName::from_static(api::common::USER_ID_HEADER),
                ])
                .allow_credentials(true),
        )
    } else {
        app
    };

    let app = app.layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .context("Failed to bind to address")?;
    tracing::info!("HTTP server listening on {}", config.bind_addr);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error");

    tracing::info!("HTTP server stopped, draining promotion worker");
    if let Err(e) = worker.shutdown().await {
        tracing::error!("Promotion worker did not stop cleanly: {}", e);
    }

    served
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}

fn build_router_with_prefix<S: Clone + Send + Sync + 'static>(
    api_routes: Router<S>,
    api_prefix: &str,
) -> Router<S> {
    if api_prefix.is_empty() {
        api_routes
    } else {
        Router::new().nest(api_prefix, api_routes)
    }
}
