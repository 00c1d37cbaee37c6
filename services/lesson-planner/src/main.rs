//! Lesson Planner
//!
//! Single-binary HTTP service that:
//! 1. Checks teachers against an email allow-list
//! 2. Builds a curriculum-aware prompt from the plan form
//! 3. Generates the plan through the key-rotating generation controller
//! 4. Keeps a history of generated plans

mod admin;
mod api;
mod backend;
mod catalog;
mod config;
mod error;
mod metrics;
mod prompt;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::{MatchedPath, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use generation::GenerationController;
use key_pool::{CredentialPool, FilePool, RemotePool};
use metrics_exporter_prometheus::PrometheusHandle;
use provider::GeminiProvider;
use remote_db::RemoteDb;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::backend::{Backend, MemoryBackend, RemoteBackend};
use crate::config::{Config, PoolBackend};

/// How long in-flight requests get to finish after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Process-lifetime counters for the health endpoint.
#[derive(Clone)]
struct ServiceMetrics {
    requests_total: Arc<AtomicU64>,
    in_flight: Arc<AtomicU64>,
    started_at: Instant,
}

impl ServiceMetrics {
    fn new() -> Self {
        Self {
            requests_total: Arc::new(AtomicU64::new(0)),
            in_flight: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }
}

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    controller: Arc<GenerationController>,
    backend: Arc<dyn Backend>,
    admins: Arc<[String]>,
    max_attempts: u32,
    metrics: ServiceMetrics,
    prometheus: PrometheusHandle,
}

impl AppState {
    fn is_admin(&self, email: &str) -> bool {
        self.admins.iter().any(|a| a == email)
    }
}

/// Build the axum router with all routes and shared state.
///
/// `max_connections` bounds in-flight requests across every route together.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/api/login", post(api::login))
        .route("/api/catalog", get(api::get_catalog))
        .route("/api/plans", get(api::list_plans).post(api::create_plan))
        .route("/api/plans/{id}", delete(api::delete_plan))
        .route("/admin/users", get(admin::list_users).post(admin::add_user))
        .route("/admin/users/{id}", delete(admin::delete_user))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            track_requests,
        ))
        .layer(tower::limit::GlobalConcurrencyLimitLayer::new(
            max_connections,
        ))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting lesson-planner");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle = metrics::install_recorder();

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.server.listen_addr,
        pool = ?config.pool.backend,
        database = config.database.is_some(),
        model = %config.generation.model,
        max_attempts = config.generation.max_attempts,
        admins = config.server.admin_emails.len(),
        "configuration loaded"
    );

    let client = reqwest::Client::new();

    let db = match &config.database {
        Some(database) => {
            let key = database
                .api_key
                .clone()
                .context("database api key not resolved")?;
            Some(RemoteDb::new(client.clone(), database.url.clone(), key))
        }
        None => None,
    };

    let backend: Arc<dyn Backend> = match &db {
        Some(db) => Arc::new(RemoteBackend::new(db.clone())),
        None => {
            warn!("no [database] configured, plans and allow-list are kept in memory");
            Arc::new(MemoryBackend::new())
        }
    };

    let pool: Arc<dyn CredentialPool> = match config.pool.backend {
        PoolBackend::Remote => Arc::new(RemotePool::new(
            db.clone()
                .context("remote key pool requires a [database] section")?,
        )),
        PoolBackend::File => {
            let path = config
                .pool
                .file
                .clone()
                .context("file key pool requires pool.file")?;
            let pool = FilePool::load(path.clone(), config.pool.reactivate_after())
                .await
                .with_context(|| format!("failed to load key file {}", path.display()))?;
            Arc::new(pool)
        }
    };

    let provider = GeminiProvider::new(client)
        .with_base_url(config.generation.base_url.clone())
        .with_model(config.generation.model.clone());

    let controller = GenerationController::new(pool, Arc::new(provider))
        .with_attempt_timeout(config.generation.attempt_timeout());

    let service_metrics = ServiceMetrics::new();
    let state = AppState {
        controller: Arc::new(controller),
        backend,
        admins: config.server.admin_emails.clone().into(),
        max_attempts: config.generation.max_attempts,
        metrics: service_metrics.clone(),
        prometheus: prometheus_handle,
    };

    let app = build_router(state, config.server.max_connections);

    let listen_addr = config.server.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    // The drain timer starts at signal receipt, not at server start
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => {
            info!("all in-flight requests drained");
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "server error during shutdown");
        }
        Ok(Err(e)) => {
            error!(error = %e, "server task panicked");
        }
        Err(_) => {
            let remaining = service_metrics.in_flight.load(Ordering::Relaxed);
            warn!(
                remaining,
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    info!("shutdown complete");
    Ok(())
}

/// Count the request and record its route, status and latency.
async fn track_requests(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".to_owned());
    let started = Instant::now();

    state.metrics.requests_total.fetch_add(1, Ordering::Relaxed);
    state.metrics.in_flight.fetch_add(1, Ordering::Relaxed);
    let response = next.run(request).await;
    state.metrics.in_flight.fetch_sub(1, Ordering::Relaxed);

    metrics::record_request(
        &route,
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );
    response
}

/// Health endpoint: uptime, requests served and key pool status.
/// Returns 503 when the pool reports no usable key.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let pool = state.controller.pool().health().await;
    let uptime = state.metrics.started_at.elapsed().as_secs();
    let requests = state.metrics.requests_total.load(Ordering::Relaxed);

    let (status_code, status) = if pool["status"] == "unhealthy" {
        (axum::http::StatusCode::SERVICE_UNAVAILABLE, "degraded")
    } else {
        (axum::http::StatusCode::OK, "healthy")
    };

    let body = serde_json::json!({
        "status": status,
        "uptime_seconds": uptime,
        "requests_served": requests,
        "backend": state.backend.id(),
        "current_key": state.controller.current_fingerprint(),
        "pool": pool,
    });

    (
        status_code,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics endpoint in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        axum::http::StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
