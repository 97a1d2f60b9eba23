//! Follow-Up API Gateway
//!
//! The main entry point for all external API requests.
//! Handles:
//! - Spreadsheet imports (sessions and cumulative exams)
//! - Parent login and the results portal
//! - Sheet administration
//! - Observability (logging, metrics, request ids)

mod handlers;
mod middleware;

use axum::{
    extract::{DefaultBodyLimit, FromRef},
    http::StatusCode,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use followup_common::{
    auth::{hash_password, JwtManager},
    config::{AppConfig, ObservabilityConfig},
    db::{models::AppRole, DbPool},
    errors::Result,
    metrics, Repository, RosterStore,
};
use followup_ingestion::Reconciler;
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::{signal, sync::oneshot, task::JoinHandle};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn RosterStore>,
    pub reconciler: Arc<Reconciler>,
    pub jwt: Arc<JwtManager>,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>, store: Arc<dyn RosterStore>, metrics: Option<PrometheusHandle>) -> Self {
        Self {
            jwt: Arc::new(JwtManager::from_config(&config.auth)),
            reconciler: Arc::new(Reconciler::new(store.clone())),
            config,
            store,
            metrics,
        }
    }
}

impl FromRef<AppState> for Arc<JwtManager> {
    fn from_ref(state: &AppState) -> Self {
        state.jwt.clone()
    }
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Arc::new(AppConfig::load()?);

    init_tracing(&config.observability);

    info!(
        service = %config.observability.service_name,
        "Starting Follow-Up API Gateway v{}",
        followup_common::VERSION
    );

    // Initialize metrics
    let prometheus = if config.observability.metrics_enabled {
        let handle = prometheus_builder(&config.observability)?.install_recorder()?;
        metrics::register_metrics();
        Some(handle)
    } else {
        None
    };

    // Initialize database connection
    info!("Connecting to database...");
    let db = DbPool::new(&config.database).await?;
    let store: Arc<dyn RosterStore> = Arc::new(Repository::new(db));

    bootstrap_admin(store.as_ref(), &config).await?;

    // Create app state
    let state = AppState::new(config.clone(), store, prometheus);

    // Build the router
    let app = create_router(state)?;

    // Start the server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                stop_rx.await.ok();
            })
            .await
    });

    let finished = tokio::select! {
        joined = &mut server => Some(joined),
        _ = shutdown_signal() => None,
    };

    match finished {
        Some(joined) => joined??,
        None => {
            stop_tx.send(()).ok();
            let timeout = config.shutdown_timeout();
            if !drain(server, timeout).await? {
                warn!(
                    timeout_secs = timeout.as_secs(),
                    "Open connections did not drain in time, exiting anyway"
                );
            }
        }
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Wait for the server task to finish its graceful drain. Returns `false`
/// when `timeout` elapses first.
async fn drain(server: JoinHandle<std::io::Result<()>>, timeout: Duration) -> std::io::Result<bool> {
    match tokio::time::timeout(timeout, server).await {
        Ok(joined) => {
            joined.map_err(std::io::Error::other)??;
            Ok(true)
        }
        Err(_) => Ok(false),
    }
}

/// Exporter with the shared latency buckets; every series carries the service label
fn prometheus_builder(config: &ObservabilityConfig) -> std::result::Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new()
        .add_global_label("service", config.service_name.clone())
        .set_buckets_for_metric(
            Matcher::Suffix("duration_seconds".to_string()),
            metrics::LATENCY_BUCKETS,
        )
}

fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if config.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Ensure the configured admin account exists with its password and role
async fn bootstrap_admin(store: &dyn RosterStore, config: &AppConfig) -> Result<()> {
    let Some((username, password)) = config.bootstrap_admin() else {
        return Ok(());
    };

    let provisioned = store.upsert_user(username).await?;
    let hash = hash_password(password)?;
    store.set_password(provisioned.user.id, &hash).await?;
    store.grant_role(provisioned.user.id, AppRole::Admin).await?;

    info!(username, created = provisioned.created, "Bootstrap admin ensured");
    Ok(())
}

/// Create the main application router
fn create_router(state: AppState) -> Result<Router> {
    // CORS configuration; preflights are answered here
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // API routes
    let mut api_routes = Router::new()
        // Spreadsheet imports
        .route("/imports/sessions", post(handlers::imports::import_sessions))
        .route("/imports/exams", post(handlers::imports::import_exam))

        // Accounts
        .route("/auth/login", post(handlers::auth::login))
        .route("/auth/password", post(handlers::auth::change_password))

        // Parent portal
        .route("/me/results", get(handlers::portal::my_results))

        // Sheet administration
        .route(
            "/sheets",
            get(handlers::sheets::list_sheets).post(handlers::sheets::create_sheet),
        )
        .layer(DefaultBodyLimit::max(state.config.server.max_body_bytes));

    if state.config.rate_limit.enabled {
        let limiter = middleware::rate_limit::create_rate_limiter(
            state.config.rate_limit.requests_per_second,
            state.config.rate_limit.burst,
        )?;
        api_routes = api_routes.layer(from_fn_with_state(limiter, middleware::rate_limit::rate_limit));
    }

    let request_timeout = state.config.request_timeout();

    // Compose the app
    let app = Router::new()
        // Health endpoints (no auth)
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .route("/metrics", get(handlers::metrics::render))
        .nest("/v1", api_routes)
        .route_layer(from_fn(middleware::metrics::track_metrics))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(cors)
                .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, request_timeout)),
        )
        .with_state(state);

    Ok(app)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
