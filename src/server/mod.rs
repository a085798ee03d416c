//! # HTTP Server
//!
//! Builds the axum application and runs it until a shutdown signal arrives.
//!
//! ## Key Features
//! - Every `/dhos/v2` route sits behind bearer authentication, with a per-route scope check
//! - `/running`, `/version` and `/ready` are public; `/drop_data` is mounted outside
//!   production only
//! - Request ids are generated, logged by the trace layer and echoed back in `x-request-id`
//! - Request metrics, a request timeout and a body size limit wrap the whole application
//!
//! ## Rust Concepts Used
//! - `tower::ServiceBuilder` to stack layers in reading order
//! - `MethodRouter::route_layer` so each method of a path can carry its own requirement
//! - `with_graceful_shutdown` to drain in-flight requests on SIGINT or SIGTERM

pub mod handlers;
pub mod query;

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, patch, post, MethodRouter},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{error, info};

use crate::auth::{authenticate, authorize, JwtAuthProvider, Requirement, ADAPTER_UPDATE, READ, WRITE};
use crate::core::config::{ServerConfig, ServiceConfig};
use crate::core::error::{ObservationsError, ObservationsResult};
use crate::observability::{health, metrics};
use crate::observations::service::ObservationService;

/// State shared by all handlers
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ObservationService>,
}

impl AppState {
    pub fn new(service: Arc<ObservationService>) -> Self {
        Self { service }
    }
}

fn guarded(route: MethodRouter<AppState>, requirement: Requirement) -> MethodRouter<AppState> {
    route.route_layer(middleware::from_fn_with_state(requirement, authorize))
}

fn api_routes(auth: Arc<JwtAuthProvider>) -> Router<AppState> {
    Router::new()
        .route(
            "/dhos/v2/observation_set",
            guarded(post(handlers::create_observation_set), WRITE)
                .merge(guarded(get(handlers::list_by_encounter), READ)),
        )
        .route(
            "/dhos/v2/observation_set/latest",
            guarded(get(handlers::latest_by_encounter), READ)
                .merge(guarded(post(handlers::latest_by_encounters), READ)),
        )
        .route(
            "/dhos/v2/observation_set/count",
            guarded(post(handlers::count_by_encounters), READ),
        )
        .route(
            "/dhos/v2/observation_set/:observation_set_id",
            guarded(get(handlers::get_observation_set), READ)
                .merge(guarded(patch(handlers::update_observation_set), ADAPTER_UPDATE)),
        )
        .route(
            "/dhos/v2/observation_set_search",
            guarded(get(handlers::search_by_location), READ)
                .merge(guarded(post(handlers::search_by_locations), READ)),
        )
        .route(
            "/dhos/v2/patient/:patient_id/observation_set",
            guarded(get(handlers::list_by_patient), READ),
        )
        .route(
            "/dhos/v2/observation_sets",
            guarded(get(handlers::modified_since), READ),
        )
        .route(
            "/dhos/v2/aggregate_obs",
            guarded(post(handlers::refresh_aggregates), WRITE),
        )
        .route(
            "/dhos/v2/on_time_obs_stats",
            guarded(post(handlers::on_time_stats), READ),
        )
        .route(
            "/dhos/v2/missing_obs_stats",
            guarded(post(handlers::missing_stats), READ),
        )
        .route(
            "/dhos/v2/on_time_intervals",
            guarded(post(handlers::on_time_intervals), READ),
        )
        .route(
            "/dhos/v2/observation_sets_by_month",
            guarded(post(handlers::monthly_stats), READ)
                .merge(guarded(get(handlers::monthly_stats_by_location), READ)),
        )
        .layer(middleware::from_fn_with_state(auth, authenticate))
}

/// Assemble the full application
///
/// `metrics_handle` is only mounted when metrics are enabled in `config`.
pub fn build_router(
    state: AppState,
    config: &ServiceConfig,
    metrics_handle: Option<PrometheusHandle>,
) -> Router {
    let auth = Arc::new(JwtAuthProvider::new(&config.auth));

    let mut app = api_routes(auth).merge(health::router(state.service.store()));

    if !config.environment.is_production() {
        info!(environment = %config.environment, "development routes enabled");
        app = app.route("/drop_data", post(handlers::drop_data));
    }

    if let (true, Some(handle)) = (config.observability.metrics.enabled, metrics_handle) {
        app = app.route(
            &config.observability.metrics.endpoint,
            get(metrics::render_metrics).with_state(handle),
        );
    }

    app.with_state(state).layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(TraceLayer::new_for_http())
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(middleware::from_fn(metrics::track_metrics))
            .layer(TimeoutLayer::new(config.server.request_timeout))
            .layer(DefaultBodyLimit::max(config.server.max_body_size)),
    )
}

/// Bind the listener and serve until SIGINT or SIGTERM
pub async fn serve(app: Router, config: &ServerConfig) -> ObservationsResult<()> {
    let address = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&address).await.map_err(|e| {
        ObservationsError::internal(format!("Failed to bind server to {}: {}", address, e))
    })?;

    info!("🌐 Observations API listening on {}", address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ObservationsError::internal(format!("Server error: {}", e)))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("📡 Received SIGINT, shutting down"),
        _ = terminate => info!("📡 Received SIGTERM, shutting down"),
    }
}
