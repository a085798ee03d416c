//! # Health Endpoints
//!
//! - `GET /running`: liveness, answers as long as the process serves requests
//! - `GET /version`: build information
//! - `GET /ready`: readiness, checks the observation store is reachable

use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;

use crate::observations::store::ObservationStore;

#[derive(Clone)]
pub struct HealthState {
    pub store: Arc<dyn ObservationStore>,
}

/// Routes for the health endpoints, usable in a router of any state
pub fn router<S>(store: Arc<dyn ObservationStore>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new()
        .route("/running", get(running))
        .route("/version", get(version))
        .route("/ready", get(ready))
        .with_state(HealthState { store })
}

async fn running() -> Json<Value> {
    Json(json!({"running": true}))
}

async fn version() -> Json<Value> {
    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "git_hash": option_env!("GIT_HASH"),
        "build_number": option_env!("BUILD_NUMBER"),
    }))
}

async fn ready(State(state): State<HealthState>) -> (StatusCode, Json<Value>) {
    match state.store.ping().await {
        Ok(()) => (StatusCode::OK, Json(json!({"ready": true}))),
        Err(err) => {
            warn!("Readiness check failed: {}", err);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"ready": false, "reason": err.to_string()})),
            )
        }
    }
}
