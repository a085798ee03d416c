//! # Authentication Middleware
//!
//! Two layers guard the API. [`authenticate`] runs for every protected route, turns the bearer
//! token into an [`AuthContext`] and stores it in the request extensions. [`authorize`] is
//! attached per route and checks that context against a [`Requirement`].
//!
//! ## Rust Concepts Used
//!
//! - `axum::middleware::from_fn_with_state` for async function middleware
//! - `Copy` requirement expressions built from `&'static` slices so they can be constants
//! - `Arc<AuthContext>` shared between middleware and handlers through extensions

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::auth::providers::{AuthContext, JwtAuthProvider};
use crate::core::error::{ObservationsError, ObservationsResult};

/// System id of the worker allowed to patch stored observation sets
pub const ADAPTER_WORKER_SYSTEM_ID: &str = "dhos-observations-adapter-worker";

/// Permission expression evaluated against an [`AuthContext`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Requirement {
    Scope(&'static str),
    ClaimEquals(&'static str, &'static str),
    Any(&'static [Requirement]),
    All(&'static [Requirement]),
}

impl Requirement {
    pub fn is_satisfied_by(&self, context: &AuthContext) -> bool {
        match self {
            Requirement::Scope(scope) => context.has_scope(scope),
            Requirement::ClaimEquals(key, value) => context.claim(key) == Some(*value),
            Requirement::Any(options) => options.iter().any(|r| r.is_satisfied_by(context)),
            Requirement::All(parts) => parts.iter().all(|r| r.is_satisfied_by(context)),
        }
    }
}

pub const READ: Requirement = Requirement::Any(&[
    Requirement::Scope("read:send_observation"),
    Requirement::Scope("read:observation"),
]);

pub const WRITE: Requirement = Requirement::Any(&[
    Requirement::Scope("write:send_observation"),
    Requirement::Scope("write:observation"),
]);

pub const ADAPTER_UPDATE: Requirement = Requirement::All(&[
    WRITE,
    Requirement::ClaimEquals("system_id", ADAPTER_WORKER_SYSTEM_ID),
]);

fn bearer_token(headers: &HeaderMap) -> ObservationsResult<&str> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or_else(|| ObservationsError::auth("Missing Authorization header"))?
        .to_str()
        .map_err(|_| ObservationsError::auth("Malformed Authorization header"))?;

    value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| ObservationsError::auth("Authorization header is not a bearer token"))
}

/// Decode the bearer token and attach the caller's [`AuthContext`]
pub async fn authenticate(
    State(provider): State<Arc<JwtAuthProvider>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ObservationsError> {
    let context = bearer_token(request.headers())
        .and_then(|token| provider.authenticate(token))
        .map_err(|err| {
            warn!(path = %request.uri().path(), "Authentication failed: {}", err);
            err
        })?;

    debug!(user_id = %context.user_id, "request authenticated");
    request.extensions_mut().insert(Arc::new(context));
    Ok(next.run(request).await)
}

/// Reject the request unless the caller satisfies `requirement`
pub async fn authorize(
    State(requirement): State<Requirement>,
    request: Request,
    next: Next,
) -> Result<Response, ObservationsError> {
    let context = request
        .extensions()
        .get::<Arc<AuthContext>>()
        .ok_or_else(|| ObservationsError::auth("Request is not authenticated"))?;

    if !requirement.is_satisfied_by(context) {
        warn!(
            user_id = %context.user_id,
            path = %request.uri().path(),
            "caller lacks permission"
        );
        return Err(ObservationsError::authz("Insufficient permissions"));
    }
    Ok(next.run(request).await)
}
