//! # Observations API - Core Library Crate
//!
//! Stores clinical observation sets recorded against encounters, answers queries over them,
//! builds aggregation reports and announces every new set on the message broker.
//!
//! ## Module Layout
//!
//! - `core`: error type and service configuration
//! - `observations`: data model, lateness, reports, storage and the service layer
//! - `messaging`: domain events and the publishers that deliver them
//! - `auth`: bearer token decoding and scope requirements
//! - `observability`: logging, Prometheus metrics and health endpoints
//! - `server`: the axum application and its handlers
//!
//! The binary in `main.rs` wires these together from configuration; the integration tests
//! build the same router over the in-memory store.

/// Error type and configuration
pub mod core;

/// Observation sets and everything computed from them
pub mod observations;

/// Event publication to the message broker
pub mod messaging;

/// JWT authentication and scope-based authorisation
pub mod auth;

/// Logging, metrics and health endpoints
pub mod observability;

/// HTTP routing, handlers and the server loop
pub mod server;

pub use core::config::ServiceConfig;
pub use core::error::{ObservationsError, ObservationsResult};
pub use observations::ObservationService;
pub use server::{build_router, AppState};
