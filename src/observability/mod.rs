// Logging and metrics configuration
pub mod config;

// Health and version endpoints
pub mod health;

// Structured logging
pub mod logging;

// Prometheus metrics
pub mod metrics;

pub use config::{LogConfig, LogFormat, MetricsConfig, ObservabilityConfig};
pub use logging::init_logging;
