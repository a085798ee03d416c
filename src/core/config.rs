//! # Configuration Module
//!
//! Service configuration is layered:
//!
//! 1. compiled-in defaults (`Default` impls)
//! 2. an optional YAML file
//! 3. environment variable overrides (`DATABASE_HOST`, `HS_KEY`, `LOG_LEVEL`, ...)
//! 4. validation, which reports every problem found rather than the first one
//!
//! ## Key Features
//! - YAML configuration parsing with serde
//! - Environment variable override support, matching the variable names used in deployment
//! - Human readable durations via `humantime`
//! - Comprehensive validation with detailed error messages

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::core::error::{ObservationsError, ObservationsResult};
use crate::observability::config::{LogFormat, ObservabilityConfig};

/// Complete configuration for the observations service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Deployment environment; production disables development-only behaviour
    pub environment: Environment,

    /// HTTP listener settings
    pub server: ServerConfig,

    /// Relational store settings
    pub database: DatabaseConfig,

    /// Message broker settings
    pub messaging: MessagingConfig,

    /// Bearer token validation settings
    pub auth: AuthSettings,

    /// Logging and metrics
    pub observability: ObservabilityConfig,
}

/// Deployment environment name
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Production,
    Staging,
    Training,
    #[default]
    Development,
    Test,
}

impl Environment {
    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "production" | "prod" => Ok(Self::Production),
            "staging" => Ok(Self::Staging),
            "training" => Ok(Self::Training),
            "development" | "dev" => Ok(Self::Development),
            "test" | "testing" => Ok(Self::Test),
            other => Err(format!("unknown environment '{}'", other)),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Environment::Production => "production",
            Environment::Staging => "staging",
            Environment::Training => "training",
            Environment::Development => "development",
            Environment::Test => "test",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind the HTTP listener to
    pub bind_address: String,

    /// HTTP port
    pub port: u16,

    /// Upper bound for handling a single request
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Maximum accepted request body in bytes
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 5000,
            request_timeout: Duration::from_secs(30),
            max_body_size: 2 * 1024 * 1024,
        }
    }
}

/// Which store implementation backs the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    Postgres,
    Memory,
}

impl FromStr for DatabaseBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "memory" | "in-memory" => Ok(Self::Memory),
            other => Err(format!("unknown database backend '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub backend: DatabaseBackend,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub name: String,
    pub max_connections: u32,
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Run pending migrations before serving
    pub run_migrations: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: DatabaseBackend::Postgres,
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: String::new(),
            name: "dhos-observations".to_string(),
            max_connections: 10,
            connect_timeout: Duration::from_secs(10),
            run_migrations: true,
        }
    }
}

/// Which publisher the service sends events through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessagingBackend {
    Nats,
    /// Events are only written to the log
    Log,
}

impl FromStr for MessagingBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "nats" => Ok(Self::Nats),
            "log" | "none" | "disabled" => Ok(Self::Log),
            other => Err(format!("unknown messaging backend '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    pub backend: MessagingBackend,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Prepended to every routing key to form the subject
    pub subject_prefix: Option<String>,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            backend: MessagingBackend::Nats,
            host: "localhost".to_string(),
            port: 4222,
            username: None,
            password: None,
            subject_prefix: None,
        }
    }
}

impl MessagingConfig {
    pub fn server_address(&self) -> String {
        format!("nats://{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// Shared HMAC key tokens are signed with
    pub hs_key: Option<String>,
    /// Expected `iss` claim
    pub hs_issuer: Option<String>,
    /// Expected `aud` claim
    pub audience: Option<String>,
    /// Accept tokens without checking signature, issuer or audience
    pub ignore_jwt_validation: bool,
}

impl ServiceConfig {
    /// Load configuration from a YAML file, then apply environment overrides and validate
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> ObservationsResult<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        let mut config: ServiceConfig = serde_yaml::from_str(&content)?;

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Build configuration from defaults and the process environment only
    pub fn from_env() -> ObservationsResult<Self> {
        let mut config = ServiceConfig::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from the process environment
    pub fn apply_env_overrides(&mut self) -> ObservationsResult<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable lookup
    pub fn apply_overrides<F>(&mut self, lookup: F) -> ObservationsResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(environment) = lookup("ENVIRONMENT") {
            self.environment = environment
                .parse()
                .map_err(|e| ObservationsError::config(format!("Invalid ENVIRONMENT: {}", e)))?;
        }

        // Server configuration overrides
        if let Some(address) = lookup("SERVER_BIND_ADDRESS") {
            self.server.bind_address = address;
        }
        if let Some(port) = lookup("SERVER_PORT") {
            self.server.port = port
                .parse()
                .map_err(|e| ObservationsError::config(format!("Invalid SERVER_PORT: {}", e)))?;
        }
        if let Some(timeout) = lookup("SERVER_REQUEST_TIMEOUT") {
            self.server.request_timeout = humantime::parse_duration(&timeout).map_err(|e| {
                ObservationsError::config(format!("Invalid SERVER_REQUEST_TIMEOUT: {}", e))
            })?;
        }

        // Database configuration overrides
        if let Some(backend) = lookup("DATABASE_BACKEND") {
            self.database.backend = backend
                .parse()
                .map_err(|e| ObservationsError::config(format!("Invalid DATABASE_BACKEND: {}", e)))?;
        }
        if let Some(host) = lookup("DATABASE_HOST") {
            self.database.host = host;
        }
        if let Some(port) = lookup("DATABASE_PORT") {
            self.database.port = port
                .parse()
                .map_err(|e| ObservationsError::config(format!("Invalid DATABASE_PORT: {}", e)))?;
        }
        if let Some(user) = lookup("DATABASE_USER") {
            self.database.user = user;
        }
        if let Some(password) = lookup("DATABASE_PASSWORD") {
            self.database.password = password;
        }
        if let Some(name) = lookup("DATABASE_NAME") {
            self.database.name = name;
        }
        if let Some(max) = lookup("DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = max.parse().map_err(|e| {
                ObservationsError::config(format!("Invalid DATABASE_MAX_CONNECTIONS: {}", e))
            })?;
        }
        if let Some(run) = lookup("DATABASE_RUN_MIGRATIONS") {
            self.database.run_migrations = parse_flag("DATABASE_RUN_MIGRATIONS", &run)?;
        }

        // Messaging configuration overrides
        if let Some(backend) = lookup("MESSAGING_BACKEND") {
            self.messaging.backend = backend
                .parse()
                .map_err(|e| ObservationsError::config(format!("Invalid MESSAGING_BACKEND: {}", e)))?;
        }
        if let Some(host) = lookup("NATS_HOST") {
            self.messaging.host = host;
        }
        if let Some(port) = lookup("NATS_PORT") {
            self.messaging.port = port
                .parse()
                .map_err(|e| ObservationsError::config(format!("Invalid NATS_PORT: {}", e)))?;
        }
        if let Some(username) = lookup("NATS_USERNAME") {
            self.messaging.username = Some(username);
        }
        if let Some(password) = lookup("NATS_PASSWORD") {
            self.messaging.password = Some(password);
        }
        if let Some(prefix) = lookup("NATS_SUBJECT_PREFIX") {
            self.messaging.subject_prefix = Some(prefix).filter(|p| !p.is_empty());
        }

        // Auth configuration overrides
        if let Some(key) = lookup("HS_KEY") {
            self.auth.hs_key = Some(key);
        }
        if let Some(issuer) = lookup("HS_ISSUER") {
            self.auth.hs_issuer = Some(issuer);
        }
        if let Some(audience) = lookup("AUTH_AUDIENCE") {
            self.auth.audience = Some(audience);
        }
        if let Some(ignore) = lookup("IGNORE_JWT_VALIDATION") {
            self.auth.ignore_jwt_validation = parse_flag("IGNORE_JWT_VALIDATION", &ignore)?;
        }

        // Observability overrides
        if let Some(level) = lookup("LOG_LEVEL") {
            self.observability.logging.level = level;
        }
        if let Some(format) = lookup("LOG_FORMAT") {
            self.observability.logging.format = format
                .parse::<LogFormat>()
                .map_err(|e| ObservationsError::config(format!("Invalid LOG_FORMAT: {}", e)))?;
        }
        if let Some(enabled) = lookup("METRICS_ENABLED") {
            self.observability.metrics.enabled = parse_flag("METRICS_ENABLED", &enabled)?;
        }

        Ok(())
    }

    /// Validate the configuration, reporting every problem at once
    pub fn validate(&self) -> ObservationsResult<()> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push("server port must be greater than 0".to_string());
        }
        if self.server.bind_address.is_empty() {
            errors.push("bind_address cannot be empty".to_string());
        }
        if self.server.request_timeout.is_zero() {
            errors.push("request_timeout must be greater than 0".to_string());
        }
        if self.server.max_body_size == 0 {
            errors.push("max_body_size must be greater than 0".to_string());
        }

        if self.database.backend == DatabaseBackend::Postgres {
            if self.database.host.is_empty() {
                errors.push("database host cannot be empty".to_string());
            }
            if self.database.name.is_empty() {
                errors.push("database name cannot be empty".to_string());
            }
            if self.database.max_connections == 0 {
                errors.push("database max_connections must be greater than 0".to_string());
            }
        } else if self.environment.is_production() {
            errors.push("the in-memory store cannot be used in production".to_string());
        }

        if self.messaging.backend == MessagingBackend::Nats && self.messaging.host.is_empty() {
            errors.push("messaging host cannot be empty".to_string());
        }

        if self.auth.ignore_jwt_validation {
            if self.environment.is_production() {
                errors.push("IGNORE_JWT_VALIDATION is not allowed in production".to_string());
            }
        } else if self.auth.hs_key.as_deref().map_or(true, str::is_empty) {
            errors.push("HS_KEY must be set unless JWT validation is ignored".to_string());
        }

        if !self.observability.metrics.endpoint.starts_with('/') {
            errors.push("metrics endpoint must start with '/'".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ObservationsError::config(format!(
                "Configuration validation failed: {}",
                errors.join(", ")
            )))
        }
    }
}

fn parse_flag(name: &str, value: &str) -> ObservationsResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(ObservationsError::config(format!(
            "Invalid {}: expected a boolean, got '{}'",
            name, other
        ))),
    }
}
