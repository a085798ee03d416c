//! # Error Handling
//!
//! Every fallible operation in the service returns [`ObservationsResult`]. The error enum is
//! built with `thiserror` and knows how to turn itself into an HTTP response, so handlers can
//! simply use `?` and let axum render the failure.
//!
//! ## Status mapping
//! - validation problems in the request: `400 Bad Request`
//! - missing or invalid bearer token: `401 Unauthorized`
//! - token without the required scopes: `403 Forbidden`
//! - unknown observation set / encounter: `404 Not Found`
//! - well-formed but semantically invalid input (e.g. inverted dates): `422 Unprocessable Entity`
//! - database or broker unavailable: `503 Service Unavailable`
//!
//! ## Rust Concepts Used
//! - Struct-like enum variants carry context without boxing
//! - `From` implementations let `?` convert library errors automatically
//! - `IntoResponse` integrates the error type with axum handlers

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Result type used throughout the service
pub type ObservationsResult<T> = Result<T, ObservationsError>;

/// All error conditions the observations service can report
#[derive(Debug, Error, Clone)]
pub enum ObservationsError {
    /// Invalid or inconsistent configuration
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Missing, malformed or expired bearer token
    #[error("Authentication failed: {reason}")]
    Authentication { reason: String },

    /// Caller authenticated but lacks the permissions for the operation
    #[error("Authorization failed: {reason}")]
    Authorization { reason: String },

    /// Request body or query parameters failed validation
    #[error("Request validation failed: {field} - {reason}")]
    RequestValidation { field: String, reason: String },

    /// The requested resource does not exist
    #[error("{message}")]
    NotFound { message: String },

    /// The request was understood but cannot be processed
    #[error("{message}")]
    Unprocessable { message: String },

    /// Database errors (connection failures, query errors, migrations)
    #[error("Database error: {message}")]
    Database { message: String },

    /// Message broker errors
    #[error("Messaging error: {message}")]
    Messaging { message: String },

    /// Internal server errors for unexpected failures
    #[error("Internal server error: {message}")]
    Internal { message: String },

    /// I/O errors (config files, sockets)
    #[error("I/O error: {message}")]
    Io { message: String },

    /// JSON serialization/deserialization errors
    #[error("JSON error: {message}")]
    Json { message: String },

    /// YAML parsing errors for configuration files
    #[error("YAML error: {message}")]
    Yaml { message: String },

    /// JWT decoding or validation errors
    #[error("JWT error: {message}")]
    Jwt { message: String },
}

impl ObservationsError {
    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an authentication error with a custom reason
    pub fn auth<S: Into<String>>(reason: S) -> Self {
        Self::Authentication {
            reason: reason.into(),
        }
    }

    /// Create an authorization error with a custom reason
    pub fn authz<S: Into<String>>(reason: S) -> Self {
        Self::Authorization {
            reason: reason.into(),
        }
    }

    /// Create a validation error that is not tied to a single field
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::RequestValidation {
            field: "general".to_string(),
            reason: message.into(),
        }
    }

    /// Create a validation error for a named field
    pub fn invalid_field<F: Into<String>, S: Into<String>>(field: F, reason: S) -> Self {
        Self::RequestValidation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn not_found<S: Into<String>>(message: S) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn unprocessable<S: Into<String>>(message: S) -> Self {
        Self::Unprocessable {
            message: message.into(),
        }
    }

    pub fn database<S: Into<String>>(message: S) -> Self {
        Self::Database {
            message: message.into(),
        }
    }

    pub fn messaging<S: Into<String>>(message: S) -> Self {
        Self::Messaging {
            message: message.into(),
        }
    }

    /// Create an internal error with a custom message
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the HTTP status code returned to clients for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Authentication { .. } => StatusCode::UNAUTHORIZED,
            Self::Jwt { .. } => StatusCode::UNAUTHORIZED,
            Self::Authorization { .. } => StatusCode::FORBIDDEN,
            Self::RequestValidation { .. } => StatusCode::BAD_REQUEST,
            Self::Json { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Unprocessable { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Database { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Messaging { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Configuration { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Io { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Yaml { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the caller may sensibly retry the same request later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Database { .. } | Self::Messaging { .. } | Self::Io { .. }
        )
    }

    /// Get a string representation of the error type for API responses
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration_error",
            Self::Authentication { .. } => "authentication_error",
            Self::Authorization { .. } => "authorization_error",
            Self::RequestValidation { .. } => "request_validation_error",
            Self::NotFound { .. } => "not_found",
            Self::Unprocessable { .. } => "unprocessable_entity",
            Self::Database { .. } => "database_error",
            Self::Messaging { .. } => "messaging_error",
            Self::Internal { .. } => "internal_error",
            Self::Io { .. } => "io_error",
            Self::Json { .. } => "json_error",
            Self::Yaml { .. } => "yaml_error",
            Self::Jwt { .. } => "jwt_error",
        }
    }
}

impl From<std::io::Error> for ObservationsError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for ObservationsError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json {
            message: err.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for ObservationsError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Yaml {
            message: err.to_string(),
        }
    }
}

impl From<jsonwebtoken::errors::Error> for ObservationsError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        Self::Jwt {
            message: err.to_string(),
        }
    }
}

impl From<sqlx::Error> for ObservationsError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database {
            message: err.to_string(),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for ObservationsError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Self::Database {
            message: format!("migration failed: {}", err),
        }
    }
}

/// Render errors as `{"error": {...}}` JSON bodies with the mapped status code
impl IntoResponse for ObservationsError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            tracing::error!(error = %self, error_type = self.error_type(), "request failed");
        } else {
            tracing::debug!(error = %self, error_type = self.error_type(), "request rejected");
        }

        let body = json!({
            "error": {
                "code": status.as_u16(),
                "message": self.to_string(),
                "type": self.error_type(),
                "retryable": self.is_retryable(),
            }
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            ObservationsError::auth("missing token").status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ObservationsError::authz("missing scope").status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ObservationsError::not_found("Observation set abc not found").status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ObservationsError::unprocessable("End date is before Start date").status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ObservationsError::validation("Observations should not be empty").status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_retryable_errors() {
        assert!(ObservationsError::database("connection refused").is_retryable());
        assert!(ObservationsError::messaging("no route").is_retryable());
        assert!(!ObservationsError::auth("invalid token").is_retryable());
        assert!(!ObservationsError::not_found("nope").is_retryable());
    }

    #[test]
    fn test_not_found_message_is_verbatim() {
        let err = ObservationsError::not_found("Encounter e1 has no observation sets");
        assert_eq!(err.to_string(), "Encounter e1 has no observation sets");
    }
}
