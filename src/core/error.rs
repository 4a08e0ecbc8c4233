//! # Error Handling Module
//!
//! This module provides error handling for the gateway using the `thiserror` crate.
//! It defines the error kinds that can terminate a request and maps each of them to
//! the HTTP status code the client receives.
//!
//! Every terminal error is surfaced to the caller as `{"error": "..."}` with the
//! mapped status. Partial failures inside orchestrator strategies are *not* errors
//! at this level; they travel as data inside the strategy result.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Main result type used throughout the gateway
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Error kinds for the API Gateway
///
/// The `#[error("...")]` attribute from `thiserror` implements `Display` with the
/// message the client sees.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Configuration-related errors (invalid config, missing files, bad routes)
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// No route in the table matched the request
    #[error("Route not found")]
    RouteNotFound,

    /// Missing or invalid credentials on a protected route
    #[error("{reason}")]
    Unauthenticated { reason: String },

    /// Unsupported route mode or malformed request payload
    #[error("{message}")]
    BadRequest { message: String },

    /// Upstream transport failure in a single-upstream strategy
    #[error("{message}")]
    BadGateway { message: String },

    /// Strategy-critical data missing or unexpected internal failure
    #[error("{message}")]
    Internal { message: String },

    /// I/O errors (config file reads, socket binding)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors for configuration files
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP client errors when talking to upstream services
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// JWT decoding errors from local token validation
    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

impl GatewayError {
    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an authentication failure with the reason sent to the client
    pub fn unauthenticated<S: Into<String>>(reason: S) -> Self {
        Self::Unauthenticated {
            reason: reason.into(),
        }
    }

    /// Create a bad-request error with a custom message
    pub fn bad_request<S: Into<String>>(message: S) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    /// Create a bad-gateway error with a custom message
    pub fn bad_gateway<S: Into<String>>(message: S) -> Self {
        Self::BadGateway {
            message: message.into(),
        }
    }

    /// Create an internal error with a custom message
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::RouteNotFound => StatusCode::NOT_FOUND,
            Self::Unauthenticated { .. } => StatusCode::UNAUTHORIZED,
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::BadGateway { .. } => StatusCode::BAD_GATEWAY,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Configuration { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Json(_) => StatusCode::BAD_REQUEST,
            Self::Yaml(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::HttpClient(err) => {
                if err.is_timeout() || err.is_connect() {
                    StatusCode::BAD_GATEWAY
                } else {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            }
            Self::Jwt(_) => StatusCode::UNAUTHORIZED,
        }
    }
}

/// Convert errors into the uniform `{"error": "..."}` client response
impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = json!({ "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}
