//! # Core Types Module
//!
//! This module defines the foundational data structures used throughout the gateway:
//! declarative routes, the normalized per-request context, the authenticated
//! principal, and the uniform gateway response.
//!
//! ## Rust Concepts Used
//!
//! - `Arc<T>` shares immutable routes and contexts across async tasks
//! - Tagged enums (`RouteMode`, `BodyKind`) replace stringly-typed dispatch
//! - `serde` derives put the route model directly behind the YAML config

use axum::http::{Method, StatusCode};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::core::error::{GatewayError, GatewayResult};

/// The dispatch mode of a route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteMode {
    /// Transparent reverse proxy to a single upstream
    Proxy,
    /// Orchestrated fan-out over multiple upstreams under a named strategy
    Logic,
    /// GraphQL entry point (single-upstream proxy or local multiplex)
    Graphql,
}

impl fmt::Display for RouteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteMode::Proxy => write!(f, "proxy"),
            RouteMode::Logic => write!(f, "logic"),
            RouteMode::Graphql => write!(f, "graphql"),
        }
    }
}

/// One upstream call of an orchestrated route
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamRef {
    /// Service name, resolved against the `services` config section
    pub service: String,

    /// Endpoint path on that service; may contain `{id}` for strategies that
    /// substitute an entity id
    pub endpoint: String,

    /// HTTP method, defaults to GET when omitted
    #[serde(default)]
    pub method: Option<String>,
}

/// A declarative route: the unit of dispatch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    /// Path pattern; segments are literals, `{name}` placeholders, or a
    /// trailing `*` wildcard
    pub path: String,

    /// HTTP verb, or `*` to match any method
    pub method: String,

    /// Dispatch mode
    pub mode: RouteMode,

    /// Strategy name; required for `logic` and `graphql` modes, defaults to
    /// the built-in `proxy` strategy for proxy mode
    #[serde(default)]
    pub strategy: Option<String>,

    /// Single-upstream key for proxy/graphql modes
    #[serde(default)]
    pub upstream: Option<String>,

    /// Rewrite template for proxy mode; may contain `{name}` placeholders and
    /// `*` for the wildcard tail
    #[serde(default)]
    pub target_path: Option<String>,

    /// Whether the authentication gate runs for this route
    #[serde(default)]
    pub auth_required: bool,

    /// Ordered upstream list for orchestrator strategies
    #[serde(default)]
    pub upstreams: Vec<UpstreamRef>,

    /// Opaque bag passed through to strategies
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl Route {
    /// Effective strategy name for this route
    pub fn strategy_name(&self) -> &str {
        match &self.strategy {
            Some(name) if !name.is_empty() => name,
            _ => "proxy",
        }
    }

    /// Validate the mode invariants of this route
    ///
    /// Called at configuration load so a bad route fails startup instead of
    /// misrouting at request time.
    pub fn validate(&self) -> GatewayResult<()> {
        if self.path.is_empty() {
            return Err(GatewayError::config("route path cannot be empty"));
        }
        if self.method.is_empty() {
            return Err(GatewayError::config(format!(
                "route {} has an empty method",
                self.path
            )));
        }
        match self.mode {
            RouteMode::Proxy => {
                if self.upstream.as_deref().unwrap_or("").is_empty() {
                    return Err(GatewayError::config(format!(
                        "proxy route {} requires an upstream",
                        self.path
                    )));
                }
            }
            RouteMode::Logic => {
                if self.strategy.as_deref().unwrap_or("").is_empty() {
                    return Err(GatewayError::config(format!(
                        "logic route {} requires a strategy",
                        self.path
                    )));
                }
                if self.upstreams.is_empty() {
                    return Err(GatewayError::config(format!(
                        "logic route {} requires at least one upstream",
                        self.path
                    )));
                }
            }
            RouteMode::Graphql => {
                if self.strategy.as_deref().unwrap_or("").is_empty() {
                    return Err(GatewayError::config(format!(
                        "graphql route {} requires a strategy",
                        self.path
                    )));
                }
            }
        }
        Ok(())
    }

    /// Names of every service this route may call
    pub fn referenced_services(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        if let Some(upstream) = self.upstream.as_deref() {
            if !upstream.is_empty() {
                names.push(upstream);
            }
        }
        for up in &self.upstreams {
            if !names.contains(&up.service.as_str()) {
                names.push(&up.service);
            }
        }
        names
    }
}

/// The authenticated identity attached to a request after the gate succeeds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl Principal {
    /// Synthetic principal for API-key authenticated callers
    pub fn api_key_user() -> Self {
        Self {
            id: "api-key-user".to_string(),
            username: "api-key".to_string(),
            email: String::new(),
            roles: vec!["api-user".to_string()],
            metadata: HashMap::new(),
        }
    }

    /// Check if the principal carries a specific role
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// Typed request/response body
///
/// The tag is decided by content-type at capture time, never by probing the
/// payload.
#[derive(Debug, Clone)]
pub enum BodyKind {
    /// JSON-decoded tree (`application/json` payloads)
    Json(Value),
    /// Raw bytes (multipart, binary, and other non-JSON content types)
    Raw(Bytes),
    /// UTF-8 text that failed JSON decoding (response side only)
    Text(String),
    /// No payload
    Empty,
}

impl BodyKind {
    pub fn is_empty(&self) -> bool {
        matches!(self, BodyKind::Empty)
    }

    /// Serialize this body for an outbound upstream call
    ///
    /// JSON trees re-encode; the result is structurally equal to the
    /// captured payload.
    pub fn to_outbound_bytes(&self) -> Option<Bytes> {
        match self {
            BodyKind::Json(value) => serde_json::to_vec(value).ok().map(Bytes::from),
            BodyKind::Raw(bytes) => Some(bytes.clone()),
            BodyKind::Text(text) => Some(Bytes::from(text.clone().into_bytes())),
            BodyKind::Empty => None,
        }
    }

    /// Borrow the JSON tree, if this body holds one
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            BodyKind::Json(value) => Some(value),
            _ => None,
        }
    }
}

/// Normalized per-request workspace
///
/// Created when a request is accepted, destroyed when the response is emitted,
/// never shared across requests.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// UUID generated on entry; propagated to upstreams as `X-Request-ID`
    pub request_id: String,

    /// Inbound HTTP method
    pub method: Method,

    /// Inbound path without the query string
    pub path: String,

    /// Raw query string, appended unchanged to proxied calls
    pub raw_query: Option<String>,

    /// Query parameters; single-valued, first value wins on repeats
    pub query: HashMap<String, String>,

    /// Headers with lower-cased keys; first value wins on repeats
    pub headers: HashMap<String, String>,

    /// Captured body, classified by content-type
    pub body: BodyKind,

    /// Authenticated principal, present only after the gate succeeds
    pub principal: Option<Principal>,

    /// Instant the request was accepted, for latency measurement
    pub started_at: Instant,
}

impl RequestContext {
    pub fn new(method: Method, path: String, raw_query: Option<String>) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            method,
            path,
            raw_query,
            query: HashMap::new(),
            headers: HashMap::new(),
            body: BodyKind::Empty,
            principal: None,
            started_at: Instant::now(),
        }
    }

    /// Get a header value by its lower-cased name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Elapsed time since the request was accepted
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// The uniform response the gateway emits
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    pub status: StatusCode,

    /// Response headers; first value of every upstream header
    pub headers: HashMap<String, String>,

    pub body: BodyKind,

    /// Response metadata, e.g. `is_binary` for raw passthrough bodies
    pub metadata: HashMap<String, Value>,
}

impl GatewayResponse {
    /// Build a JSON response from a structured value
    pub fn json(status: StatusCode, body: Value) -> Self {
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        Self {
            status,
            headers,
            body: BodyKind::Json(body),
            metadata: HashMap::new(),
        }
    }

    /// Build the uniform `{"error": "..."}` response
    pub fn error(status: StatusCode, message: impl Into<String>) -> Self {
        Self::json(status, serde_json::json!({ "error": message.into() }))
    }
}

impl From<GatewayError> for GatewayResponse {
    fn from(err: GatewayError) -> Self {
        GatewayResponse::error(err.status_code(), err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn proxy_route() -> Route {
        Route {
            path: "/api/v1/users/{id}".to_string(),
            method: "GET".to_string(),
            mode: RouteMode::Proxy,
            strategy: None,
            upstream: Some("auth".to_string()),
            target_path: Some("/api/v1/users/{id}".to_string()),
            auth_required: false,
            upstreams: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn test_proxy_route_validation() {
        let route = proxy_route();
        assert!(route.validate().is_ok());
        assert_eq!(route.strategy_name(), "proxy");

        let mut bad = route;
        bad.upstream = None;
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_logic_route_requires_strategy_and_upstreams() {
        let mut route = proxy_route();
        route.mode = RouteMode::Logic;
        route.upstream = None;
        assert!(route.validate().is_err());

        route.strategy = Some("dashboard_orchestrator".to_string());
        assert!(route.validate().is_err());

        route.upstreams.push(UpstreamRef {
            service: "analytics".to_string(),
            endpoint: "/api/v1/metrics".to_string(),
            method: None,
        });
        assert!(route.validate().is_ok());
    }

    #[test]
    fn test_referenced_services_deduplicates() {
        let mut route = proxy_route();
        route.upstreams.push(UpstreamRef {
            service: "auth".to_string(),
            endpoint: "/api/v1/users".to_string(),
            method: None,
        });
        route.upstreams.push(UpstreamRef {
            service: "analytics".to_string(),
            endpoint: "/api/v1/metrics".to_string(),
            method: None,
        });
        assert_eq!(route.referenced_services(), vec!["auth", "analytics"]);
    }

    #[test]
    fn test_body_round_trip_preserves_structure() {
        let value = json!({"plant": {"id": 7, "tags": ["indoor", "fern"]}});
        let body = BodyKind::Json(value.clone());
        let bytes = body.to_outbound_bytes().unwrap();
        let decoded: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn test_api_key_principal() {
        let principal = Principal::api_key_user();
        assert_eq!(principal.id, "api-key-user");
        assert!(principal.has_role("api-user"));
        assert!(!principal.has_role("admin"));
    }

    #[test]
    fn test_error_response_shape() {
        let response = GatewayResponse::error(StatusCode::NOT_FOUND, "Route not found");
        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert_eq!(
            response.body.as_json().unwrap(),
            &json!({"error": "Route not found"})
        );
    }
}
