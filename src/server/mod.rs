//! # HTTP Server Module
//!
//! The axum front-end: operational endpoints (`/health`, `/healthz`,
//! `/metrics`), the CORS and trace layers, and the fallback handler that feeds
//! every other request into the pipeline.
//!
//! Emission is the last step of the request lifecycle: the uniform
//! `GatewayResponse` is converted back into an HTTP response here, with
//! hop-by-hop and length headers recomputed rather than relayed.

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderName, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::{json, Map, Value};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::core::config::{ConfigManager, CorsConfig};
use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::{BodyKind, GatewayResponse};
use crate::pipeline::Pipeline;

/// Request bodies above this size are rejected at capture
const MAX_BODY_SIZE: usize = 16 * 1024 * 1024;

/// Response headers the gateway recomputes instead of relaying
const SKIPPED_RESPONSE_HEADERS: [&str; 3] = ["content-length", "transfer-encoding", "connection"];

/// Shared server state
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub config: Arc<ConfigManager>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>, config: Arc<ConfigManager>) -> Self {
        Self {
            pipeline,
            config,
            started_at: Instant::now(),
        }
    }
}

/// Build the axum application: operational routes plus the pipeline fallback
pub fn build_app(state: AppState) -> Router {
    let cors = cors_layer(&state.config.snapshot().config.cors);

    Router::new()
        .route("/health", get(handle_health))
        .route("/healthz", get(handle_health))
        .route("/metrics", get(handle_metrics))
        .fallback(handle_gateway)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

/// Bind and serve until the shutdown future resolves, then drain
pub async fn serve<F>(app: Router, addr: SocketAddr, shutdown: F) -> GatewayResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(addr).await.map_err(|err| {
        GatewayError::config(format!("failed to bind gateway server to {addr}: {err}"))
    })?;
    info!("Gateway HTTP server listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|err| GatewayError::internal(format!("gateway server error: {err}")))
}

/// Translate the configured CORS policy into a tower-http layer
///
/// `allow_all_origins` wins over any explicit origin list.
fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let methods: Vec<Method> = config
        .allowed_methods
        .iter()
        .filter_map(|m| m.to_uppercase().parse().ok())
        .collect();
    let headers: Vec<HeaderName> = config
        .allowed_headers
        .iter()
        .filter_map(|h| h.parse().ok())
        .collect();

    let layer = CorsLayer::new().allow_methods(methods).allow_headers(headers);
    if config.allow_all_origins {
        layer.allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        layer.allow_origin(AllowOrigin::list(origins))
    }
}

/// Fallback handler: every non-operational request goes through the pipeline
async fn handle_gateway(State(state): State<AppState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();

    let body_bytes = match axum::body::to_bytes(body, MAX_BODY_SIZE).await {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(error = %err, "Failed to read request body");
            return GatewayError::bad_request("failed to read request body").into_response();
        }
    };

    let response = state
        .pipeline
        .handle(parts.method, parts.uri, parts.headers, body_bytes)
        .await;
    into_http_response(response)
}

/// Convert the uniform gateway response into an HTTP response
fn into_http_response(response: GatewayResponse) -> Response {
    let mut builder = Response::builder().status(response.status);

    for (name, value) in &response.headers {
        if SKIPPED_RESPONSE_HEADERS.contains(&name.as_str()) {
            continue;
        }
        builder = builder.header(name.as_str(), value.as_str());
    }

    let (content_type, bytes) = match response.body {
        BodyKind::Json(value) => (
            Some("application/json"),
            serde_json::to_vec(&value).unwrap_or_default(),
        ),
        BodyKind::Text(text) => (None, text.into_bytes()),
        BodyKind::Raw(bytes) => (None, bytes.to_vec()),
        BodyKind::Empty => (None, Vec::new()),
    };
    if let Some(content_type) = content_type {
        if !response.headers.contains_key("content-type") {
            builder = builder.header(header::CONTENT_TYPE, content_type);
        }
    }

    builder
        .body(Body::from(bytes))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Gateway health, with the configured service catalogue attached
async fn handle_health(State(state): State<AppState>) -> Json<Value> {
    let snapshot = state.config.snapshot();

    let mut services = Map::new();
    let mut names: Vec<&String> = snapshot.config.services.keys().collect();
    names.sort();
    for name in names {
        let service = &snapshot.config.services[name];
        services.insert(
            name.clone(),
            json!({ "url": service.url, "status": "unknown" }),
        );
    }

    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        "version": env!("CARGO_PKG_VERSION"),
        "services": Value::Object(services),
    }))
}

/// Gateway identification and a services count
async fn handle_metrics(State(state): State<AppState>) -> Json<Value> {
    let snapshot = state.config.snapshot();
    Json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        "gateway": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "uptime_seconds": state.started_at.elapsed().as_secs(),
        },
        "services": {
            "total": snapshot.config.services.len(),
        },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_into_http_response_json() {
        let response = GatewayResponse::json(StatusCode::OK, json!({"a": 1}));
        let http = into_http_response(response);
        assert_eq!(http.status(), StatusCode::OK);
        assert_eq!(
            http.headers().get("content-type").unwrap(),
            "application/json"
        );
    }

    #[test]
    fn test_into_http_response_skips_length_headers() {
        let mut headers = HashMap::new();
        headers.insert("content-length".to_string(), "999".to_string());
        headers.insert("transfer-encoding".to_string(), "chunked".to_string());
        headers.insert("x-upstream".to_string(), "plant_management".to_string());
        let response = GatewayResponse {
            status: StatusCode::OK,
            headers,
            body: BodyKind::Text("pong".to_string()),
            metadata: HashMap::new(),
        };

        let http = into_http_response(response);
        assert!(http.headers().get("content-length").is_none() || http.headers()["content-length"] != "999");
        assert!(http.headers().get("transfer-encoding").is_none());
        assert_eq!(http.headers().get("x-upstream").unwrap(), "plant_management");
    }

    #[test]
    fn test_cors_layer_accepts_both_policies() {
        let open = CorsConfig {
            allow_all_origins: true,
            allowed_origins: vec!["https://app.example.com".to_string()],
            allowed_methods: vec!["GET".to_string(), "POST".to_string()],
            allowed_headers: vec!["Content-Type".to_string()],
        };
        // allow_all wins; building the layer must not panic
        let _ = cors_layer(&open);

        let scoped = CorsConfig {
            allow_all_origins: false,
            allowed_origins: vec!["https://app.example.com".to_string()],
            allowed_methods: vec!["GET".to_string()],
            allowed_headers: vec!["Authorization".to_string()],
        };
        let _ = cors_layer(&scoped);
    }
}
