//! # Request Pipeline
//!
//! The per-request orchestration: snapshot the configuration, normalize the
//! inbound request, match a route, run the authentication gate, dispatch the
//! route's strategy, normalize its result, and emit exactly one response.
//!
//! The lifecycle is strictly ordered with terminal branches for unmatched
//! routes, failed authentication, and strategy failures; there is no retry
//! loop. The configuration snapshot is captured first, so a concurrent reload
//! never changes the rules mid-request.

pub mod normalize;

use axum::http::{HeaderMap, Method, Uri};
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::auth::AuthGate;
use crate::core::config::{ConfigManager, GatewaySnapshot};
use crate::core::error::GatewayError;
use crate::core::types::{BodyKind, GatewayResponse, RequestContext};
use crate::routing::RouteMatch;
use crate::strategies::{StrategyParams, StrategyRegistry};
use crate::upstream::UpstreamClient;

/// Lifecycle states of one request, logged as it advances
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Received,
    Matched,
    Authenticated,
    Dispatched,
    Normalized,
    NotFound,
    Unauthenticated,
    Failed,
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Lifecycle::Received => "RECEIVED",
            Lifecycle::Matched => "MATCHED",
            Lifecycle::Authenticated => "AUTHENTICATED",
            Lifecycle::Dispatched => "DISPATCHED",
            Lifecycle::Normalized => "NORMALIZED",
            Lifecycle::NotFound => "NOT_FOUND",
            Lifecycle::Unauthenticated => "UNAUTHENTICATED",
            Lifecycle::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// The pipeline orchestrator
pub struct Pipeline {
    config: Arc<ConfigManager>,
    registry: Arc<StrategyRegistry>,
    gate: Arc<AuthGate>,
    client: Arc<UpstreamClient>,
}

impl Pipeline {
    pub fn new(
        config: Arc<ConfigManager>,
        registry: Arc<StrategyRegistry>,
        gate: Arc<AuthGate>,
        client: Arc<UpstreamClient>,
    ) -> Self {
        Self {
            config,
            registry,
            gate,
            client,
        }
    }

    /// Process one request from capture to the emitted response
    ///
    /// Exactly one response comes back for every call; errors are folded into
    /// the uniform `{"error": "..."}` shape here.
    pub async fn handle(
        &self,
        method: Method,
        uri: Uri,
        headers: HeaderMap,
        body: Bytes,
    ) -> GatewayResponse {
        let snapshot = self.config.snapshot();
        let mut ctx = build_context(method, &uri, &headers, body);

        info!(
            request_id = %ctx.request_id,
            method = %ctx.method,
            path = %ctx.path,
            state = %Lifecycle::Received,
            "Request received"
        );

        let Some(matched) = snapshot.table.find(&ctx.path, ctx.method.as_str()) else {
            debug!(
                request_id = %ctx.request_id,
                path = %ctx.path,
                state = %Lifecycle::NotFound,
                "No route matched"
            );
            return self.emit(&ctx, GatewayError::RouteNotFound.into());
        };
        debug!(
            request_id = %ctx.request_id,
            route = %matched.route.path,
            mode = %matched.route.mode,
            strategy = matched.route.strategy_name(),
            state = %Lifecycle::Matched,
            "Route matched"
        );

        match self
            .gate
            .authenticate(&ctx, &matched.route, &snapshot.config)
            .await
        {
            Ok(principal) => {
                ctx.principal = principal;
                debug!(request_id = %ctx.request_id, state = %Lifecycle::Authenticated, "Gate passed");
            }
            Err(err) => {
                warn!(
                    request_id = %ctx.request_id,
                    route = %matched.route.path,
                    state = %Lifecycle::Unauthenticated,
                    error = %err,
                    "Authentication failed"
                );
                return self.emit(&ctx, err.into());
            }
        }

        let response = match self.dispatch(&snapshot, &matched, Arc::new(ctx.clone())).await {
            Ok(output) => {
                debug!(request_id = %ctx.request_id, state = %Lifecycle::Normalized, "Strategy completed");
                normalize::normalize(output)
            }
            Err(err) => {
                warn!(
                    request_id = %ctx.request_id,
                    route = %matched.route.path,
                    state = %Lifecycle::Failed,
                    error = %err,
                    "Strategy execution failed"
                );
                err.into()
            }
        };

        self.emit(&ctx, response)
    }

    /// Resolve and execute the route's strategy under the write deadline
    async fn dispatch(
        &self,
        snapshot: &GatewaySnapshot,
        matched: &RouteMatch,
        ctx: Arc<RequestContext>,
    ) -> Result<crate::strategies::StrategyOutput, GatewayError> {
        let route = &matched.route;
        let strategy_name = route.strategy_name();
        let strategy = self.registry.get(strategy_name).ok_or_else(|| {
            GatewayError::internal(format!("unknown strategy: {strategy_name}"))
        })?;

        let params = StrategyParams {
            ctx: ctx.clone(),
            route: route.clone(),
            path_params: matched.params.clone(),
            wildcard_tail: matched.wildcard_tail.clone(),
            services: snapshot.config.services_for_route(route),
            client: self.client.clone(),
        };

        debug!(
            request_id = %ctx.request_id,
            strategy = strategy_name,
            state = %Lifecycle::Dispatched,
            "Executing strategy"
        );

        let deadline = snapshot.config.server.write_timeout();
        match tokio::time::timeout(deadline, strategy.execute(params)).await {
            Ok(result) => result.map_err(GatewayError::from),
            Err(_) => Err(GatewayError::bad_gateway("request deadline exceeded")),
        }
    }

    /// Final bookkeeping before the response leaves the pipeline
    fn emit(&self, ctx: &RequestContext, response: GatewayResponse) -> GatewayResponse {
        info!(
            request_id = %ctx.request_id,
            status = response.status.as_u16(),
            duration_ms = ctx.elapsed().as_millis() as u64,
            "Request completed"
        );
        response
    }
}

/// Build the normalized request context
///
/// Header keys fold to lower case and the first value wins on repeats; query
/// parameters are captured the same way. The body is classified by
/// content-type and never mutated afterwards.
pub fn build_context(method: Method, uri: &Uri, headers: &HeaderMap, body: Bytes) -> RequestContext {
    let mut ctx = RequestContext::new(
        method,
        uri.path().to_string(),
        uri.query().map(str::to_string),
    );

    for (name, value) in headers {
        if let Ok(text) = value.to_str() {
            ctx.headers
                .entry(name.as_str().to_ascii_lowercase())
                .or_insert_with(|| text.to_string());
        }
    }

    if let Some(raw_query) = uri.query() {
        for pair in raw_query.split('&') {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let (Ok(key), Ok(value)) = (urlencoding::decode(key), urlencoding::decode(value))
            else {
                continue;
            };
            if !key.is_empty() {
                ctx.query.entry(key.into_owned()).or_insert(value.into_owned());
            }
        }
    }

    let content_type = ctx
        .headers
        .get("content-type")
        .map(|ct| ct.to_ascii_lowercase())
        .unwrap_or_default();
    let (body, is_multipart) = classify_body(&content_type, body);
    ctx.body = body;
    if is_multipart {
        ctx.headers
            .insert("x-multipart-body".to_string(), "true".to_string());
    }
    ctx
}

/// Body classification keyed strictly on content-type, never on probing
///
/// The boolean marks a multipart capture, flagged with a synthetic
/// `x-multipart-body` header for downstream handling.
fn classify_body(content_type: &str, body: Bytes) -> (BodyKind, bool) {
    if body.is_empty() {
        return (BodyKind::Empty, false);
    }

    if content_type.contains("application/json") {
        let kind = match serde_json::from_slice(&body) {
            Ok(value) => BodyKind::Json(value),
            // an unparseable JSON payload is captured as no payload at all
            Err(_) => BodyKind::Empty,
        };
        (kind, false)
    } else if content_type.contains("multipart/form-data") {
        (BodyKind::Raw(body), true)
    } else {
        (BodyKind::Raw(body), false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header::{HeaderName, HeaderValue};
    use serde_json::json;

    fn uri(raw: &str) -> Uri {
        raw.parse().unwrap()
    }

    #[test]
    fn test_headers_fold_to_lowercase_first_value() {
        let mut headers = HeaderMap::new();
        headers.append(
            HeaderName::from_static("x-greenhouse"),
            HeaderValue::from_static("east"),
        );
        headers.append(
            HeaderName::from_static("x-greenhouse"),
            HeaderValue::from_static("west"),
        );
        headers.insert("Content-Type", HeaderValue::from_static("text/plain"));

        let ctx = build_context(Method::GET, &uri("/api/v1/plants"), &headers, Bytes::new());
        assert_eq!(ctx.header("x-greenhouse"), Some("east"));
        assert_eq!(ctx.header("content-type"), Some("text/plain"));
    }

    #[test]
    fn test_query_capture_first_value_and_decoding() {
        let ctx = build_context(
            Method::GET,
            &uri("/api/v1/plants?q=fern%20tips&q=second&flag"),
            &HeaderMap::new(),
            Bytes::new(),
        );
        assert_eq!(ctx.query.get("q"), Some(&"fern tips".to_string()));
        assert_eq!(ctx.query.get("flag"), Some(&String::new()));
        assert_eq!(ctx.raw_query.as_deref(), Some("q=fern%20tips&q=second&flag"));
    }

    #[test]
    fn test_json_body_classification() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "content-type",
            HeaderValue::from_static("application/json; charset=utf-8"),
        );
        let ctx = build_context(
            Method::POST,
            &uri("/api/v1/plants"),
            &headers,
            Bytes::from_static(b"{\"name\":\"fern\"}"),
        );
        assert_eq!(ctx.body.as_json().unwrap(), &json!({"name": "fern"}));
    }

    #[test]
    fn test_broken_json_body_becomes_empty() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        let ctx = build_context(
            Method::POST,
            &uri("/api/v1/plants"),
            &headers,
            Bytes::from_static(b"{not json"),
        );
        assert!(ctx.body.is_empty());
    }

    #[test]
    fn test_multipart_body_sets_marker_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "content-type",
            HeaderValue::from_static("multipart/form-data; boundary=x"),
        );
        let ctx = build_context(
            Method::POST,
            &uri("/api/v1/plants/7/photo"),
            &headers,
            Bytes::from_static(b"--x--"),
        );
        assert!(matches!(ctx.body, BodyKind::Raw(_)));
        assert_eq!(ctx.header("x-multipart-body"), Some("true"));
    }

    #[test]
    fn test_other_content_types_stay_raw() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("text/csv"));
        let ctx = build_context(
            Method::POST,
            &uri("/api/v1/measurements/import"),
            &headers,
            Bytes::from_static(b"a,b\n1,2"),
        );
        assert!(matches!(ctx.body, BodyKind::Raw(_)));
        assert_eq!(ctx.header("x-multipart-body"), None);
    }

    #[test]
    fn test_empty_body_is_empty() {
        let ctx = build_context(
            Method::POST,
            &uri("/api/v1/plants"),
            &HeaderMap::new(),
            Bytes::new(),
        );
        assert!(ctx.body.is_empty());
    }
}
