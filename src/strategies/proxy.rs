//! # Proxy Strategy
//!
//! Transparent reverse proxy to the route's single upstream. Rewrites the
//! outbound path from the route's `target_path` template, replays the inbound
//! method and body, forwards only safe headers, and hands the raw upstream
//! response back for verbatim relay.

use async_trait::async_trait;
use std::collections::HashMap;
use tracing::debug;

use crate::strategies::{Strategy, StrategyError, StrategyOutput, StrategyParams};
use crate::upstream::UpstreamCall;

/// Synthetic marker set during multipart capture; never leaves the gateway
const MULTIPART_MARKER: &str = "x-multipart-body";

pub struct ProxyStrategy;

#[async_trait]
impl Strategy for ProxyStrategy {
    fn name(&self) -> &'static str {
        "proxy"
    }

    async fn execute(&self, params: StrategyParams) -> Result<StrategyOutput, StrategyError> {
        let route = &params.route;
        let upstream_name = route
            .upstream
            .as_deref()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| {
                StrategyError::Internal(format!("proxy route {} has no upstream", route.path))
            })?;
        let service = params.service(upstream_name)?;

        let outbound_path = rewrite_target_path(
            route.target_path.as_deref(),
            &params.ctx.path,
            &params.path_params,
            params.wildcard_tail.as_deref(),
        );
        let url = build_url(
            &service.url,
            &outbound_path,
            params.ctx.raw_query.as_deref(),
        );

        debug!(
            request_id = %params.ctx.request_id,
            method = %params.ctx.method,
            target_url = %url,
            "Proxying request"
        );

        let mut call = UpstreamCall::new(params.ctx.method.clone(), url, &params.ctx.request_id)
            .timeout(service.timeout());
        for (name, value) in &params.ctx.headers {
            if name != MULTIPART_MARKER {
                call = call.header(name.clone(), value.clone());
            }
        }
        if let Some(body) = params.ctx.body.to_outbound_bytes() {
            call = call.body(body);
        }

        let response = params.client.send(call).await.map_err(|err| {
            debug!(error = %err, "Proxy request failed");
            StrategyError::BadGateway("Upstream service error".to_string())
        })?;

        Ok(StrategyOutput::Upstream(response))
    }
}

/// Produce the outbound path for a proxied call
///
/// Without a template the original path is forwarded verbatim. Otherwise every
/// `{name}` placeholder is substituted with its binding and `*` with the
/// wildcard tail captured by the matcher.
pub fn rewrite_target_path(
    template: Option<&str>,
    original_path: &str,
    params: &HashMap<String, String>,
    wildcard_tail: Option<&str>,
) -> String {
    let Some(template) = template.filter(|t| !t.is_empty()) else {
        return original_path.to_string();
    };

    let mut path = template.to_string();
    for (name, value) in params {
        path = path.replace(&format!("{{{name}}}"), value);
    }
    if path.contains('*') {
        path = path.replace('*', wildcard_tail.unwrap_or(""));
    }
    path
}

/// Join base URL, path, and the unchanged raw query string
pub fn build_url(base: &str, path: &str, raw_query: Option<&str>) -> String {
    match raw_query {
        Some(query) if !query.is_empty() => format!("{base}{path}?{query}"),
        _ => format!("{base}{path}"),
    }
}
