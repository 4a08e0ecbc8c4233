//! # Dashboard Orchestrator
//!
//! Parallel fan-out over every upstream of the route, collecting per-service
//! results for a combined dashboard payload. Partial failure is not fatal:
//! failed services land in an `errors` map and the strategy still succeeds.

use async_trait::async_trait;
use axum::http::Method;
use serde_json::{json, Value};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

use crate::strategies::fan_out::{self, FanOutCall};
use crate::strategies::{Strategy, StrategyError, StrategyOutput, StrategyParams};
use crate::upstream::UpstreamCall;

/// Per-call deadline for dashboard sub-requests
const CALL_TIMEOUT: Duration = Duration::from_secs(10);

pub struct DashboardOrchestrator;

#[async_trait]
impl Strategy for DashboardOrchestrator {
    fn name(&self) -> &'static str {
        "dashboard_orchestrator"
    }

    async fn execute(&self, params: StrategyParams) -> Result<StrategyOutput, StrategyError> {
        let user_id = params
            .ctx
            .principal
            .as_ref()
            .map(|p| p.id.as_str())
            .unwrap_or("anonymous");
        info!(
            request_id = %params.ctx.request_id,
            user_id,
            upstreams = params.route.upstreams.len(),
            "Executing dashboard orchestrator"
        );

        let mut results = fan_out::FanOutResults::default();
        let mut calls = Vec::new();
        for upstream in &params.route.upstreams {
            let service = match params.services.get(&upstream.service) {
                Some(service) => service,
                None => {
                    warn!(service = %upstream.service, "Upstream service not configured");
                    results.record_error(
                        upstream.service.clone(),
                        format!("service not configured: {}", upstream.service),
                    );
                    continue;
                }
            };

            let method = upstream
                .method
                .as_deref()
                .filter(|m| !m.is_empty())
                .and_then(|m| Method::from_str(&m.to_uppercase()).ok())
                .unwrap_or(Method::GET);

            let mut call = UpstreamCall::new(
                method,
                format!("{}{}", service.url, upstream.endpoint),
                &params.ctx.request_id,
            )
            .timeout(CALL_TIMEOUT);
            for (name, value) in params.identity_headers() {
                call = call.header(name, value);
            }

            calls.push(FanOutCall {
                service: upstream.service.clone(),
                call,
            });
        }

        let collected = fan_out::collect(params.client.clone(), calls).await;
        results.data.extend(collected.data);
        results.errors.extend(collected.errors);

        let mut dashboard = json!({
            "timestamp": chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            "data": Value::Object(results.data.clone()),
        });
        if results.has_errors() {
            warn!(
                successful_services = results.data.len(),
                failed_services = results.errors.len(),
                "Dashboard data partially available"
            );
            dashboard["errors"] = results.errors_value();
        }

        Ok(StrategyOutput::Value(dashboard))
    }
}
