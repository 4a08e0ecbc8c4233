//! # Plant Full Report Orchestrator
//!
//! Fan-out that assembles a complete report for one plant: plant info,
//! analytics, and measurements. Each upstream endpoint carries a literal
//! `{id}` that is substituted with the plant id taken from the inbound path.
//!
//! Partial failure is tolerated for secondary sources, but the report is
//! worthless without the plant itself: a missing `plant_management` result
//! fails the whole strategy.

use async_trait::async_trait;
use axum::http::Method;
use serde_json::{json, Value};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

use crate::strategies::fan_out::{self, FanOutCall};
use crate::strategies::{Strategy, StrategyError, StrategyOutput, StrategyParams};
use crate::upstream::UpstreamCall;

/// Per-call deadline for report sub-requests
const CALL_TIMEOUT: Duration = Duration::from_secs(15);

/// The service whose result the report cannot do without
const CRITICAL_SERVICE: &str = "plant_management";

pub struct PlantFullReport;

#[async_trait]
impl Strategy for PlantFullReport {
    fn name(&self) -> &'static str {
        "plant_full_report"
    }

    async fn execute(&self, params: StrategyParams) -> Result<StrategyOutput, StrategyError> {
        let plant_id = extract_plant_id(&params.ctx.path).ok_or_else(|| {
            StrategyError::Internal("plant ID not found in path".to_string())
        })?;

        info!(
            request_id = %params.ctx.request_id,
            plant_id = %plant_id,
            "Generating plant full report"
        );

        let mut results = fan_out::FanOutResults::default();
        let mut calls = Vec::new();
        for upstream in &params.route.upstreams {
            let service = match params.services.get(&upstream.service) {
                Some(service) => service,
                None => {
                    results.record_error(
                        upstream.service.clone(),
                        format!("service not configured: {}", upstream.service),
                    );
                    continue;
                }
            };

            let endpoint = upstream.endpoint.replace("{id}", &plant_id);
            let method = upstream
                .method
                .as_deref()
                .filter(|m| !m.is_empty())
                .and_then(|m| Method::from_str(&m.to_uppercase()).ok())
                .unwrap_or(Method::GET);

            let mut call = UpstreamCall::new(
                method,
                format!("{}{}", service.url, endpoint),
                &params.ctx.request_id,
            )
            .timeout(CALL_TIMEOUT)
            .header("x-plant-id", plant_id.clone());
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

        if !results.data.contains_key(CRITICAL_SERVICE) {
            warn!(
                request_id = %params.ctx.request_id,
                plant_id = %plant_id,
                "Critical plant information missing from report"
            );
            return Err(StrategyError::Internal(
                "failed to retrieve critical plant information".to_string(),
            ));
        }

        let section = |name: &str| results.data.get(name).cloned().unwrap_or(Value::Null);
        let mut report = json!({
            "plant_id": plant_id,
            "timestamp": chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            "report": {
                "plant_info": section("plant_management"),
                "analytics": section("analytics"),
                "measurements": section("data_management"),
            },
        });
        if results.has_errors() {
            report["errors"] = results.errors_value();
        }

        Ok(StrategyOutput::Value(report))
    }
}

/// Plant id is the path segment following the literal `plant`
fn extract_plant_id(path: &str) -> Option<String> {
    let segments: Vec<&str> = path
        .trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();
    segments
        .windows(2)
        .find(|pair| pair[0] == "plant")
        .map(|pair| pair[1].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_plant_id() {
        assert_eq!(
            extract_plant_id("/api/v1/reports/plant/42/full"),
            Some("42".to_string())
        );
        assert_eq!(
            extract_plant_id("/api/v1/plant/fern-7"),
            Some("fern-7".to_string())
        );
        assert_eq!(extract_plant_id("/api/v1/plants/42"), None);
        assert_eq!(extract_plant_id("/api/v1/plant"), None);
    }
}
