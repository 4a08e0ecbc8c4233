//! # User Profile Orchestrator
//!
//! Fixed three-call fan-out that assembles a user's profile page: account
//! info from the auth service, plus the user's plants and devices from plant
//! management. The user id comes from the authenticated principal, falling
//! back to the `profile/{uid}` path segment.
//!
//! Missing account info is fatal. A 404 on plants or devices just means the
//! user has none yet and is downgraded to an empty list; any other failure on
//! those calls is reported in `partial_errors` without sinking the profile.

use async_trait::async_trait;
use axum::http::Method;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, warn};

use crate::strategies::{Strategy, StrategyError, StrategyOutput, StrategyParams};
use crate::upstream::{CallFailure, UpstreamCall};

/// Per-call deadline for profile sub-requests
const CALL_TIMEOUT: Duration = Duration::from_secs(10);

pub struct UserProfileOrchestrator;

#[async_trait]
impl Strategy for UserProfileOrchestrator {
    fn name(&self) -> &'static str {
        "user_profile_orchestrator"
    }

    async fn execute(&self, params: StrategyParams) -> Result<StrategyOutput, StrategyError> {
        let user_id = resolve_user_id(&params).ok_or_else(|| {
            StrategyError::Internal("user ID not found in principal or path".to_string())
        })?;

        info!(
            request_id = %params.ctx.request_id,
            user_id = %user_id,
            "Assembling user profile"
        );

        let auth = params.service("auth")?.clone();
        let plants_svc = params.service("plant_management")?.clone();

        let build_call = |base: &str, endpoint: String| {
            let mut call = UpstreamCall::new(
                Method::GET,
                format!("{base}{endpoint}"),
                &params.ctx.request_id,
            )
            .timeout(CALL_TIMEOUT);
            if let Some(authorization) = params.ctx.header("authorization") {
                call = call.header("authorization", authorization.to_string());
            }
            for (name, value) in params.identity_headers() {
                call = call.header(name, value);
            }
            call
        };

        let user_call = build_call(&auth.url, format!("/api/v1/users/{user_id}"));
        let plants_call = build_call(&plants_svc.url, format!("/api/v1/plants/users/{user_id}"));
        let devices_call = build_call(&plants_svc.url, format!("/api/v1/devices/users/{user_id}"));

        let client = &params.client;
        let (user_result, plants_result, devices_result) = tokio::join!(
            client.fetch_value(user_call),
            client.fetch_value(plants_call),
            client.fetch_value(devices_call),
        );

        let user = user_result.map_err(|err| {
            warn!(
                request_id = %params.ctx.request_id,
                user_id = %user_id,
                error = %err,
                "User info unavailable"
            );
            StrategyError::Internal("failed to retrieve user information".to_string())
        })?;

        let mut partial_errors: HashMap<String, String> = HashMap::new();
        let plants = downgrade_missing("plants", plants_result, &mut partial_errors);
        let devices = downgrade_missing("devices", devices_result, &mut partial_errors);

        let stats = json!({
            "total_plants": plants.as_array().map(Vec::len).unwrap_or(0),
            "total_devices": devices.as_array().map(Vec::len).unwrap_or(0),
        });

        let mut profile = json!({
            "timestamp": chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            "user": user,
            "plants": plants,
            "devices": devices,
            "stats": stats,
        });
        if !partial_errors.is_empty() {
            profile["partial_errors"] = json!(partial_errors);
        }

        Ok(StrategyOutput::Value(profile))
    }
}

/// Resolve the profile's user id: principal first, then `profile/{uid}` path
fn resolve_user_id(params: &StrategyParams) -> Option<String> {
    if let Some(principal) = &params.ctx.principal {
        if !principal.id.is_empty() {
            return Some(principal.id.clone());
        }
    }
    let segments: Vec<&str> = params
        .ctx
        .path
        .trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();
    segments
        .windows(2)
        .find(|pair| pair[0] == "profile")
        .map(|pair| pair[1].to_string())
}

/// Treat a 404 as "no entries yet"; record every other failure as partial
fn downgrade_missing(
    section: &str,
    result: Result<Value, CallFailure>,
    partial_errors: &mut HashMap<String, String>,
) -> Value {
    match result {
        Ok(value) => value,
        Err(CallFailure::UpstreamStatus(404)) => json!([]),
        Err(err) => {
            partial_errors.insert(section.to_string(), err.to_string());
            json!([])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downgrade_404_to_empty_list() {
        let mut errors = HashMap::new();
        let value = downgrade_missing("plants", Err(CallFailure::UpstreamStatus(404)), &mut errors);
        assert_eq!(value, json!([]));
        assert!(errors.is_empty());
    }

    #[test]
    fn test_other_failures_become_partial_errors() {
        let mut errors = HashMap::new();
        let value = downgrade_missing(
            "devices",
            Err(CallFailure::Transport("connection refused".to_string())),
            &mut errors,
        );
        assert_eq!(value, json!([]));
        assert!(errors.get("devices").unwrap().contains("connection refused"));

        let value = downgrade_missing(
            "plants",
            Err(CallFailure::UpstreamStatus(500)),
            &mut errors,
        );
        assert_eq!(value, json!([]));
        assert!(errors.contains_key("plants"));
    }
}
