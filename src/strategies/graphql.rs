//! # GraphQL Strategies
//!
//! Two entry points for GraphQL traffic. `graphql_local` inspects the query
//! text and multiplexes it to the owning service, or fans a dashboard query
//! out to two services and merges the answers. `graphql_proxy` forwards the
//! request body to the route's single upstream unchanged.
//!
//! Dispatch uses substring matching over the raw query string, not a GraphQL
//! parser; field names containing a trigger word as a substring will route to
//! that service. See DESIGN.md for the trade-off.

use async_trait::async_trait;
use axum::http::Method;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::core::config::ServiceConfig;
use crate::strategies::{Strategy, StrategyError, StrategyOutput, StrategyParams};
use crate::upstream::UpstreamCall;

/// A GraphQL request envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphqlRequest {
    pub query: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub variables: Option<Map<String, Value>>,

    #[serde(rename = "operationName", skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,
}

impl GraphqlRequest {
    fn bare(query: &str) -> Self {
        Self {
            query: query.to_string(),
            variables: None,
            operation_name: None,
        }
    }
}

/// Where a local-schema query should go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueryTarget {
    Analytics,
    PlantManagement,
    Auth,
    Dashboard,
    Introspection,
    Unknown,
}

/// Classify a query by keyword, first match wins
fn classify_query(query: &str) -> QueryTarget {
    let contains_any =
        |keywords: &[&str]| keywords.iter().any(|keyword| query.contains(keyword));

    if contains_any(&["analytics", "metrics", "measurements"]) {
        QueryTarget::Analytics
    } else if contains_any(&["plants", "devices"]) {
        QueryTarget::PlantManagement
    } else if contains_any(&["users", "auth"]) {
        QueryTarget::Auth
    } else if query.contains("dashboard") {
        QueryTarget::Dashboard
    } else if contains_any(&["__schema", "__type"]) {
        QueryTarget::Introspection
    } else {
        QueryTarget::Unknown
    }
}

/// Decode the inbound body as a GraphQL request
fn parse_request(params: &StrategyParams) -> Result<GraphqlRequest, StrategyError> {
    let body = params.ctx.body.as_json().ok_or_else(|| {
        StrategyError::BadRequest("malformed GraphQL body".to_string())
    })?;
    serde_json::from_value(body.clone())
        .map_err(|_| StrategyError::BadRequest("malformed GraphQL body".to_string()))
}

/// GraphQL error payload, emitted with status 200 per the GraphQL convention
fn error_value(message: impl Into<String>) -> Value {
    json!({ "errors": [ { "message": message.into() } ] })
}

/// POST a GraphQL request to a service and decode the JSON answer
async fn forward(
    params: &StrategyParams,
    request: &GraphqlRequest,
    service: &ServiceConfig,
    endpoint: &str,
) -> Result<Value, String> {
    let body = serde_json::to_vec(request)
        .map_err(|err| format!("failed to serialize GraphQL request: {err}"))?;

    let mut call = UpstreamCall::new(
        Method::POST,
        format!("{}{}", service.url, endpoint),
        &params.ctx.request_id,
    )
    .timeout(service.timeout())
    .header("content-type", "application/json")
    .body(body.into());
    for (name, value) in params.identity_headers() {
        call = call.header(name, value);
    }

    let response = params
        .client
        .send(call)
        .await
        .map_err(|err| format!("GraphQL request failed: {err}"))?;

    serde_json::from_slice(&response.body)
        .map_err(|err| format!("failed to parse GraphQL response: {err}"))
}

/// `graphql_local`: keyword-routed multiplexing over the platform services
pub struct GraphqlLocal;

#[async_trait]
impl Strategy for GraphqlLocal {
    fn name(&self) -> &'static str {
        "graphql_local"
    }

    async fn execute(&self, params: StrategyParams) -> Result<StrategyOutput, StrategyError> {
        let request = parse_request(&params)?;

        info!(
            request_id = %params.ctx.request_id,
            operation_name = request.operation_name.as_deref().unwrap_or(""),
            query_length = request.query.len(),
            "Processing GraphQL query"
        );

        let value = match classify_query(&request.query) {
            QueryTarget::Analytics => self.forward_to(&params, &request, "analytics").await,
            QueryTarget::PlantManagement => {
                self.forward_to(&params, &request, "plant_management").await
            }
            QueryTarget::Auth => self.forward_to(&params, &request, "auth").await,
            QueryTarget::Dashboard => Ok(self.orchestrate_dashboard(&params).await),
            QueryTarget::Introspection => Ok(introspection_stub()),
            QueryTarget::Unknown => Err("unknown GraphQL operation".to_string()),
        }
        .unwrap_or_else(error_value);

        Ok(StrategyOutput::Value(value))
    }
}

impl GraphqlLocal {
    async fn forward_to(
        &self,
        params: &StrategyParams,
        request: &GraphqlRequest,
        service_name: &str,
    ) -> Result<Value, String> {
        let service = params
            .services
            .get(service_name)
            .ok_or_else(|| format!("{service_name} service not configured"))?;
        debug!(service = service_name, "Forwarding GraphQL query");
        forward(params, request, service, "/graphql").await
    }

    /// Dashboard queries need two services; per-child failures are dropped
    async fn orchestrate_dashboard(&self, params: &StrategyParams) -> Value {
        let mut results = Map::new();

        if let Some(service) = params.services.get("analytics") {
            let child = GraphqlRequest::bare(
                "query { metrics { temperature humidity lightLevel } }",
            );
            if let Ok(value) = forward(params, &child, service, "/graphql").await {
                results.insert("analytics".to_string(), value);
            }
        }

        if let Some(service) = params.services.get("plant_management") {
            let child = GraphqlRequest::bare("query { plants { id name type status } }");
            if let Ok(value) = forward(params, &child, service, "/graphql").await {
                results.insert("plants".to_string(), value);
            }
        }

        json!({ "data": { "dashboard": Value::Object(results) } })
    }
}

/// Minimal schema answer for introspection queries
fn introspection_stub() -> Value {
    json!({
        "data": {
            "__schema": {
                "types": [
                    {
                        "name": "Query",
                        "kind": "OBJECT",
                        "fields": [
                            { "name": "analytics", "type": { "name": "Analytics" } },
                            { "name": "plants", "type": { "name": "[Plant]" } },
                            { "name": "dashboard", "type": { "name": "Dashboard" } },
                        ],
                    },
                ],
            },
        },
    })
}

/// `graphql_proxy`: forward the inbound GraphQL body to the route's upstream
pub struct GraphqlProxy;

#[async_trait]
impl Strategy for GraphqlProxy {
    fn name(&self) -> &'static str {
        "graphql_proxy"
    }

    async fn execute(&self, params: StrategyParams) -> Result<StrategyOutput, StrategyError> {
        let route = &params.route;
        let upstream_name = route
            .upstream
            .as_deref()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| {
                StrategyError::Internal(format!("graphql route {} has no upstream", route.path))
            })?;
        let service = params.service(upstream_name)?.clone();
        let request = parse_request(&params)?;

        info!(
            request_id = %params.ctx.request_id,
            upstream = upstream_name,
            operation_name = request.operation_name.as_deref().unwrap_or(""),
            "Proxying GraphQL request"
        );

        let endpoint = route
            .target_path
            .as_deref()
            .filter(|path| !path.is_empty())
            .unwrap_or("/graphql");

        let body = serde_json::to_vec(&request)
            .map_err(|err| StrategyError::Internal(err.to_string()))?;
        let mut call = UpstreamCall::new(
            Method::POST,
            format!("{}{}", service.url, endpoint),
            &params.ctx.request_id,
        )
        .timeout(service.timeout())
        .header("content-type", "application/json")
        .body(body.into());
        if let Some(authorization) = params.ctx.header("authorization") {
            call = call.header("authorization", authorization.to_string());
        }
        for (name, value) in params.identity_headers() {
            call = call.header(name, value);
        }

        let response = params
            .client
            .send(call)
            .await
            .map_err(|err| StrategyError::BadGateway(format!("GraphQL proxy request failed: {err}")))?;

        let value: Value = serde_json::from_slice(&response.body).map_err(|err| {
            StrategyError::BadGateway(format!("failed to parse GraphQL response: {err}"))
        })?;

        Ok(StrategyOutput::Value(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_classification() {
        assert_eq!(
            classify_query("{ metrics { temperature } }"),
            QueryTarget::Analytics
        );
        assert_eq!(
            classify_query("query { plants { id } }"),
            QueryTarget::PlantManagement
        );
        assert_eq!(
            classify_query("query { devices { id } }"),
            QueryTarget::PlantManagement
        );
        assert_eq!(classify_query("{ users { email } }"), QueryTarget::Auth);
        assert_eq!(
            classify_query("query { dashboard { summary } }"),
            QueryTarget::Dashboard
        );
        assert_eq!(
            classify_query("{ __schema { types { name } } }"),
            QueryTarget::Introspection
        );
        assert_eq!(classify_query("{ weather { city } }"), QueryTarget::Unknown);
    }

    #[test]
    fn test_classification_order_is_first_match() {
        // a dashboard query that also mentions plants routes to plant management
        assert_eq!(
            classify_query("query { dashboard { plants { id } } }"),
            QueryTarget::PlantManagement
        );
    }

    #[test]
    fn test_request_serialization_skips_absent_fields() {
        let request = GraphqlRequest::bare("{ plants { id } }");
        let encoded = serde_json::to_value(&request).unwrap();
        assert_eq!(encoded, json!({"query": "{ plants { id } }"}));

        let full = GraphqlRequest {
            query: "query Fetch($id: ID!) { plant(id: $id) { name } }".to_string(),
            variables: Some(Map::from_iter([("id".to_string(), json!("7"))])),
            operation_name: Some("Fetch".to_string()),
        };
        let encoded = serde_json::to_value(&full).unwrap();
        assert_eq!(encoded["operationName"], json!("Fetch"));
        assert_eq!(encoded["variables"]["id"], json!("7"));
    }

    #[test]
    fn test_error_value_shape() {
        assert_eq!(
            error_value("unknown GraphQL operation"),
            json!({"errors": [{"message": "unknown GraphQL operation"}]})
        );
    }

    #[test]
    fn test_introspection_stub_names_query_type() {
        let stub = introspection_stub();
        assert_eq!(stub["data"]["__schema"]["types"][0]["name"], json!("Query"));
    }
}
