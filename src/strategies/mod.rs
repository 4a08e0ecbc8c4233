//! # Strategy Engine
//!
//! A name-to-strategy registry populated at startup. A strategy receives the
//! frozen per-request parameters and returns either a raw upstream response
//! (proxy-like) or a synthesized structured value (orchestrators, GraphQL
//! multiplex); the response normalizer branches on that tag.
//!
//! Strategy instances are created once, reused across requests, and safe for
//! concurrent invocation. The engine owns no timeouts; each strategy chooses
//! them from the upstream configuration.
//!
//! ## Rust Concepts Used
//!
//! - `async_trait` enables async methods on the `Strategy` trait object
//! - `Arc<dyn Strategy>` shares stateless strategy instances across requests

pub mod dashboard;
pub mod fan_out;
pub mod graphql;
pub mod plant_report;
pub mod proxy;
pub mod user_profile;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::core::config::ServiceConfig;
use crate::core::error::GatewayError;
use crate::core::types::{RequestContext, Route};
use crate::upstream::{UpstreamClient, UpstreamResponse};

pub use dashboard::DashboardOrchestrator;
pub use graphql::{GraphqlLocal, GraphqlProxy};
pub use plant_report::PlantFullReport;
pub use proxy::ProxyStrategy;
pub use user_profile::UserProfileOrchestrator;

/// Frozen view passed to every strategy invocation
#[derive(Clone)]
pub struct StrategyParams {
    /// Normalized inbound request, principal included when the gate ran
    pub ctx: Arc<RequestContext>,

    /// The matched route
    pub route: Arc<Route>,

    /// Placeholder bindings from the route match
    pub path_params: HashMap<String, String>,

    /// Tail captured by a trailing `*`, when the route has one
    pub wildcard_tail: Option<String>,

    /// Subset of the service catalogue referenced by the route
    pub services: HashMap<String, ServiceConfig>,

    /// Shared outbound client
    pub client: Arc<UpstreamClient>,
}

impl StrategyParams {
    /// Look up one of the route's services
    pub fn service(&self, name: &str) -> Result<&ServiceConfig, StrategyError> {
        self.services
            .get(name)
            .ok_or_else(|| StrategyError::Internal(format!("service not configured: {name}")))
    }

    /// Identity headers replayed on orchestrated outbound calls
    pub fn identity_headers(&self) -> Vec<(&'static str, String)> {
        match &self.ctx.principal {
            Some(principal) => vec![
                ("x-user-id", principal.id.clone()),
                ("x-user-email", principal.email.clone()),
            ],
            None => Vec::new(),
        }
    }
}

/// What a strategy hands back to the normalizer
#[derive(Debug)]
pub enum StrategyOutput {
    /// Raw upstream response, relayed verbatim (proxy-like strategies)
    Upstream(UpstreamResponse),

    /// Synthesized structured value, emitted with status 200
    Value(Value),
}

/// Terminal strategy failure
///
/// Partial failures inside fan-outs never surface here; they are data in the
/// returned value. This channel is reserved for failures that end the request.
#[derive(Debug, Error)]
pub enum StrategyError {
    /// The inbound request cannot drive this strategy
    #[error("{0}")]
    BadRequest(String),

    /// Transport failure against the single upstream of a proxy-like strategy
    #[error("{0}")]
    BadGateway(String),

    /// Strategy-critical data missing
    #[error("{0}")]
    Internal(String),
}

impl From<StrategyError> for GatewayError {
    fn from(err: StrategyError) -> Self {
        match err {
            StrategyError::BadRequest(message) => GatewayError::bad_request(message),
            StrategyError::BadGateway(message) => GatewayError::bad_gateway(message),
            StrategyError::Internal(message) => GatewayError::internal(message),
        }
    }
}

/// A named dispatch procedure
#[async_trait]
pub trait Strategy: Send + Sync {
    /// Registry name of this strategy
    fn name(&self) -> &'static str;

    /// Execute against the frozen parameters
    async fn execute(&self, params: StrategyParams) -> Result<StrategyOutput, StrategyError>;
}

/// Name-to-strategy registry, built once at startup and read-only thereafter
pub struct StrategyRegistry {
    strategies: HashMap<&'static str, Arc<dyn Strategy>>,
}

impl StrategyRegistry {
    /// Registry with every built-in strategy registered
    pub fn builtin() -> Self {
        let mut registry = Self {
            strategies: HashMap::new(),
        };
        registry.register(Arc::new(ProxyStrategy));
        registry.register(Arc::new(DashboardOrchestrator));
        registry.register(Arc::new(PlantFullReport));
        registry.register(Arc::new(UserProfileOrchestrator));
        registry.register(Arc::new(GraphqlLocal));
        registry.register(Arc::new(GraphqlProxy));
        registry
    }

    fn register(&mut self, strategy: Arc<dyn Strategy>) {
        self.strategies.insert(strategy.name(), strategy);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Strategy>> {
        self.strategies.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.strategies.contains_key(name)
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.strategies.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry_contents() {
        let registry = StrategyRegistry::builtin();
        assert_eq!(
            registry.names(),
            vec![
                "dashboard_orchestrator",
                "graphql_local",
                "graphql_proxy",
                "plant_full_report",
                "proxy",
                "user_profile_orchestrator",
            ]
        );
        assert!(registry.get("proxy").is_some());
        assert!(registry.get("round_robin").is_none());
    }
}
