//! # Verdant API Gateway Library
//!
//! An HTTP API gateway fronting the plant-monitoring platform's backend
//! services. For each inbound request it matches a declarative route,
//! optionally enforces authentication, and dispatches to one of three
//! execution modes: transparent reverse proxy, orchestrated fan-out under a
//! named strategy, or a GraphQL entry point.

// Core modules - order matters for dependency resolution
pub mod core;
pub mod routing;
pub mod upstream;
pub mod auth;
pub mod strategies;
pub mod pipeline;
pub mod server;

// Re-export commonly used types
pub use crate::core::config::{ConfigManager, GatewayConfig};
pub use crate::core::error::{GatewayError, GatewayResult};
pub use crate::pipeline::Pipeline;
pub use crate::strategies::StrategyRegistry;
