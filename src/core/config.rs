//! # Configuration Module
//!
//! Declarative configuration for the gateway: server binding, CORS policy,
//! logging, the upstream service catalogue, the route table, and auth settings.
//! Loaded once at startup from YAML with environment-variable overrides, then
//! frozen into an immutable snapshot.
//!
//! Reload rebuilds the snapshot from disk + env and replaces the shared handle
//! atomically; in-flight requests keep the snapshot they captured at pipeline
//! entry.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{info, warn};

use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::Route;
use crate::routing::RouteTable;

/// Default upstream timeout when a service omits one
const DEFAULT_SERVICE_TIMEOUT_SECS: u64 = 10;

/// Server binding and I/O timeouts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Seconds allowed to read an inbound request
    #[serde(default = "default_io_timeout")]
    pub read_timeout: u64,

    /// Seconds allowed to produce a response; bounds strategy execution
    #[serde(default = "default_io_timeout")]
    pub write_timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            read_timeout: default_io_timeout(),
            write_timeout: default_io_timeout(),
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout)
    }
}

/// CORS policy consumed by the HTTP front-end layer
///
/// `allow_all_origins = true` wins over any explicit `allowed_origins` list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorsConfig {
    #[serde(default)]
    pub allow_all_origins: bool,

    #[serde(default)]
    pub allowed_origins: Vec<String>,

    #[serde(default = "default_cors_methods")]
    pub allowed_methods: Vec<String>,

    #[serde(default = "default_cors_headers")]
    pub allowed_headers: Vec<String>,
}

/// Logging level and output format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// `json` or `plain`
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// One backend service: base URL plus per-upstream timeout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub url: String,

    /// Seconds before an outbound call to this service is abandoned
    #[serde(default = "default_service_timeout")]
    pub timeout: u64,
}

impl ServiceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

/// Authentication settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Header carrying the API-key credential
    #[serde(default = "default_api_key_header")]
    pub api_key_header: String,

    /// HMAC secret for the `local` validation strategy
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,

    /// Token lifetime in seconds, used by the `local` strategy
    #[serde(default = "default_jwt_expiration")]
    pub jwt_expiration: u64,

    /// Path on the auth service that validates bearer tokens
    #[serde(default = "default_validation_endpoint")]
    pub validation_endpoint: String,

    /// `remote` (POST to the auth service) or `local` (HS256 decode)
    #[serde(default = "default_validation_strategy")]
    pub validation_strategy: String,

    /// Seed keys for the in-memory API-key allowlist
    #[serde(default)]
    pub api_keys: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            api_key_header: default_api_key_header(),
            jwt_secret: default_jwt_secret(),
            jwt_expiration: default_jwt_expiration(),
            validation_endpoint: default_validation_endpoint(),
            validation_strategy: default_validation_strategy(),
            api_keys: Vec::new(),
        }
    }
}

/// Complete gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub cors: CorsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub services: HashMap<String, ServiceConfig>,

    #[serde(default)]
    pub routes: Vec<Route>,

    #[serde(default)]
    pub auth: AuthConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        let mut config = Self {
            server: ServerConfig::default(),
            cors: CorsConfig::default(),
            logging: LoggingConfig::default(),
            services: HashMap::new(),
            routes: Vec::new(),
            auth: AuthConfig::default(),
        };
        config.populate_defaults();
        config
    }
}

impl GatewayConfig {
    /// Load configuration from a YAML file with environment overrides applied
    ///
    /// A missing file is not fatal; defaults plus environment variables then
    /// drive the whole configuration, as they do in containerized deployments.
    pub fn load(path: &Path) -> GatewayResult<Self> {
        let mut config = match std::fs::read_to_string(path) {
            Ok(raw) => {
                let parsed: GatewayConfig = serde_yaml::from_str(&raw)?;
                info!(config_file = %path.display(), "Loaded configuration file");
                parsed
            }
            Err(err) => {
                warn!(
                    config_file = %path.display(),
                    error = %err,
                    "No config file found, using defaults"
                );
                GatewayConfig {
                    server: ServerConfig::default(),
                    cors: CorsConfig::default(),
                    logging: LoggingConfig::default(),
                    services: HashMap::new(),
                    routes: Vec::new(),
                    auth: AuthConfig::default(),
                }
            }
        };

        config.populate_defaults();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Resolve the config file path from `CONFIG_FILE`, defaulting to `config.yaml`
    pub fn config_path_from_env() -> PathBuf {
        std::env::var("CONFIG_FILE")
            .unwrap_or_else(|_| "config.yaml".to_string())
            .into()
    }

    /// Inject the platform service catalogue for any service the file omitted
    fn populate_defaults(&mut self) {
        let defaults = [
            ("analytics", "http://localhost:8000"),
            ("auth", "http://localhost:8001"),
            ("data_management", "http://localhost:8002"),
            ("plant_management", "http://localhost:8003"),
        ];
        for (name, url) in defaults {
            self.services
                .entry(name.to_string())
                .or_insert_with(|| ServiceConfig {
                    url: url.to_string(),
                    timeout: DEFAULT_SERVICE_TIMEOUT_SECS,
                });
        }

        if self.cors.allowed_methods.is_empty() {
            self.cors.allowed_methods = default_cors_methods();
        }
        if self.cors.allowed_headers.is_empty() {
            self.cors.allowed_headers = default_cors_headers();
        }

        // Route methods are matched case-sensitively; canonicalize once here.
        for route in &mut self.routes {
            if route.method != "*" {
                route.method = route.method.to_uppercase();
            }
        }
    }

    /// Apply environment-variable overrides on top of file values
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("HOST") {
            self.server.host = host;
        }
        if let Some(port) = env_parse::<u16>("PORT") {
            self.server.port = port;
        }
        if let Some(secs) = env_parse::<u64>("READ_TIMEOUT") {
            self.server.read_timeout = secs;
        }
        if let Some(secs) = env_parse::<u64>("WRITE_TIMEOUT") {
            self.server.write_timeout = secs;
        }

        if let Ok(level) = std::env::var("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("LOG_FORMAT") {
            self.logging.format = format;
        }

        for (name, service) in self.services.iter_mut() {
            let prefix = name.to_uppercase();
            if let Ok(url) = std::env::var(format!("{prefix}_SERVICE_URL")) {
                service.url = url;
            }
            if let Some(secs) = env_parse::<u64>(&format!("{prefix}_SERVICE_TIMEOUT")) {
                service.timeout = secs;
            }
        }

        if let Ok(header) = std::env::var("API_KEY_HEADER") {
            self.auth.api_key_header = header;
        }
        if let Ok(secret) = std::env::var("JWT_SECRET") {
            self.auth.jwt_secret = secret;
        }
        if let Some(secs) = env_parse::<u64>("JWT_EXPIRATION") {
            self.auth.jwt_expiration = secs;
        }
    }

    /// Validate route invariants and service references
    pub fn validate(&self) -> GatewayResult<()> {
        for route in &self.routes {
            route.validate()?;
            for service in route.referenced_services() {
                if !self.services.contains_key(service) {
                    return Err(GatewayError::config(format!(
                        "route {} references unknown service {}",
                        route.path, service
                    )));
                }
            }
        }
        Ok(())
    }

    /// Look up one service by name
    pub fn service(&self, name: &str) -> Option<&ServiceConfig> {
        self.services.get(name)
    }

    /// Resolve the subset of services a route may call
    pub fn services_for_route(&self, route: &Route) -> HashMap<String, ServiceConfig> {
        let mut subset = HashMap::new();
        for name in route.referenced_services() {
            if let Some(service) = self.services.get(name) {
                subset.insert(name.to_string(), service.clone());
            } else {
                warn!(service = name, "Upstream service not configured");
            }
        }
        subset
    }
}

/// Immutable frozen view observed by a request at pipeline entry
#[derive(Debug)]
pub struct GatewaySnapshot {
    pub config: GatewayConfig,
    pub table: RouteTable,
}

impl GatewaySnapshot {
    pub fn new(config: GatewayConfig) -> Self {
        let table = RouteTable::new(config.routes.clone());
        Self { config, table }
    }
}

/// Shared configuration handle with atomic snapshot replacement
///
/// Readers clone the `Arc` under a short read lock; reload builds a fresh
/// snapshot off to the side and swaps the pointer under the write lock, so
/// in-flight requests continue against the snapshot they started with.
pub struct ConfigManager {
    current: RwLock<Arc<GatewaySnapshot>>,
    config_path: PathBuf,
}

impl ConfigManager {
    pub fn new(config: GatewayConfig, config_path: PathBuf) -> Self {
        Self {
            current: RwLock::new(Arc::new(GatewaySnapshot::new(config))),
            config_path,
        }
    }

    /// The snapshot a request captures at pipeline entry
    pub fn snapshot(&self) -> Arc<GatewaySnapshot> {
        self.current
            .read()
            .expect("config lock poisoned")
            .clone()
    }

    /// Rebuild the snapshot from disk + environment and swap it in
    pub fn reload(&self) -> GatewayResult<()> {
        let config = GatewayConfig::load(&self.config_path)?;
        let snapshot = Arc::new(GatewaySnapshot::new(config));
        let mut guard = self.current.write().expect("config lock poisoned");
        *guard = snapshot;
        info!(
            routes = guard.config.routes.len(),
            services = guard.config.services.len(),
            "Configuration reloaded"
        );
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|raw| raw.parse().ok())
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_io_timeout() -> u64 {
    30
}

fn default_service_timeout() -> u64 {
    DEFAULT_SERVICE_TIMEOUT_SECS
}

fn default_cors_methods() -> Vec<String> {
    ["GET", "POST", "PUT", "DELETE", "OPTIONS"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_cors_headers() -> Vec<String> {
    ["Origin", "Content-Length", "Content-Type", "Authorization"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_api_key_header() -> String {
    "X-API-Key".to_string()
}

fn default_jwt_secret() -> String {
    "change-me".to_string()
}

fn default_jwt_expiration() -> u64 {
    86_400
}

fn default_validation_endpoint() -> String {
    "/api/v1/auth/validate".to_string()
}

fn default_validation_strategy() -> String {
    "remote".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{RouteMode, UpstreamRef};

    #[test]
    fn test_default_service_catalogue() {
        let config = GatewayConfig::default();
        for name in ["analytics", "auth", "data_management", "plant_management"] {
            let service = config.service(name).unwrap();
            assert!(service.url.starts_with("http://localhost:80"));
            assert_eq!(service.timeout, 10);
        }
    }

    #[test]
    fn test_yaml_route_parsing() {
        let raw = r#"
server:
  port: 9000
services:
  auth:
    url: http://auth.internal:8001
    timeout: 5
routes:
  - path: /api/v1/users/{id}
    method: get
    mode: proxy
    upstream: auth
    target_path: /api/v1/users/{id}
  - path: /api/v1/dashboard
    method: GET
    mode: logic
    strategy: dashboard_orchestrator
    auth_required: true
    upstreams:
      - service: analytics
        endpoint: /api/v1/metrics
      - service: plant_management
        endpoint: /api/v1/plants
"#;
        let mut config: GatewayConfig = serde_yaml::from_str(raw).unwrap();
        config.populate_defaults();
        config.validate().unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.service("auth").unwrap().timeout, 5);
        // method is canonicalized to uppercase at load
        assert_eq!(config.routes[0].method, "GET");
        assert_eq!(config.routes[1].mode, RouteMode::Logic);
        assert_eq!(config.routes[1].upstreams.len(), 2);
    }

    #[test]
    fn test_unknown_service_reference_rejected() {
        let config = GatewayConfig {
            routes: vec![Route {
                path: "/api/v1/soil".to_string(),
                method: "GET".to_string(),
                mode: RouteMode::Proxy,
                strategy: None,
                upstream: Some("soil_sensors".to_string()),
                target_path: None,
                auth_required: false,
                upstreams: Vec::new(),
                metadata: HashMap::new(),
            }],
            ..GatewayConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_services_for_route_subset() {
        let config = GatewayConfig::default();
        let route = Route {
            path: "/api/v1/dashboard".to_string(),
            method: "GET".to_string(),
            mode: RouteMode::Logic,
            strategy: Some("dashboard_orchestrator".to_string()),
            upstream: None,
            target_path: None,
            auth_required: false,
            upstreams: vec![
                UpstreamRef {
                    service: "analytics".to_string(),
                    endpoint: "/api/v1/metrics".to_string(),
                    method: None,
                },
                UpstreamRef {
                    service: "plant_management".to_string(),
                    endpoint: "/api/v1/plants".to_string(),
                    method: None,
                },
            ],
            metadata: HashMap::new(),
        };

        let subset = config.services_for_route(&route);
        assert_eq!(subset.len(), 2);
        assert!(subset.contains_key("analytics"));
        assert!(subset.contains_key("plant_management"));
        assert!(!subset.contains_key("auth"));
    }

    #[test]
    fn test_snapshot_swap_is_isolated() {
        let manager = ConfigManager::new(GatewayConfig::default(), "missing.yaml".into());
        let before = manager.snapshot();
        manager.reload().unwrap();
        let after = manager.snapshot();
        // the old snapshot stays valid for requests that captured it
        assert_eq!(before.config.server.port, after.config.server.port);
        assert!(!Arc::ptr_eq(&before, &after));
    }
}
