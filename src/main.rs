//! # Verdant API Gateway - Main Entry Point
//!
//! Startup sequence: load the configuration snapshot, initialize logging,
//! verify every route resolves to a registered strategy, bind the server, and
//! run until SIGINT/SIGTERM. SIGHUP swaps in a freshly loaded configuration
//! without dropping in-flight requests; shutdown drains for up to 30 seconds.
//!
//! Exit codes: 0 on clean shutdown, non-zero on bind failure or fatal
//! configuration error.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use verdant_gateway::auth::AuthGate;
use verdant_gateway::core::config::{ConfigManager, GatewayConfig, LoggingConfig};
use verdant_gateway::pipeline::Pipeline;
use verdant_gateway::server::{self, AppState};
use verdant_gateway::strategies::StrategyRegistry;
use verdant_gateway::upstream::UpstreamClient;

#[tokio::main]
async fn main() {
    let config_path = GatewayConfig::config_path_from_env();
    let config = match GatewayConfig::load(&config_path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Fatal configuration error: {err}");
            std::process::exit(1);
        }
    };

    init_observability(&config.logging);

    info!("🚀 Starting Verdant API Gateway");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        routes = config.routes.len(),
        services = config.services.len(),
        config_file = %config_path.display(),
        "Configuration loaded"
    );

    let registry = Arc::new(StrategyRegistry::builtin());
    for route in &config.routes {
        let strategy = route.strategy_name();
        if !registry.contains(strategy) {
            error!(
                route = %route.path,
                strategy,
                "Route references an unknown strategy"
            );
            std::process::exit(1);
        }
    }

    let bind_addr: SocketAddr = match config.server.bind_addr().parse() {
        Ok(addr) => addr,
        Err(err) => {
            error!("Invalid bind address {}: {err}", config.server.bind_addr());
            std::process::exit(1);
        }
    };

    let gate = Arc::new(AuthGate::new(config.auth.api_keys.clone()));
    let manager = Arc::new(ConfigManager::new(config, config_path));
    let client = Arc::new(UpstreamClient::new());
    let pipeline = Arc::new(Pipeline::new(
        manager.clone(),
        registry,
        gate,
        client,
    ));

    let app = server::build_app(AppState::new(pipeline, manager.clone()));
    spawn_reload_handler(manager);

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let mut server_task = tokio::spawn(server::serve(app, bind_addr, async move {
        let _ = shutdown_rx.await;
    }));

    info!("🌐 Gateway ready on {bind_addr}");

    tokio::select! {
        _ = shutdown_signal() => {
            info!("🛑 Shutdown signal received, draining in-flight requests...");
            let _ = shutdown_tx.send(());

            match tokio::time::timeout(Duration::from_secs(30), &mut server_task).await {
                Ok(Ok(Ok(()))) => info!("✅ Gateway shutdown complete"),
                Ok(Ok(Err(err))) => {
                    error!("Server error during shutdown: {err}");
                    std::process::exit(1);
                }
                Ok(Err(err)) => {
                    error!("Server task failed: {err}");
                    std::process::exit(1);
                }
                Err(_) => {
                    warn!("⚠️  Drain timed out after 30s, forcing shutdown");
                }
            }
        }
        result = &mut server_task => {
            // the server only returns early on bind failure or a fatal accept error
            match result {
                Ok(Ok(())) => info!("Server task completed"),
                Ok(Err(err)) => {
                    error!("Failed to start gateway: {err}");
                    std::process::exit(1);
                }
                Err(err) => {
                    error!("Server task failed: {err}");
                    std::process::exit(1);
                }
            }
        }
    }
}

/// Initialize logging per the configured level and format
fn init_observability(logging: &LoggingConfig) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "verdant_gateway={},tower_http=info",
            logging.level
        ))
    });

    let registry = tracing_subscriber::registry().with(filter);
    if logging.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true).json())
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .init();
    }
}

/// Reload the configuration snapshot on SIGHUP
fn spawn_reload_handler(config: Arc<ConfigManager>) {
    tokio::spawn(async move {
        let mut hangup = match signal::unix::signal(signal::unix::SignalKind::hangup()) {
            Ok(stream) => stream,
            Err(err) => {
                warn!("Failed to install SIGHUP handler: {err}");
                return;
            }
        };
        while hangup.recv().await.is_some() {
            info!("📡 SIGHUP received, reloading configuration");
            if let Err(err) = config.reload() {
                error!("Configuration reload failed: {err}");
            }
        }
    });
}

/// Resolve when SIGINT or SIGTERM arrives
async fn shutdown_signal() {
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
        .expect("Failed to install SIGTERM handler");
    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .expect("Failed to install SIGINT handler");

    tokio::select! {
        _ = sigterm.recv() => {
            info!("📡 Received SIGTERM, initiating graceful shutdown...");
        }
        _ = sigint.recv() => {
            info!("📡 Received SIGINT (Ctrl+C), initiating graceful shutdown...");
        }
    }
}
