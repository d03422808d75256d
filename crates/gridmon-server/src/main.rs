use anyhow::Result;
use gridmon_common::types::Configuration;
use std::net::SocketAddr;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use gridmon_server::app;
use gridmon_server::config::ServerConfig;
use gridmon_server::state::AppState;
use gridmon_server::store::{ConfigSource, JsonFileStore};

#[allow(clippy::print_stderr)]
fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  gridmon-server [config.toml]                          Start the server");
    eprintln!("  gridmon-server init-config <config.toml> <seed.json>  Store the tenant configuration from a seed file");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("gridmon=info".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(|s| s.as_str()) {
        Some("init-config") => {
            let config_path = args.get(2).ok_or_else(|| {
                print_usage();
                anyhow::anyhow!("init-config requires <config.toml> and <seed.json> arguments")
            })?;
            let seed_path = args.get(3).ok_or_else(|| {
                print_usage();
                anyhow::anyhow!("init-config requires <seed.json> argument")
            })?;
            run_init_config(config_path, seed_path).await
        }
        Some("--help" | "-h") => {
            print_usage();
            Ok(())
        }
        _ => {
            let config_path = args
                .get(1)
                .map(|s| s.as_str())
                .unwrap_or("config/server.toml");
            run_server(config_path).await
        }
    }
}

/// Write the configuration in `seed_path` to the store, replacing any existing one.
async fn run_init_config(config_path: &str, seed_path: &str) -> Result<()> {
    let config = ServerConfig::load(config_path)?;

    let seed_content = std::fs::read_to_string(seed_path)
        .map_err(|e| anyhow::anyhow!("Failed to read seed file '{}': {}", seed_path, e))?;
    let seed: Configuration = serde_json::from_str(&seed_content)
        .map_err(|e| anyhow::anyhow!("Failed to parse seed file '{}': {}", seed_path, e))?;
    seed.validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration in '{}': {}", seed_path, e))?;

    let store = JsonFileStore::open(config.store_path()).await?;
    let config_id = seed.id;
    store.put_configuration(seed).await?;

    tracing::info!(
        config_id,
        store = %store.path().display(),
        "Configuration initialized"
    );
    Ok(())
}

async fn run_server(config_path: &str) -> Result<()> {
    let config = ServerConfig::load(config_path)?;

    tracing::info!(
        http_port = config.http_port,
        data_dir = %config.data_dir,
        provider = %config.provider.provider_type,
        base_url = %config.provider.base_url,
        "gridmon-server starting"
    );

    let state = AppState::build(config.clone()).await?;
    let shutdown = CancellationToken::new();

    let trigger_handle = if config.collection.enabled {
        let trigger = state.trigger();
        Some(tokio::spawn(trigger.run(shutdown.clone())))
    } else {
        tracing::info!("Collection trigger disabled");
        None
    };

    let http_addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    let listener = tokio::net::TcpListener::bind(http_addr).await?;
    let http_app = app::build_http_app(state.clone());

    tracing::info!(http = %http_addr, "Server started");

    let http_shutdown = shutdown.clone();
    let result = axum::serve(listener, http_app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = signal::ctrl_c() => tracing::info!("Shutting down gracefully"),
                _ = http_shutdown.cancelled() => {}
            }
        })
        .await;
    if let Err(e) = &result {
        tracing::error!(error = %e, "HTTP server error");
    }

    shutdown.cancel();
    if let Some(handle) = trigger_handle {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Collection trigger task failed");
        }
    }
    state.scheduler.shutdown().await;
    tracing::info!("Server stopped");

    result.map_err(Into::into)
}
