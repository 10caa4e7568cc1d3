//! Danmaku aggregator server

use danmu_aggregator::{core, ApiServer, AggregatorState, DanmakuService};

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Logging isn't up yet, so config errors go to stderr
    let config = match core::Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    let _logger = match core::Logger::init(&config.logging) {
        Ok(logger) => logger,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            return Err(e.into());
        }
    };

    info!("Starting danmu aggregator v{}", danmu_aggregator::VERSION);
    info!(
        host = %config.server.host,
        port = config.server.port,
        "Server configuration"
    );
    info!(
        order = ?config.sources.order,
        remote = config.sources.remote.len(),
        strategy = %config.sources.search_strategy,
        "Source configuration"
    );

    let server_config = config.server.clone();
    let server_url = format!("http://{}:{}", server_config.host, server_config.port);
    let sweep_interval = config.cache.sweep_interval_secs;
    let state = Arc::new(AggregatorState::from_config(config)?);
    if sweep_interval > 0 {
        core::spawn_cache_sweeper(state.clone(), Duration::from_secs(sweep_interval));
        info!(every_secs = sweep_interval, "Cache sweeper started");
    }
    let service = Arc::new(DanmakuService::new(state));

    let server = ApiServer::new(server_config, service);
    info!(url = %server_url, "Server ready");

    server.serve().await?;

    Ok(())
}
