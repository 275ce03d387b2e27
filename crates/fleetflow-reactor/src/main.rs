// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Fleetflow Reactor - standalone change-feed consumer process
//!
//! Opens the SQLite store, starts every consumer queue and the availability
//! sweeper, and runs until Ctrl-C or a fatal feed failure.

use std::sync::Arc;
use tracing::{error, info, warn};

use fleetflow_core::EntityStore;
use fleetflow_reactor::config::Config;
use fleetflow_reactor::geo::{GoogleMapsClient, GoogleMapsConfig};
use fleetflow_reactor::runtime::ReactorRuntime;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fleetflow_reactor=info,fleetflow_core=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let config = Config::from_env()?;

    info!(
        database = %config.database_path.display(),
        queue_parallelism = config.queue_parallelism,
        notification_parallelism = config.notification_parallelism,
        geo_enabled = config.google_maps_key.is_some(),
        "Starting Fleetflow Reactor"
    );

    let store = EntityStore::open_sqlite(&config.database_path)
        .await?
        .with_feed_poll_interval(config.feed_poll_interval);

    info!("Store opened");

    let geo = Arc::new(GoogleMapsClient::new(GoogleMapsConfig {
        api_key: config.google_maps_key.clone(),
        base_url: config.google_maps_url.clone(),
        ..Default::default()
    })?);

    let runtime = ReactorRuntime::builder()
        .store(store)
        .geo(geo)
        .queue_parallelism(config.queue_parallelism)
        .notification_parallelism(config.notification_parallelism)
        .queue_timeout(config.queue_timeout)
        .sweep_interval(config.sweep_interval)
        .build()?
        .start()
        .await?;

    let fatal = runtime.fatal_token();
    let failed = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Shutdown signal received");
            false
        }
        _ = fatal.cancelled() => {
            error!(queues = ?runtime.queue_statuses(), "Change feed failed; shutting down");
            true
        }
    };

    runtime.shutdown().await?;

    info!("Fleetflow Reactor shut down");

    if failed {
        return Err(anyhow::anyhow!("change feed failed"));
    }
    Ok(())
}
