// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::path::PathBuf;
use std::time::Duration;

/// Reactor configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database file.
    pub database_path: PathBuf,
    /// Google Maps API key. Geo lookups yield nothing without it.
    pub google_maps_key: Option<String>,
    /// Google Maps API base URL.
    pub google_maps_url: String,
    /// Maximum concurrent jobs per entity queue.
    pub queue_parallelism: usize,
    /// Maximum concurrent jobs per notification delivery queue.
    pub notification_parallelism: usize,
    /// Per-job timeout.
    pub queue_timeout: Duration,
    /// Fallback change-feed poll interval.
    pub feed_poll_interval: Duration,
    /// Availability sweeper period.
    pub sweep_interval: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Optional (with defaults):
    /// - `FLEETFLOW_DATABASE_PATH`: SQLite file (default: `.data/fleetflow.db`)
    /// - `FLEETFLOW_GOOGLE_MAPS_KEY`: provider key (default: unset)
    /// - `FLEETFLOW_GOOGLE_MAPS_URL`: provider base URL
    /// - `FLEETFLOW_QUEUE_PARALLELISM`: entity queue parallelism (default: 8)
    /// - `FLEETFLOW_NOTIFICATION_PARALLELISM`: delivery queue parallelism (default: 4)
    /// - `FLEETFLOW_QUEUE_TIMEOUT_SECS`: per-job timeout (default: 30)
    /// - `FLEETFLOW_FEED_POLL_MS`: feed poll interval (default: 250)
    /// - `FLEETFLOW_SWEEP_INTERVAL_SECS`: sweeper period (default: 60)
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_path = PathBuf::from(
            std::env::var("FLEETFLOW_DATABASE_PATH")
                .unwrap_or_else(|_| ".data/fleetflow.db".to_string()),
        );

        let google_maps_key = std::env::var("FLEETFLOW_GOOGLE_MAPS_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty());

        let google_maps_url = std::env::var("FLEETFLOW_GOOGLE_MAPS_URL")
            .unwrap_or_else(|_| "https://maps.googleapis.com".to_string());

        let queue_parallelism = positive("FLEETFLOW_QUEUE_PARALLELISM", 8)?;
        let notification_parallelism = positive("FLEETFLOW_NOTIFICATION_PARALLELISM", 4)?;
        let queue_timeout = Duration::from_secs(positive("FLEETFLOW_QUEUE_TIMEOUT_SECS", 30)? as u64);
        let feed_poll_interval =
            Duration::from_millis(positive("FLEETFLOW_FEED_POLL_MS", 250)? as u64);
        let sweep_interval =
            Duration::from_secs(positive("FLEETFLOW_SWEEP_INTERVAL_SECS", 60)? as u64);

        Ok(Self {
            database_path,
            google_maps_key,
            google_maps_url,
            queue_parallelism,
            notification_parallelism,
            queue_timeout,
            feed_poll_interval,
            sweep_interval,
        })
    }
}

fn positive(var: &'static str, default: usize) -> Result<usize, ConfigError> {
    match std::env::var(var) {
        Ok(value) => match value.parse::<usize>() {
            Ok(n) if n > 0 => Ok(n),
            _ => Err(ConfigError::Invalid(var, "must be a positive integer")),
        },
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
