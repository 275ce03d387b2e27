// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for fleetflow-reactor.

use thiserror::Error;

/// Reactor errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReactorError {
    /// Store operation failed.
    #[error("Store error: {0}")]
    Store(#[from] fleetflow_core::StoreError),

    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Geo provider setup failed.
    #[error("Geo provider error: {0}")]
    Geo(#[from] crate::geo::GeoError),

    /// Notification transport failed.
    #[error("Transport error: {0}")]
    Transport(#[from] crate::notifications::TransportError),

    /// A pull source has no more events.
    #[error("Feed '{0}' closed")]
    FeedClosed(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Result type using [`ReactorError`].
pub type Result<T> = std::result::Result<T, ReactorError>;
