// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for fleetflow-core.

use thiserror::Error;

use crate::document::Collection;
use crate::model::StopStatus;

/// Store errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failed.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Document was not found.
    #[error("{collection} '{id}' not found")]
    NotFound {
        /// Collection that was searched.
        collection: Collection,
        /// Document identifier.
        id: String,
    },

    /// Document already exists.
    #[error("{collection} '{id}' already exists")]
    AlreadyExists {
        /// Target collection.
        collection: Collection,
        /// Document identifier.
        id: String,
    },

    /// Stop status edit that skips a position in the stop's status sequence.
    #[error("Invalid stop transition on load '{load_id}', stop '{stop_id}': {from} -> {to}")]
    InvalidStopTransition {
        /// Load owning the stop.
        load_id: String,
        /// Stop being edited.
        stop_id: String,
        /// Current status.
        from: StopStatus,
        /// Requested status.
        to: StopStatus,
    },

    /// Stop edit that would leave two stops of one load in progress.
    #[error("Stop '{stop_id}' on load '{load_id}' cannot start while stop '{active_stop_id}' is active")]
    ConcurrentActiveStop {
        /// Load owning the stops.
        load_id: String,
        /// Stop being edited.
        stop_id: String,
        /// Stop already in progress.
        active_stop_id: String,
    },

    /// Stop does not exist on the load.
    #[error("Stop '{stop_id}' not found on load '{load_id}'")]
    StopNotFound {
        /// Load that was searched.
        load_id: String,
        /// Missing stop identifier.
        stop_id: String,
    },

    /// A persisted feed record could not be decoded.
    #[error("Invalid feed record at position {position}: {reason}")]
    InvalidFeedRecord {
        /// Feed position of the record.
        position: i64,
        /// What was wrong with it.
        reason: String,
    },

    /// Compare-and-swap kept losing against concurrent writers.
    #[error("Write conflict on {collection} '{id}' after {attempts} attempts")]
    WriteConflict {
        /// Target collection.
        collection: Collection,
        /// Document identifier.
        id: String,
        /// Number of attempts made.
        attempts: u32,
    },
}

/// Result type using [`StoreError`].
pub type Result<T> = std::result::Result<T, StoreError>;
