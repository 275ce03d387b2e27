// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Fleetflow Reactor - Change-Feed Consumers
//!
//! This crate keeps derived load and truck state in step with operator
//! edits. Every subscription on the store's change feed drives one
//! bounded-concurrency [`WorkQueue`](work_queue::WorkQueue); every queue runs
//! one consumer.
//!
//! # Architecture
//!
//! ```text
//!         CRUD layer (operators, drivers, integrations)
//!                            │ writes
//!                            ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                    fleetflow-core EntityStore                       │
//! │          documents + ordered change feed + feed cursors             │
//! └─────────────────────────────────────────────────────────────────────┘
//!     │ load-stops     │ load-status    │ truck-availability   │ *-delivery
//!     ▼                ▼                ▼                      ▼
//! ┌──────────┐   ┌──────────┐   ┌────────────────┐   ┌──────────────────┐
//! │  Stops   │   │  Status  │   │  Availability  │   │    Delivery      │
//! │ consumer │   │ consumer │   │    consumer    │   │ consumers (x2)   │
//! └────┬─────┘   └────┬─────┘   └───────┬────────┘   └────────┬─────────┘
//!      │ gated commit │ gated commit    │ gated commit        │ state CAS
//!      │ push tasks ──┴─────────────────┼─────────────────────►
//!      ▼                                ▼
//!  Geo provider (distances)     Geo provider (time zones)
//! ```
//!
//! # Version Gate
//!
//! Delivery is at least once and unordered. Each consumer guards its
//! derivation with a watermark field (`stopsVer`, `statusVer`,
//! `availabilityAtVer`); see [`version_gate`].
//!
//! # Configuration
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `FLEETFLOW_DATABASE_PATH` | `.data/fleetflow.db` | SQLite file |
//! | `FLEETFLOW_GOOGLE_MAPS_KEY` | unset | Google Maps key |
//! | `FLEETFLOW_GOOGLE_MAPS_URL` | `https://maps.googleapis.com` | Google Maps base URL |
//! | `FLEETFLOW_QUEUE_PARALLELISM` | `8` | Load and truck queue parallelism |
//! | `FLEETFLOW_NOTIFICATION_PARALLELISM` | `4` | Delivery queue parallelism |
//! | `FLEETFLOW_QUEUE_TIMEOUT_SECS` | `30` | Per-job timeout |
//! | `FLEETFLOW_FEED_POLL_MS` | `250` | Change feed poll interval |
//! | `FLEETFLOW_SWEEP_INTERVAL_SECS` | `60` | Availability sweeper period |

/// Expiry of "Will be available" windows.
pub mod availability_sweeper;

/// Environment configuration.
pub mod config;

/// Load and truck lifecycle consumers.
pub mod consumers;

/// Error types.
pub mod error;

/// Distance and time zone providers.
pub mod geo;

/// Notification dispatch and delivery.
pub mod notifications;

/// Embeddable runtime.
pub mod runtime;

/// Periodic maintenance jobs.
pub mod scheduler;

/// Local time resolution.
pub mod timezone;

/// Watermark protocol.
pub mod version_gate;

/// Bounded-concurrency pull/process engine.
pub mod work_queue;

pub use error::{ReactorError, Result};
pub use runtime::ReactorRuntime;
