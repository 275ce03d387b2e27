// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Distance and time zone lookups.
//!
//! Providers never fail into a consumer: every gap (no key, network failure,
//! unknown route) comes back as `None` and the consumer leaves the derived
//! field undefined.

pub mod google;
pub mod mock;

pub use self::google::{GoogleMapsClient, GoogleMapsConfig};
pub use self::mock::{MockGeoProvider, MockZone};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleetflow_core::model::GeoPoint;
use thiserror::Error;

/// Time zone of a location at an instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeZoneInfo {
    /// IANA zone name, e.g. `America/Chicago`.
    pub time_zone_id: String,
    /// Standard offset from UTC in seconds.
    pub raw_offset_secs: i64,
    /// Daylight saving offset in seconds (0 when not in effect).
    pub dst_offset_secs: i64,
}

impl TimeZoneInfo {
    /// Total offset from UTC in seconds.
    pub fn total_offset_secs(&self) -> i64 {
        self.raw_offset_secs + self.dst_offset_secs
    }
}

/// Distance and time zone provider.
#[async_trait]
pub trait GeoProvider: Send + Sync {
    /// Road distance in miles.
    async fn distance(&self, from: GeoPoint, to: GeoPoint) -> Option<f64>;

    /// Time zone in effect at `at` on `instant`.
    async fn time_zone(&self, at: GeoPoint, instant: DateTime<Utc>) -> Option<TimeZoneInfo>;
}

/// Provider-internal failures. Logged, never surfaced to consumers.
#[derive(Debug, Error)]
pub enum GeoError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The API answered with a non-OK status.
    #[error("API status {0}")]
    Status(String),

    /// The response lacked an expected field.
    #[error("Missing field in response: {0}")]
    MissingField(&'static str),
}
