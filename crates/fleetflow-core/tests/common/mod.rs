// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared fixtures for fleetflow-core integration tests.

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use fleetflow_core::EntityStore;
use fleetflow_core::model::{Facility, GeoPoint, Load, Stop, StopType, TimeWindow};

/// Fixed instant `hours` after 2025-03-01 08:00 UTC.
pub fn at(hours: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap() + chrono::Duration::hours(hours)
}

pub fn facility(id: &str, lat: f64, lng: f64) -> Facility {
    Facility {
        id: id.to_string(),
        name: format!("Facility {id}"),
        location: Some(GeoPoint::new(lat, lng)),
    }
}

/// Pickup then delivery, four hours apart.
pub fn two_stop_load(id: &str) -> Load {
    Load::new(
        id,
        vec![
            Stop::new(
                format!("{id}-PU"),
                StopType::PickUp,
                facility("CHI", 41.88, -87.63),
                TimeWindow { from: at(0), to: Some(at(2)) },
            ),
            Stop::new(
                format!("{id}-DEL"),
                StopType::Delivery,
                facility("IND", 39.77, -86.16),
                TimeWindow { from: at(4), to: None },
            ),
        ],
    )
}

/// Store backed by a SQLite file inside `dir`.
pub async fn sqlite_store(dir: &tempfile::TempDir) -> EntityStore {
    EntityStore::open_sqlite(dir.path().join("fleetflow.db"))
        .await
        .expect("Failed to open SQLite store")
}
