// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Deterministic in-process provider for tests and offline runs.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleetflow_core::model::GeoPoint;

use super::{GeoProvider, TimeZoneInfo};

const EARTH_RADIUS_MILES: f64 = 3958.8;

/// Fixed zone answered by [`MockGeoProvider`] for every location.
#[derive(Debug, Clone)]
pub struct MockZone {
    /// IANA zone name.
    pub id: String,
    /// Standard offset in seconds.
    pub raw_offset_secs: i64,
    /// Daylight offset in seconds, applied from `dst_from`.
    pub dst_offset_secs: i64,
    /// First instant daylight saving is in effect. `None` disables it.
    pub dst_from: Option<DateTime<Utc>>,
}

/// Great-circle distances and a single configurable time zone.
#[derive(Debug, Default)]
pub struct MockGeoProvider {
    zone: Option<MockZone>,
    unreachable: Mutex<Vec<GeoPoint>>,
    distance_calls: AtomicUsize,
    time_zone_calls: AtomicUsize,
}

impl MockGeoProvider {
    /// Provider with no time zone; distances only.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer time zone lookups with `zone`.
    pub fn with_zone(mut self, zone: MockZone) -> Self {
        self.zone = Some(zone);
        self
    }

    /// Make every distance to or from `point` unknown.
    pub fn mark_unreachable(&self, point: GeoPoint) {
        if let Ok(mut points) = self.unreachable.lock() {
            points.push(point);
        }
    }

    /// Number of distance lookups served.
    pub fn distance_calls(&self) -> usize {
        self.distance_calls.load(Ordering::SeqCst)
    }

    /// Number of time zone lookups served.
    pub fn time_zone_calls(&self) -> usize {
        self.time_zone_calls.load(Ordering::SeqCst)
    }

    fn is_unreachable(&self, point: GeoPoint) -> bool {
        self.unreachable
            .lock()
            .map(|points| points.contains(&point))
            .unwrap_or(false)
    }
}

/// Haversine distance in miles.
pub fn great_circle_miles(from: GeoPoint, to: GeoPoint) -> f64 {
    let (lat1, lat2) = (from.lat.to_radians(), to.lat.to_radians());
    let d_lat = lat2 - lat1;
    let d_lng = (to.lng - from.lng).to_radians();
    let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_MILES * a.sqrt().asin()
}

#[async_trait]
impl GeoProvider for MockGeoProvider {
    async fn distance(&self, from: GeoPoint, to: GeoPoint) -> Option<f64> {
        self.distance_calls.fetch_add(1, Ordering::SeqCst);
        if self.is_unreachable(from) || self.is_unreachable(to) {
            return None;
        }
        Some(great_circle_miles(from, to))
    }

    async fn time_zone(&self, _at: GeoPoint, instant: DateTime<Utc>) -> Option<TimeZoneInfo> {
        self.time_zone_calls.fetch_add(1, Ordering::SeqCst);
        let zone = self.zone.as_ref()?;
        let in_dst = zone.dst_from.is_some_and(|from| instant >= from);
        Some(TimeZoneInfo {
            time_zone_id: zone.id.clone(),
            raw_offset_secs: zone.raw_offset_secs,
            dst_offset_secs: if in_dst { zone.dst_offset_secs } else { 0 },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_distance_is_symmetric_and_counted() {
        let geo = MockGeoProvider::new();
        let chicago = GeoPoint::new(41.88, -87.63);
        let indianapolis = GeoPoint::new(39.77, -86.16);

        let there = geo.distance(chicago, indianapolis).await.unwrap();
        let back = geo.distance(indianapolis, chicago).await.unwrap();
        assert!((there - back).abs() < 1e-9);
        // Roughly 165 miles as the crow flies
        assert!(there > 150.0 && there < 180.0);
        assert_eq!(geo.distance_calls(), 2);
    }

    #[tokio::test]
    async fn test_unreachable_point() {
        let geo = MockGeoProvider::new();
        let island = GeoPoint::new(0.0, 0.0);
        geo.mark_unreachable(island);
        assert!(geo.distance(island, GeoPoint::new(1.0, 1.0)).await.is_none());
    }

    #[tokio::test]
    async fn test_zone_switches_to_dst() {
        let switch = DateTime::from_timestamp(1_741_507_200, 0).unwrap();
        let geo = MockGeoProvider::new().with_zone(MockZone {
            id: "America/Chicago".into(),
            raw_offset_secs: -6 * 3600,
            dst_offset_secs: 3600,
            dst_from: Some(switch),
        });
        let here = GeoPoint::new(41.88, -87.63);

        let before = geo
            .time_zone(here, switch - chrono::Duration::seconds(1))
            .await
            .unwrap();
        let after = geo.time_zone(here, switch).await.unwrap();
        assert_eq!(before.dst_offset_secs, 0);
        assert_eq!(after.dst_offset_secs, 3600);
        assert!(MockGeoProvider::new().time_zone(here, switch).await.is_none());
    }
}
