// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared fixtures for fleetflow-reactor integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use fleetflow_core::EntityStore;
use fleetflow_core::model::{
    Driver, Facility, GeoPoint, Load, PushMessage, Stop, StopType, TimeWindow, Truck,
};
use fleetflow_reactor::ReactorRuntime;
use fleetflow_reactor::geo::{MockGeoProvider, MockZone};
use fleetflow_reactor::notifications::RecordingTransport;

pub const CHICAGO: GeoPoint = GeoPoint {
    lat: 41.88,
    lng: -87.63,
};
pub const INDIANAPOLIS: GeoPoint = GeoPoint {
    lat: 39.77,
    lng: -86.16,
};

/// Fixed instant `hours` after 2025-03-01 08:00 UTC.
pub fn at(hours: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap() + chrono::Duration::hours(hours)
}

pub fn facility(id: &str, location: GeoPoint) -> Facility {
    Facility {
        id: id.to_string(),
        name: format!("Facility {id}"),
        location: Some(location),
    }
}

/// Chicago pickup then Indianapolis delivery, starting `offset` hours after
/// [`at`]`(0)`.
pub fn two_stop_load(id: &str, offset: i64) -> Load {
    Load::new(
        id,
        vec![
            Stop::new(
                format!("{id}-PU"),
                StopType::PickUp,
                facility("CHI", CHICAGO),
                TimeWindow {
                    from: at(offset),
                    to: Some(at(offset + 2)),
                },
            ),
            Stop::new(
                format!("{id}-DEL"),
                StopType::Delivery,
                facility("IND", INDIANAPOLIS),
                TimeWindow {
                    from: at(offset + 4),
                    to: None,
                },
            ),
        ],
    )
}

/// Central time with DST from 2025-03-09 08:00 UTC.
pub fn chicago_geo() -> MockGeoProvider {
    MockGeoProvider::new().with_zone(MockZone {
        id: "America/Chicago".into(),
        raw_offset_secs: -6 * 3600,
        dst_offset_secs: 3600,
        dst_from: Some(Utc.with_ymd_and_hms(2025, 3, 9, 8, 0, 0).unwrap()),
    })
}

/// Truck `truck_id` parked in Chicago with driver `driver_id` holding one
/// push token.
pub async fn truck_with_driver(store: &EntityStore, truck_id: &str, driver_id: &str) {
    let mut driver = Driver::new(driver_id, "Dana");
    driver.push_tokens = vec![format!("token-{driver_id}")];
    store.insert_driver(driver).await.unwrap();

    let mut truck = Truck::new(truck_id);
    truck.last_location = Some(CHICAGO);
    truck.driver = Some(driver_id.to_string());
    store.insert_truck(truck).await.unwrap();
}

pub struct Harness {
    pub store: EntityStore,
    pub geo: Arc<MockGeoProvider>,
    pub push: Arc<RecordingTransport<PushMessage>>,
    pub runtime: ReactorRuntime,
}

/// Runtime over an in-memory store with mock geo and recording push.
pub async fn start_runtime() -> Harness {
    let store = EntityStore::in_memory().with_feed_poll_interval(Duration::from_millis(20));
    let geo = Arc::new(chicago_geo());
    let push = Arc::new(RecordingTransport::<PushMessage>::new());

    let runtime = ReactorRuntime::builder()
        .store(store.clone())
        .geo(geo.clone())
        .push_transport(push.clone())
        .queue_parallelism(4)
        .notification_parallelism(2)
        .queue_timeout(Duration::from_secs(5))
        .build()
        .expect("Failed to build runtime")
        .start()
        .await
        .expect("Failed to start runtime");

    Harness {
        store,
        geo,
        push,
        runtime,
    }
}

/// Poll `check` until it returns `Some`, failing the test after five seconds.
pub async fn eventually<T, F, Fut>(what: &str, mut check: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(value) = check().await {
            return value;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Wait until the load satisfies `predicate`, returning it.
pub async fn load_where(
    store: &EntityStore,
    id: &str,
    what: &str,
    predicate: impl Fn(&Load) -> bool,
) -> Load {
    let predicate = &predicate;
    eventually(what, move || async move {
        store
            .get_load(id)
            .await
            .unwrap()
            .filter(|load| predicate(load))
    })
    .await
}

/// Wait until the truck satisfies `predicate`, returning it.
pub async fn truck_where(
    store: &EntityStore,
    id: &str,
    what: &str,
    predicate: impl Fn(&Truck) -> bool,
) -> Truck {
    let predicate = &predicate;
    eventually(what, move || async move {
        store
            .get_truck(id)
            .await
            .unwrap()
            .filter(|truck| predicate(truck))
    })
    .await
}
