// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Load and truck lifecycles through a running reactor.

mod common;

use std::time::Duration;

use chrono::{NaiveDate, TimeZone, Utc};
use common::{
    CHICAGO, INDIANAPOLIS, eventually, load_where, start_runtime, truck_where,
    truck_with_driver, two_stop_load,
};
use fleetflow_core::change::{ChangeFilter, InsertMatch, Subscription};
use fleetflow_core::model::{Load, LoadStatus, StopStatus, Truck, TruckStatus};
use fleetflow_core::{ChangeEvent, Collection, EntityStore, StoreError};

/// Walk one stop forward through `statuses`, one adjacent edit at a time.
async fn walk(store: &EntityStore, load_id: &str, stop_id: &str, statuses: &[StopStatus]) {
    for status in statuses {
        store
            .set_stop_status(load_id, stop_id, *status)
            .await
            .unwrap_or_else(|e| panic!("{stop_id} -> {status}: {e}"));
    }
}

async fn wait_for_pushes(h: &common::Harness, count: usize) {
    eventually("push delivery", || async {
        (h.push.sent().len() >= count).then_some(())
    })
    .await;
}

#[tokio::test]
async fn test_stop_sequencing_and_completion() {
    let h = start_runtime().await;
    let store = &h.store;
    truck_with_driver(store, "T1", "D1").await;
    store.insert_load(two_stop_load("L1", 0)).await.unwrap();
    store.assign_truck("L1", Some("T1")).await.unwrap();

    let load = load_where(store, "L1", "L1 in progress", |l| {
        l.status == LoadStatus::InProgress && l.route_miles.is_some()
    })
    .await;
    assert_eq!(load.start_truck_location, Some(CHICAGO));
    truck_where(store, "T1", "T1 on route", |t| t.status == TruckStatus::OnRoute).await;
    wait_for_pushes(&h, 1).await;

    // The first run started the pickup and left the delivery alone
    let load = load_where(store, "L1", "pickup activated", |l| {
        l.stops[0].status == StopStatus::OnRouteToPickUp
    })
    .await;
    assert_eq!(load.stops[1].status, StopStatus::New);

    // A second stop cannot start while the pickup is active
    let early = store
        .set_stop_status("L1", "L1-DEL", StopStatus::OnRouteToDelivery)
        .await;
    assert!(matches!(early, Err(StoreError::ConcurrentActiveStop { .. })));

    // Pickup: the driver works through the rest
    walk(
        store,
        "L1",
        "L1-PU",
        &[
            StopStatus::OnSitePickUp,
            StopStatus::LoadedWaitingGtg,
            StopStatus::GoodToGo,
        ],
    )
    .await;
    wait_for_pushes(&h, 2).await;
    let gtg = &h.push.sent()[1];
    assert_eq!(gtg.targets, vec!["token-D1".to_string()]);
    assert_eq!(gtg.payload.data["stopId"], "L1-PU");

    walk(store, "L1", "L1-PU", &[StopStatus::Completed]).await;

    // Exactly one advance: the delivery is activated, never skipped ahead
    let load = load_where(store, "L1", "delivery activated", |l| {
        l.stops[1].status == StopStatus::OnRouteToDelivery
    })
    .await;
    assert_eq!(load.status, LoadStatus::InProgress);

    let skip = store
        .set_stop_status("L1", "L1-DEL", StopStatus::Completed)
        .await;
    assert!(matches!(skip, Err(StoreError::InvalidStopTransition { .. })));

    walk(
        store,
        "L1",
        "L1-DEL",
        &[
            StopStatus::OnSiteDelivery,
            StopStatus::UnloadedWaitingGtg,
            StopStatus::GoodToGo,
            StopStatus::Completed,
        ],
    )
    .await;

    load_where(store, "L1", "L1 completed", |l| l.status == LoadStatus::Completed).await;
    truck_where(store, "T1", "T1 released", |t| t.status == TruckStatus::Available).await;

    // Completion was written once
    tokio::time::sleep(Duration::from_millis(200)).await;
    let mut audit = store.subscribe::<Load>(Subscription::new(
        "audit-status",
        Collection::Loads,
        ChangeFilter {
            on_insert: InsertMatch::Never,
            update_paths: vec!["status"],
        },
    ));
    let mut completions = 0;
    while let Ok(event) = tokio::time::timeout(Duration::from_millis(300), audit.next()).await {
        if let ChangeEvent::Update {
            full_document_before: Some(before),
            full_document_after: Some(after),
            ..
        } = event.unwrap()
        {
            if before.status != LoadStatus::Completed && after.status == LoadStatus::Completed {
                completions += 1;
            }
        }
    }
    assert_eq!(completions, 1);

    h.runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_truck_contention_promotes_earliest_planned_load() {
    let h = start_runtime().await;
    let store = &h.store;
    truck_with_driver(store, "T1", "D1").await;

    store.insert_load(two_stop_load("L1", 0)).await.unwrap();
    store.assign_truck("L1", Some("T1")).await.unwrap();
    load_where(store, "L1", "L1 in progress", |l| l.status == LoadStatus::InProgress).await;

    // L3 starts before L2 even though it is assigned later
    store.insert_load(two_stop_load("L2", 48)).await.unwrap();
    store.insert_load(two_stop_load("L3", 24)).await.unwrap();
    for id in ["L2", "L3"] {
        load_where(store, id, "stops start derived", |l| l.stops_start.is_some()).await;
        store.assign_truck(id, Some("T1")).await.unwrap();
        let planned =
            load_where(store, id, "planned", |l| l.status == LoadStatus::Planned).await;
        assert_eq!(planned.start_truck_location, Some(INDIANAPOLIS));
    }

    store
        .set_load_status("L1", LoadStatus::Completed)
        .await
        .unwrap();
    load_where(store, "L3", "L3 promoted", |l| l.status == LoadStatus::InProgress).await;
    let l2 = store.get_load("L2").await.unwrap().unwrap();
    assert_eq!(l2.status, LoadStatus::Planned);
    let truck = store.get_truck("T1").await.unwrap().unwrap();
    assert_eq!(truck.status, TruckStatus::OnRoute);

    store
        .set_load_status("L3", LoadStatus::Completed)
        .await
        .unwrap();
    load_where(store, "L2", "L2 promoted", |l| l.status == LoadStatus::InProgress).await;

    store
        .set_load_status("L2", LoadStatus::Completed)
        .await
        .unwrap();
    truck_where(store, "T1", "T1 released", |t| t.status == TruckStatus::Available).await;

    h.runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_removing_truck_makes_load_available() {
    let h = start_runtime().await;
    let store = &h.store;
    truck_with_driver(store, "T1", "D1").await;

    store.insert_load(two_stop_load("L1", 0)).await.unwrap();
    store.assign_truck("L1", Some("T1")).await.unwrap();
    load_where(store, "L1", "L1 in progress", |l| l.status == LoadStatus::InProgress).await;

    store.assign_truck("L1", None).await.unwrap();
    let load = load_where(store, "L1", "L1 available", |l| {
        l.status == LoadStatus::Available
    })
    .await;
    assert!(load.start_truck_location.is_none());
    truck_where(store, "T1", "T1 released", |t| t.status == TruckStatus::Available).await;

    h.runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_availability_resolved_across_dst_switch() {
    let h = start_runtime().await;
    let store = &h.store;

    // 05:00 local on the switch day is already daylight time
    let mut truck = Truck::new("T9");
    truck.availability_location = Some(CHICAGO);
    truck.availability_at_local = NaiveDate::from_ymd_opt(2025, 3, 9)
        .unwrap()
        .and_hms_opt(5, 0, 0);
    store.insert_truck(truck).await.unwrap();

    let expected = Utc.with_ymd_and_hms(2025, 3, 9, 10, 0, 0).unwrap();
    truck_where(store, "T9", "availability resolved", |t| {
        t.availability_at == Some(expected)
    })
    .await;

    // Same wall-clock hour one day earlier is standard time: one hour later in UTC
    store
        .update_truck_availability(
            "T9",
            NaiveDate::from_ymd_opt(2025, 3, 8)
                .unwrap()
                .and_hms_opt(5, 0, 0),
            Some(CHICAGO),
        )
        .await
        .unwrap();
    let expected = Utc.with_ymd_and_hms(2025, 3, 8, 11, 0, 0).unwrap();
    truck_where(store, "T9", "availability re-resolved", |t| {
        t.availability_at == Some(expected)
    })
    .await;

    h.runtime.shutdown().await.unwrap();
}
