// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runtime construction, feed failure and shutdown.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::chicago_geo;
use fleetflow_core::backend::{Backend, DocumentChange, FeedRecord, MemoryBackend, StoredDocument};
use fleetflow_core::model::Load;
use fleetflow_core::{Collection, EntityStore, StoreError};
use fleetflow_reactor::ReactorRuntime;
use fleetflow_reactor::consumers::load_stops;
use fleetflow_reactor::work_queue::QueueStatus;
use serde_json::Value;
use tokio::sync::Notify;

/// Memory backend whose load feed returns a corrupt record.
struct CorruptLoadFeed {
    inner: MemoryBackend,
}

#[async_trait]
impl Backend for CorruptLoadFeed {
    fn name(&self) -> &'static str {
        "corrupt"
    }

    async fn fetch(
        &self,
        collection: Collection,
        id: &str,
    ) -> Result<Option<StoredDocument>, StoreError> {
        self.inner.fetch(collection, id).await
    }

    async fn find_by_field(
        &self,
        collection: Collection,
        field: &str,
        value: &str,
    ) -> Result<Vec<StoredDocument>, StoreError> {
        self.inner.find_by_field(collection, field, value).await
    }

    async fn insert(
        &self,
        collection: Collection,
        id: &str,
        version: i64,
        body: Value,
    ) -> Result<(), StoreError> {
        self.inner.insert(collection, id, version, body).await
    }

    async fn compare_and_swap(
        &self,
        collection: Collection,
        id: &str,
        expected_version: i64,
        change: DocumentChange,
    ) -> Result<bool, StoreError> {
        self.inner
            .compare_and_swap(collection, id, expected_version, change)
            .await
    }

    async fn read_feed(
        &self,
        collection: Collection,
        after_position: i64,
        limit: i64,
    ) -> Result<Vec<FeedRecord>, StoreError> {
        if collection == Collection::Loads {
            return Err(StoreError::InvalidFeedRecord {
                position: after_position + 1,
                reason: "truncated body".to_string(),
            });
        }
        self.inner.read_feed(collection, after_position, limit).await
    }

    async fn load_cursor(&self, subscription: &str) -> Result<Option<i64>, StoreError> {
        self.inner.load_cursor(subscription).await
    }

    async fn save_cursor(&self, subscription: &str, position: i64) -> Result<(), StoreError> {
        self.inner.save_cursor(subscription, position).await
    }

    fn feed_signal(&self) -> Arc<Notify> {
        self.inner.feed_signal()
    }
}

#[tokio::test]
async fn test_builder_requires_store_and_geo() {
    let err = ReactorRuntime::builder().build().err().unwrap();
    assert!(err.to_string().contains("store is required"));

    let err = ReactorRuntime::builder()
        .store(EntityStore::in_memory())
        .build()
        .err()
        .unwrap();
    assert!(err.to_string().contains("geo is required"));
}

#[tokio::test]
async fn test_runtime_starts_every_queue_and_shuts_down() {
    let h = common::start_runtime().await;

    let statuses = h.runtime.queue_statuses();
    let names: Vec<&str> = statuses.iter().map(|(name, _)| name.as_str()).collect();
    for expected in [
        "load-stops",
        "load-status",
        "truck-availability",
        "push-delivery",
        "email-delivery",
    ] {
        assert!(names.contains(&expected), "missing queue {expected}");
    }
    assert!(statuses.iter().all(|(_, s)| *s == QueueStatus::Running));
    assert!(h.runtime.is_running());

    tokio::time::timeout(Duration::from_secs(5), h.runtime.shutdown())
        .await
        .expect("shutdown hung")
        .unwrap();
}

#[tokio::test]
async fn test_feed_failure_cancels_fatal_token() {
    let store = EntityStore::new(Arc::new(CorruptLoadFeed {
        inner: MemoryBackend::new(),
    }))
    .with_feed_poll_interval(Duration::from_millis(20));

    let runtime = ReactorRuntime::builder()
        .store(store)
        .geo(Arc::new(chicago_geo()))
        .build()
        .unwrap()
        .start()
        .await
        .unwrap();

    let fatal = runtime.fatal_token();
    tokio::time::timeout(Duration::from_secs(5), fatal.cancelled())
        .await
        .expect("feed failure was not fatal");

    let statuses = runtime.queue_statuses();
    let status_of = |name: &str| {
        statuses
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, s)| *s)
            .unwrap()
    };
    // Queues over other collections are unaffected
    assert_eq!(status_of("truck-availability"), QueueStatus::Running);
    assert!(
        ["load-stops", "load-status"]
            .iter()
            .any(|name| status_of(name) == QueueStatus::Failed)
    );

    runtime.shutdown().await.unwrap();
}

async fn open_runtime(
    path: &std::path::Path,
    geo: Arc<fleetflow_reactor::geo::MockGeoProvider>,
) -> (EntityStore, ReactorRuntime) {
    let store = EntityStore::open_sqlite(path)
        .await
        .unwrap()
        .with_feed_poll_interval(Duration::from_millis(20));
    let runtime = ReactorRuntime::builder()
        .store(store.clone())
        .geo(geo)
        .build()
        .unwrap()
        .start()
        .await
        .unwrap();
    (store, runtime)
}

#[tokio::test]
async fn test_restart_redelivers_in_flight_event_only() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fleetflow.db");

    // The insert is handed to the stops consumer, which dies mid-job
    {
        let store = EntityStore::open_sqlite(&path).await.unwrap();
        store
            .insert_load(common::two_stop_load("L1", 0))
            .await
            .unwrap();
        let mut stream = store.subscribe::<Load>(load_stops::subscription());
        let handed_out = stream.next().await.unwrap();
        assert_eq!(handed_out.document_id(), "L1");
    }

    let geo = Arc::new(chicago_geo());
    let (store, runtime) = open_runtime(&path, geo.clone()).await;
    let derived = common::load_where(&store, "L1", "route derived after restart", |l| {
        l.route_miles.is_some() && l.stops_start.is_some()
    })
    .await;
    assert!(geo.distance_calls() > 0);
    runtime.shutdown().await.unwrap();
    drop(store);

    // Everything was acknowledged before shutdown: nothing to redo
    let geo = Arc::new(chicago_geo());
    let (store, runtime) = open_runtime(&path, geo.clone()).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(geo.distance_calls(), 0);
    assert_eq!(store.get_load("L1").await.unwrap().unwrap(), derived);

    runtime.shutdown().await.unwrap();
}
