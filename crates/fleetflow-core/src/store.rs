// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Typed entity store and change streams.
//!
//! [`EntityStore`] is the only way documents are written. It owns the write
//! version (1 on insert, +1 on every write), computes the changed paths for the
//! feed, and retries compare-and-swap writes against concurrent writers.
//!
//! # Version gate
//!
//! Derived fields are written in two conditional steps:
//!
//! 1. **stamp**: passes when `watermark <= observed - 1` (or no watermark yet)
//!    and sets `watermark = current version`. A failing stamp means the event
//!    is stale or already handled.
//! 2. **commit**: passes when the watermark is still the stamped value (or
//!    older), then applies the derived patch. If no other write landed since
//!    the stamp, the watermark moves to the commit's own version so the
//!    commit's feed echo is ignored. Otherwise it stays, and the intervening
//!    write triggers a fresh derivation.

use std::collections::{BTreeSet, VecDeque};
use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::backend::{Backend, DocumentChange, FeedRecord, MemoryBackend, SqliteBackend};
use crate::change::{ChangeEvent, Operation, Subscription, diff_fields};
use crate::document::Document;
use crate::error::{Result, StoreError};
use crate::model::{
    Driver, GeoPoint, Load, LoadPatch, LoadStatus, LoadWatermark, NotificationTask, Stop,
    StopStatus, TaskPayload, TaskState, TaskUpdate, Truck, TruckPatch, TruckStatus,
};

/// Compare-and-swap attempts before a write gives up.
const MAX_WRITE_ATTEMPTS: u32 = 16;

/// Feed records fetched per backend read.
const FEED_BATCH_SIZE: i64 = 256;

/// Default fallback poll interval for change streams.
pub const DEFAULT_FEED_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Result of a successful stamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stamp {
    /// Watermark value written by the stamp.
    pub watermark: i64,
    /// Document version after the stamp write.
    pub version: i64,
}

/// A document as it was right after a successful stamp.
#[derive(Debug, Clone, PartialEq)]
pub struct Stamped<D> {
    /// Document state to derive from.
    pub document: D,
    /// Stamp to pass to the commit.
    pub stamp: Stamp,
}

/// Outcome of a commit.
#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome<D> {
    /// The patch was written.
    Applied(D),
    /// The patch was empty, nothing was written.
    Empty,
    /// A later stamp owns the watermark; the patch was dropped.
    Superseded,
}

impl<D> CommitOutcome<D> {
    /// Whether a write happened.
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

/// Typed access to the document store.
#[derive(Clone)]
pub struct EntityStore {
    backend: Arc<dyn Backend>,
    feed_poll_interval: Duration,
}

impl EntityStore {
    /// Wrap a backend.
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            feed_poll_interval: DEFAULT_FEED_POLL_INTERVAL,
        }
    }

    /// Store over a fresh [`MemoryBackend`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    /// Store over a SQLite file, created and migrated if needed.
    pub async fn open_sqlite(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(Arc::new(SqliteBackend::from_path(path).await?)))
    }

    /// Override the fallback poll interval of change streams.
    pub fn with_feed_poll_interval(mut self, interval: Duration) -> Self {
        self.feed_poll_interval = interval;
        self
    }

    /// Underlying backend.
    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    // ------------------------------------------------------------------
    // Generic document access
    // ------------------------------------------------------------------

    /// Fetch a document.
    pub async fn get<D: Document>(&self, id: &str) -> Result<Option<D>> {
        match self.backend.fetch(D::COLLECTION, id).await? {
            Some(stored) => {
                let mut doc: D = serde_json::from_value(stored.body)?;
                doc.set_version(stored.version);
                Ok(Some(doc))
            }
            None => Ok(None),
        }
    }

    /// Fetch a document that must exist.
    pub async fn require<D: Document>(&self, id: &str) -> Result<D> {
        self.get(id).await?.ok_or_else(|| StoreError::NotFound {
            collection: D::COLLECTION,
            id: id.to_string(),
        })
    }

    /// Insert a new document at version 1.
    pub async fn insert<D: Document>(&self, mut doc: D) -> Result<D> {
        doc.set_version(1);
        let body = serde_json::to_value(&doc)?;
        self.backend
            .insert(D::COLLECTION, doc.id(), 1, body)
            .await?;
        debug!(collection = %D::COLLECTION, id = %doc.id(), "Document inserted");
        Ok(doc)
    }

    /// Documents whose top-level string `field` equals `value`, ordered by id.
    pub async fn find_by<D: Document>(&self, field: &str, value: &str) -> Result<Vec<D>> {
        self.backend
            .find_by_field(D::COLLECTION, field, value)
            .await?
            .into_iter()
            .map(|stored| {
                let mut doc: D = serde_json::from_value(stored.body)?;
                doc.set_version(stored.version);
                Ok(doc)
            })
            .collect()
    }

    /// Read-modify-write with compare-and-swap retries.
    ///
    /// `f` is called with the current document. Returning `Ok(None)` skips the
    /// write; `Ok(Some(r))` writes the modified document at the next version.
    /// `f` may run several times when writers race. Returns the document as
    /// stored afterwards and the value produced by `f`.
    pub async fn mutate<D, R, F>(&self, id: &str, mut f: F) -> Result<(D, Option<R>)>
    where
        D: Document,
        F: FnMut(&mut D) -> Result<Option<R>> + Send,
        R: Send,
    {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let stored = self
                .backend
                .fetch(D::COLLECTION, id)
                .await?
                .ok_or_else(|| StoreError::NotFound {
                    collection: D::COLLECTION,
                    id: id.to_string(),
                })?;

            let mut doc: D = serde_json::from_value(stored.body.clone())?;
            doc.set_version(stored.version);
            let current = doc.clone();

            let Some(output) = f(&mut doc)? else {
                return Ok((current, None));
            };

            let version = stored.version + 1;
            doc.set_version(version);
            let after = serde_json::to_value(&doc)?;
            let (updated_fields, removed_fields) = diff_fields(&stored.body, &after);
            let change = DocumentChange {
                version,
                after,
                before: stored.body,
                updated_fields,
                removed_fields,
            };

            if self
                .backend
                .compare_and_swap(D::COLLECTION, id, stored.version, change)
                .await?
            {
                return Ok((doc, Some(output)));
            }

            debug!(
                collection = %D::COLLECTION,
                id = %id,
                attempt = attempt,
                "Write lost compare-and-swap, retrying"
            );
        }

        warn!(
            collection = %D::COLLECTION,
            id = %id,
            attempts = MAX_WRITE_ATTEMPTS,
            "Giving up on contended write"
        );
        Err(StoreError::WriteConflict {
            collection: D::COLLECTION,
            id: id.to_string(),
            attempts: MAX_WRITE_ATTEMPTS,
        })
    }

    /// Unconditional edit. Writes even when `f` leaves the document as is.
    async fn edit<D, F>(&self, id: &str, mut f: F) -> Result<D>
    where
        D: Document,
        F: FnMut(&mut D) -> Result<()> + Send,
    {
        let (doc, _) = self.mutate(id, |doc: &mut D| f(doc).map(Some)).await?;
        Ok(doc)
    }

    async fn stamp_with<D, G, S>(
        &self,
        id: &str,
        observed: i64,
        get: G,
        set: S,
    ) -> Result<Option<Stamped<D>>>
    where
        D: Document,
        G: Fn(&D) -> Option<i64> + Send + Sync,
        S: Fn(&mut D, i64) + Send + Sync,
    {
        let (document, stamped) = self
            .mutate(id, |doc: &mut D| {
                let passes = get(doc).is_none_or(|w| w <= observed - 1);
                if !passes {
                    return Ok(None);
                }
                let watermark = doc.version();
                set(doc, watermark);
                Ok(Some(watermark))
            })
            .await?;

        Ok(stamped.map(|watermark| Stamped {
            stamp: Stamp {
                watermark,
                version: document.version(),
            },
            document,
        }))
    }

    async fn commit_with<D, G, S, A>(
        &self,
        id: &str,
        stamp: Stamp,
        get: G,
        set: S,
        apply: A,
    ) -> Result<CommitOutcome<D>>
    where
        D: Document,
        G: Fn(&D) -> Option<i64> + Send + Sync,
        S: Fn(&mut D, i64) + Send + Sync,
        A: Fn(&mut D) + Send + Sync,
    {
        let mut superseded = false;
        let (document, written) = self
            .mutate(id, |doc: &mut D| {
                if get(doc).is_some_and(|w| w > stamp.watermark) {
                    superseded = true;
                    return Ok(None);
                }
                superseded = false;
                if doc.version() == stamp.version {
                    let own_write = doc.version() + 1;
                    set(doc, own_write);
                }
                apply(doc);
                Ok(Some(()))
            })
            .await?;

        Ok(match written {
            Some(()) => CommitOutcome::Applied(document),
            None if superseded => CommitOutcome::Superseded,
            None => CommitOutcome::Empty,
        })
    }

    // ------------------------------------------------------------------
    // Loads
    // ------------------------------------------------------------------

    /// Insert a load.
    pub async fn insert_load(&self, load: Load) -> Result<Load> {
        self.insert(load).await
    }

    /// Fetch a load.
    pub async fn get_load(&self, id: &str) -> Result<Option<Load>> {
        self.get(id).await
    }

    /// Loads assigned to a truck, ordered by id.
    pub async fn find_loads_on_truck(&self, truck_id: &str) -> Result<Vec<Load>> {
        self.find_by("truck", truck_id).await
    }

    /// Assign (or with `None`, remove) the truck of a load.
    pub async fn assign_truck(&self, load_id: &str, truck_id: Option<&str>) -> Result<Load> {
        self.edit(load_id, |load: &mut Load| {
            load.truck = truck_id.map(str::to_string);
            Ok(())
        })
        .await
    }

    /// Set the status of a load directly (TONU, Cancelled, manual fixes).
    pub async fn set_load_status(&self, load_id: &str, status: LoadStatus) -> Result<Load> {
        self.edit(load_id, |load: &mut Load| {
            load.status = status;
            Ok(())
        })
        .await
    }

    /// Replace the itinerary of a load.
    pub async fn replace_stops(&self, load_id: &str, stops: Vec<Stop>) -> Result<Load> {
        self.edit(load_id, |load: &mut Load| {
            load.stops = stops.clone();
            Ok(())
        })
        .await
    }

    /// Edit one stop's status. Only moves of exactly one position in the
    /// stop's sequence are accepted, and at most one stop per load may be in
    /// progress.
    pub async fn set_stop_status(
        &self,
        load_id: &str,
        stop_id: &str,
        status: StopStatus,
    ) -> Result<Load> {
        self.edit(load_id, |load: &mut Load| {
            if let Some(active) = load.stops.iter().find(|s| s.is_active() && s.id != stop_id) {
                let stop_type = load
                    .stop(stop_id)
                    .map(|s| s.stop_type)
                    .ok_or_else(|| StoreError::StopNotFound {
                        load_id: load_id.to_string(),
                        stop_id: stop_id.to_string(),
                    })?;
                if status != stop_type.initial() && status != stop_type.terminal() {
                    return Err(StoreError::ConcurrentActiveStop {
                        load_id: load_id.to_string(),
                        stop_id: stop_id.to_string(),
                        active_stop_id: active.id.clone(),
                    });
                }
            }

            let stop = load
                .stops
                .iter_mut()
                .find(|s| s.id == stop_id)
                .ok_or_else(|| StoreError::StopNotFound {
                    load_id: load_id.to_string(),
                    stop_id: stop_id.to_string(),
                })?;
            if !stop.stop_type.is_adjacent(stop.status, status) {
                return Err(StoreError::InvalidStopTransition {
                    load_id: load_id.to_string(),
                    stop_id: stop_id.to_string(),
                    from: stop.status,
                    to: status,
                });
            }
            stop.status = status;
            Ok(())
        })
        .await
    }

    /// Move a load from Planned to In Progress if it is still Planned on
    /// `truck_id`. Returns the promoted load.
    pub async fn promote_planned_load(
        &self,
        load_id: &str,
        truck_id: &str,
    ) -> Result<Option<Load>> {
        let (load, promoted) = self
            .mutate(load_id, |load: &mut Load| {
                if load.status != LoadStatus::Planned || load.truck.as_deref() != Some(truck_id) {
                    return Ok(None);
                }
                load.status = LoadStatus::InProgress;
                Ok(Some(()))
            })
            .await?;
        Ok(promoted.map(|()| load))
    }

    /// Stamp a load watermark for an event observed at `observed` version.
    /// `None` means the event is stale or already handled.
    pub async fn stamp_load(
        &self,
        load_id: &str,
        watermark: LoadWatermark,
        observed: i64,
    ) -> Result<Option<Stamped<Load>>> {
        self.stamp_with(
            load_id,
            observed,
            move |load: &Load| watermark.get(load),
            move |load: &mut Load, v| watermark.set(load, v),
        )
        .await
    }

    /// Commit derived load fields guarded by `stamp`.
    pub async fn commit_load(
        &self,
        load_id: &str,
        watermark: LoadWatermark,
        stamp: Stamp,
        patch: &LoadPatch,
    ) -> Result<CommitOutcome<Load>> {
        if patch.is_empty() {
            return Ok(CommitOutcome::Empty);
        }
        self.commit_with(
            load_id,
            stamp,
            move |load: &Load| watermark.get(load),
            move |load: &mut Load, v| watermark.set(load, v),
            |load: &mut Load| patch.apply(load),
        )
        .await
    }

    // ------------------------------------------------------------------
    // Trucks
    // ------------------------------------------------------------------

    /// Insert a truck.
    pub async fn insert_truck(&self, truck: Truck) -> Result<Truck> {
        self.insert(truck).await
    }

    /// Fetch a truck.
    pub async fn get_truck(&self, id: &str) -> Result<Option<Truck>> {
        self.get(id).await
    }

    /// Trucks currently in `status`.
    pub async fn find_trucks_by_status(&self, status: TruckStatus) -> Result<Vec<Truck>> {
        self.find_by("status", status.as_str()).await
    }

    /// Operator edit of the local availability time and place.
    pub async fn update_truck_availability(
        &self,
        truck_id: &str,
        at_local: Option<NaiveDateTime>,
        location: Option<GeoPoint>,
    ) -> Result<Truck> {
        self.edit(truck_id, |truck: &mut Truck| {
            truck.availability_at_local = at_local;
            truck.availability_location = location;
            Ok(())
        })
        .await
    }

    /// Record the truck's last reported position.
    pub async fn update_truck_location(&self, truck_id: &str, location: GeoPoint) -> Result<Truck> {
        self.edit(truck_id, |truck: &mut Truck| {
            truck.last_location = Some(location);
            Ok(())
        })
        .await
    }

    /// Assign (or with `None`, remove) the driver of a truck.
    pub async fn assign_driver(&self, truck_id: &str, driver_id: Option<&str>) -> Result<Truck> {
        self.edit(truck_id, |truck: &mut Truck| {
            truck.driver = driver_id.map(str::to_string);
            Ok(())
        })
        .await
    }

    /// Set the truck status. No write happens when it already has it.
    pub async fn set_truck_status(&self, truck_id: &str, status: TruckStatus) -> Result<Truck> {
        let (truck, _) = self
            .mutate(truck_id, |truck: &mut Truck| {
                if truck.status == status {
                    return Ok(None);
                }
                truck.status = status;
                Ok(Some(()))
            })
            .await?;
        Ok(truck)
    }

    /// Flip a Will-be-available truck to Available once its availability
    /// instant has passed. Returns whether the truck changed.
    pub async fn release_truck_if_due(&self, truck_id: &str, now: DateTime<Utc>) -> Result<bool> {
        let (_, released) = self
            .mutate(truck_id, |truck: &mut Truck| {
                let due = truck.status == TruckStatus::WillBeAvailable
                    && truck.availability_at.is_some_and(|at| at <= now);
                if !due {
                    return Ok(None);
                }
                truck.status = TruckStatus::Available;
                Ok(Some(()))
            })
            .await?;
        Ok(released.is_some())
    }

    /// Stamp the truck availability watermark.
    pub async fn stamp_truck(&self, truck_id: &str, observed: i64) -> Result<Option<Stamped<Truck>>> {
        self.stamp_with(
            truck_id,
            observed,
            |truck: &Truck| truck.availability_at_ver,
            |truck: &mut Truck, v| truck.availability_at_ver = Some(v),
        )
        .await
    }

    /// Commit derived truck fields guarded by `stamp`.
    pub async fn commit_truck(
        &self,
        truck_id: &str,
        stamp: Stamp,
        patch: &TruckPatch,
    ) -> Result<CommitOutcome<Truck>> {
        if patch.is_empty() {
            return Ok(CommitOutcome::Empty);
        }
        self.commit_with(
            truck_id,
            stamp,
            |truck: &Truck| truck.availability_at_ver,
            |truck: &mut Truck, v| truck.availability_at_ver = Some(v),
            |truck: &mut Truck| patch.apply(truck),
        )
        .await
    }

    // ------------------------------------------------------------------
    // Drivers
    // ------------------------------------------------------------------

    /// Insert a driver.
    pub async fn insert_driver(&self, driver: Driver) -> Result<Driver> {
        self.insert(driver).await
    }

    /// Fetch a driver.
    pub async fn get_driver(&self, id: &str) -> Result<Option<Driver>> {
        self.get(id).await
    }

    /// Driver assigned to a truck, if both exist.
    pub async fn find_driver_for_truck(&self, truck_id: &str) -> Result<Option<Driver>> {
        let Some(truck) = self.get_truck(truck_id).await? else {
            return Ok(None);
        };
        match truck.driver {
            Some(driver_id) => self.get_driver(&driver_id).await,
            None => Ok(None),
        }
    }

    // ------------------------------------------------------------------
    // Notification tasks
    // ------------------------------------------------------------------

    /// Insert a notification task.
    pub async fn insert_task<P: TaskPayload>(
        &self,
        task: NotificationTask<P>,
    ) -> Result<NotificationTask<P>> {
        self.insert(task).await
    }

    /// Fetch a notification task.
    pub async fn get_task<P: TaskPayload>(&self, id: &str) -> Result<Option<NotificationTask<P>>> {
        self.get(id).await
    }

    /// Apply `update` only if the task is still in state `from`.
    ///
    /// Used both for ordinary transitions and for claiming (Ready to
    /// Processing): of several racing callers exactly one gets `Some`.
    pub async fn transition_task<P: TaskPayload>(
        &self,
        id: &str,
        from: TaskState,
        update: &TaskUpdate,
    ) -> Result<Option<NotificationTask<P>>> {
        let (task, moved) = self
            .mutate(id, |task: &mut NotificationTask<P>| {
                if task.state != from {
                    return Ok(None);
                }
                update.apply(task);
                Ok(Some(()))
            })
            .await?;
        Ok(moved.map(|()| task))
    }

    // ------------------------------------------------------------------
    // Change feed
    // ------------------------------------------------------------------

    /// Open a resumable stream over a collection's change feed.
    pub fn subscribe<D: Document>(&self, subscription: Subscription) -> ChangeStream<D> {
        ChangeStream {
            signal: self.backend.feed_signal(),
            backend: self.backend.clone(),
            poll_interval: self.feed_poll_interval,
            subscription,
            cursor: None,
            committed: 0,
            pending: BTreeSet::new(),
            buffer: VecDeque::new(),
            _marker: PhantomData,
        }
    }
}

/// A pull-based, resumable view of one collection's change feed.
///
/// Delivery is at least once. An event handed out by [`next`](Self::next)
/// stays pending until it is [`ack`](Self::ack)ed; the persisted cursor only
/// moves past positions with no pending event before them. A stream that is
/// dropped or crashes with events pending redelivers them on resume.
///
/// `next` is cancel safe: dropping its future never loses an event.
pub struct ChangeStream<D> {
    backend: Arc<dyn Backend>,
    signal: Arc<Notify>,
    poll_interval: Duration,
    subscription: Subscription,
    /// Last position read from the feed.
    cursor: Option<i64>,
    /// Last position persisted for the subscription.
    committed: i64,
    /// Handed out, not yet acknowledged.
    pending: BTreeSet<i64>,
    buffer: VecDeque<FeedRecord>,
    _marker: PhantomData<fn() -> D>,
}

impl<D: Document> ChangeStream<D> {
    /// Subscription this stream follows.
    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    /// Position of the last record consumed, once known.
    pub fn cursor(&self) -> Option<i64> {
        self.cursor
    }

    /// Wait for the next matching event.
    pub async fn next(&mut self) -> Result<ChangeEvent<D>> {
        let mut cursor = match self.cursor {
            Some(position) => position,
            None => {
                let position = self
                    .backend
                    .load_cursor(&self.subscription.name)
                    .await?
                    .unwrap_or(0);
                self.cursor = Some(position);
                self.committed = position;
                position
            }
        };

        loop {
            while let Some(record) = self.buffer.front() {
                let position = record.position;
                if !self.matches(record) {
                    self.buffer.pop_front();
                    self.cursor = Some(position);
                    cursor = position;
                    continue;
                }

                let event = self.decode(record)?;
                self.buffer.pop_front();
                self.cursor = Some(position);
                self.pending.insert(position);
                return Ok(event);
            }

            let signal = self.signal.clone();
            let notified = signal.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let batch = self
                .backend
                .read_feed(self.subscription.collection, cursor, FEED_BATCH_SIZE)
                .await?;

            if batch.is_empty() {
                tokio::select! {
                    _ = &mut notified => {}
                    _ = tokio::time::sleep(self.poll_interval) => {}
                }
                continue;
            }

            self.buffer.extend(batch);
        }
    }

    /// Mark the event at `position` as handled and persist the cursor up to
    /// the oldest event still pending.
    pub async fn ack(&mut self, position: i64) -> Result<()> {
        if !self.pending.remove(&position) {
            return Ok(());
        }

        let Some(read) = self.cursor else {
            return Ok(());
        };
        let safe = match self.pending.first() {
            Some(oldest) => oldest - 1,
            None => read,
        };
        if safe > self.committed {
            self.backend
                .save_cursor(&self.subscription.name, safe)
                .await?;
            self.committed = safe;
        }
        Ok(())
    }

    /// Events handed out and not yet acknowledged.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    fn matches(&self, record: &FeedRecord) -> bool {
        let filter = &self.subscription.filter;
        match record.operation {
            Operation::Insert => filter.matches_insert(&record.after),
            Operation::Update => {
                filter.matches_update(&record.updated_fields, &record.removed_fields)
            }
        }
    }

    fn decode(&self, record: &FeedRecord) -> Result<ChangeEvent<D>> {
        let decode_doc = |value: &serde_json::Value| -> Result<D> {
            Ok(serde_json::from_value(value.clone())?)
        };

        Ok(match record.operation {
            Operation::Insert => ChangeEvent::Insert {
                position: record.position,
                document_id: record.document_id.clone(),
                full_document: decode_doc(&record.after)?,
            },
            Operation::Update => {
                let projection = self.subscription.projection;
                let before = match (&record.before, projection.before) {
                    (Some(value), true) => Some(decode_doc(value)?),
                    _ => None,
                };
                let after = if projection.after {
                    Some(decode_doc(&record.after)?)
                } else {
                    None
                };
                ChangeEvent::Update {
                    position: record.position,
                    document_id: record.document_id.clone(),
                    updated_fields: record.updated_fields.clone(),
                    removed_fields: record.removed_fields.clone(),
                    full_document_before: before,
                    full_document_after: after,
                }
            }
        })
    }
}
