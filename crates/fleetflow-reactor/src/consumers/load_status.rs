// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Load status derivation and truck contention.
//!
//! A truck works one load at a time. Further loads assigned to it wait as
//! Planned and are promoted, earliest `stopsStart` first, when the in-progress
//! load finishes or leaves the truck.

use async_trait::async_trait;
use fleetflow_core::change::{ChangeFilter, InsertMatch, Subscription};
use fleetflow_core::model::{GeoPoint, Load, LoadPatch, LoadStatus, TruckStatus};
use fleetflow_core::{ChangeEvent, Collection, CommitOutcome, EntityStore};
use serde_json::json;
use tracing::{debug, info};

use super::notify_truck_driver;
use crate::error::Result;
use crate::notifications::NotificationDispatch;
use crate::version_gate::{StatusDerivation, VersionGate};
use crate::work_queue::Process;

/// Subscription name.
pub const SUBSCRIPTION: &str = "load-status";

/// Load inserts carrying a truck, and updates to `status` or `truck`.
pub fn subscription() -> Subscription {
    Subscription::new(
        SUBSCRIPTION,
        Collection::Loads,
        ChangeFilter {
            on_insert: InsertMatch::WhenSet("truck"),
            update_paths: vec!["status", "truck"],
        },
    )
}

/// Derives load status and drives truck status from it.
pub struct LoadStatusConsumer {
    gate: VersionGate<StatusDerivation>,
    dispatch: NotificationDispatch,
}

impl LoadStatusConsumer {
    /// Create the consumer.
    pub fn new(store: EntityStore) -> Self {
        Self {
            dispatch: NotificationDispatch::new(store.clone()),
            gate: VersionGate::new(store, StatusDerivation),
        }
    }

    fn store(&self) -> &EntityStore {
        self.gate.store()
    }

    /// Hand `truck_id` to its next Planned load, or free it.
    async fn release_truck(&self, truck_id: &str, leaving: &str) -> Result<()> {
        let mut planned: Vec<Load> = self
            .store()
            .find_loads_on_truck(truck_id)
            .await?
            .into_iter()
            .filter(|l| l.id != leaving && l.status == LoadStatus::Planned)
            .collect();
        planned.sort_by_key(|l| (l.stops_start.is_none(), l.stops_start, l.id.clone()));

        for candidate in &planned {
            if let Some(promoted) = self
                .store()
                .promote_planned_load(&candidate.id, truck_id)
                .await?
            {
                info!(
                    truck_id = %truck_id,
                    load_id = %promoted.id,
                    previous_load_id = %leaving,
                    "Planned load promoted to In Progress"
                );
                return Ok(());
            }
        }

        if self.other_in_progress(truck_id, leaving).await?.is_none() {
            self.store()
                .set_truck_status(truck_id, TruckStatus::Available)
                .await?;
            info!(truck_id = %truck_id, "Truck released");
        }
        Ok(())
    }

    /// Another load on `truck_id` that is In Progress.
    async fn other_in_progress(&self, truck_id: &str, load_id: &str) -> Result<Option<Load>> {
        Ok(self
            .store()
            .find_loads_on_truck(truck_id)
            .await?
            .into_iter()
            .find(|l| l.id != load_id && l.status == LoadStatus::InProgress))
    }

    async fn derive(&self, load: &Load) -> Result<LoadPatch> {
        let mut patch = LoadPatch::default();

        let (status, start): (LoadStatus, Option<GeoPoint>) = match load.truck.as_deref() {
            None => (LoadStatus::Available, None),
            Some(truck_id) => match self.other_in_progress(truck_id, &load.id).await? {
                // An in-progress load is never demoted by a later assignment
                Some(current) if load.status != LoadStatus::InProgress => {
                    (LoadStatus::Planned, current.final_stop_location())
                }
                _ => {
                    let start = match load.start_truck_location {
                        Some(location) => Some(location),
                        None => self
                            .store()
                            .get_truck(truck_id)
                            .await?
                            .and_then(|t| t.last_location),
                    };
                    (LoadStatus::InProgress, start)
                }
            },
        };

        if status != load.status {
            patch.status = Some(status);
        }
        if start != load.start_truck_location {
            patch.start_truck_location = Some(start);
        }
        Ok(patch)
    }
}

#[async_trait]
impl Process<ChangeEvent<Load>> for LoadStatusConsumer {
    async fn process(&self, event: ChangeEvent<Load>) -> Result<()> {
        let Some(stamped) = self.gate.enter(&event).await? else {
            return Ok(());
        };
        let load = &stamped.document;
        let before = event.before();
        let changed = event.after().unwrap_or(load);

        let previous_truck = before.and_then(|b| b.truck.as_deref());
        let was_in_progress = before.is_some_and(|b| b.status == LoadStatus::InProgress);

        // The truck this load was working on is no longer worked by it
        if was_in_progress {
            if let Some(truck_id) = previous_truck {
                let left_truck = changed.truck.as_deref() != Some(truck_id);
                let stopped = changed.status != LoadStatus::InProgress;
                if left_truck || stopped {
                    self.release_truck(truck_id, &load.id).await?;
                }
            }
        }

        if load.status.is_terminal() || (load.truck.is_none() && previous_truck.is_none()) {
            return Ok(());
        }

        let patch = self.derive(load).await?;
        let status = match self.gate.commit(&stamped, &patch).await? {
            CommitOutcome::Superseded => return Ok(()),
            CommitOutcome::Applied(committed) => {
                if patch.status.is_some() {
                    info!(
                        load_id = %committed.id,
                        from = %load.status,
                        to = %committed.status,
                        "Load status derived"
                    );
                }
                committed.status
            }
            CommitOutcome::Empty => load.status,
        };

        let Some(truck_id) = load.truck.as_deref() else {
            return Ok(());
        };

        let became_in_progress = status == LoadStatus::InProgress && !was_in_progress;
        let new_truck = previous_truck != Some(truck_id);

        if became_in_progress {
            self.store()
                .set_truck_status(truck_id, TruckStatus::OnRoute)
                .await?;
            debug!(truck_id = %truck_id, load_id = %load.id, "Truck on route");
        }

        if became_in_progress || new_truck {
            let body = match status {
                LoadStatus::InProgress => format!("Load {} is now in progress", load.id),
                _ => format!("Load {} was assigned to your truck", load.id),
            };
            let task = notify_truck_driver(
                self.store(),
                &self.dispatch,
                truck_id,
                format!("Load {}", load.id),
                body,
                json!({ "loadId": load.id, "status": status }),
            )
            .await?;
            if let Some(task_id) = task {
                info!(load_id = %load.id, truck_id = %truck_id, task_id = %task_id, "Assignment push enqueued");
            }
        }

        Ok(())
    }
}
