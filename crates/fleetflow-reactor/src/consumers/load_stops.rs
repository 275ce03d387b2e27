// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Stop progression and route distances.

use std::sync::Arc;

use async_trait::async_trait;
use fleetflow_core::change::{ChangeFilter, Subscription};
use fleetflow_core::model::{Load, LoadPatch, LoadStatus, RouteSegment, StopStatus, TruckLeg};
use fleetflow_core::{ChangeEvent, Collection, CommitOutcome, EntityStore};
use serde_json::json;
use tracing::{debug, info};

use super::notify_truck_driver;
use crate::error::Result;
use crate::geo::GeoProvider;
use crate::notifications::NotificationDispatch;
use crate::version_gate::{StopsDerivation, VersionGate};
use crate::work_queue::Process;

/// Subscription name.
pub const SUBSCRIPTION: &str = "load-stops";

/// Every load insert and updates to the itinerary or the start location.
pub fn subscription() -> Subscription {
    Subscription::new(
        SUBSCRIPTION,
        Collection::Loads,
        ChangeFilter::inserts_and(&["stops", "startTruckLocation"]),
    )
}

/// Derives stop progression, completion, and route distances of a load.
pub struct LoadStopsConsumer {
    gate: VersionGate<StopsDerivation>,
    geo: Arc<dyn GeoProvider>,
    dispatch: NotificationDispatch,
}

impl LoadStopsConsumer {
    /// Create the consumer.
    pub fn new(store: EntityStore, geo: Arc<dyn GeoProvider>) -> Self {
        Self {
            dispatch: NotificationDispatch::new(store.clone()),
            gate: VersionGate::new(store, StopsDerivation),
            geo,
        }
    }

    async fn derive(&self, load: &Load) -> LoadPatch {
        let mut patch = LoadPatch::default();

        let stops_start = load.stops.first().map(|s| s.window.from);
        let stops_end = load.stops.last().map(|s| s.window.to.unwrap_or(s.window.from));
        if stops_start != load.stops_start {
            patch.stops_start = Some(stops_start);
        }
        if stops_end != load.stops_end {
            patch.stops_end = Some(stops_end);
        }

        if !load.status.is_terminal() {
            progress_stops(load, &mut patch);
        }

        let route = self.route(load).await;
        let route_miles = route
            .as_ref()
            .map(|segments| segments.iter().map(|s| s.miles).sum::<f64>());
        if route != load.route {
            patch.route = Some(route);
        }
        if route_miles != load.route_miles {
            patch.route_miles = Some(route_miles);
        }

        let truck_leg = self.truck_leg(load).await;
        if truck_leg != load.truck_leg {
            patch.truck_leg = Some(truck_leg);
        }

        patch
    }

    /// Segment distances between consecutive stops. `None` as soon as one
    /// segment is unknown.
    async fn route(&self, load: &Load) -> Option<Vec<RouteSegment>> {
        let cached = load.route.as_deref().unwrap_or_default();
        let mut segments = Vec::with_capacity(load.stops.len().saturating_sub(1));

        for pair in load.stops.windows(2) {
            let (from, to) = (&pair[0], &pair[1]);
            let hit = cached.iter().find(|s| {
                s.from_stop == from.id
                    && s.to_stop == to.id
                    && s.from_facility == from.facility.id
                    && s.to_facility == to.facility.id
            });
            if let Some(segment) = hit {
                segments.push(segment.clone());
                continue;
            }

            let (Some(a), Some(b)) = (from.facility.location, to.facility.location) else {
                debug!(load_id = %load.id, from = %from.id, to = %to.id, "Stop without location");
                return None;
            };
            let Some(miles) = self.geo.distance(a, b).await else {
                debug!(load_id = %load.id, from = %from.id, to = %to.id, "Segment distance unknown");
                return None;
            };
            segments.push(RouteSegment {
                from_stop: from.id.clone(),
                to_stop: to.id.clone(),
                from_facility: from.facility.id.clone(),
                to_facility: to.facility.id.clone(),
                miles,
            });
        }

        Some(segments)
    }

    async fn truck_leg(&self, load: &Load) -> Option<TruckLeg> {
        let origin = load.start_truck_location?;
        let first = load.stops.first()?;

        if let Some(leg) = &load.truck_leg {
            if leg.origin == origin && leg.stop_id == first.id && leg.facility_id == first.facility.id
            {
                return Some(leg.clone());
            }
        }

        let miles = self.geo.distance(origin, first.facility.location?).await?;
        Some(TruckLeg {
            origin,
            stop_id: first.id.clone(),
            facility_id: first.facility.id.clone(),
            miles,
        })
    }

    async fn notify_good_to_go(&self, event: &ChangeEvent<Load>, load: &Load) -> Result<()> {
        let (Some(before), Some(after)) = (event.before(), event.after()) else {
            return Ok(());
        };
        let Some(truck_id) = after.truck.as_deref() else {
            return Ok(());
        };

        for stop in &after.stops {
            let was_gtg = before
                .stop(&stop.id)
                .is_some_and(|s| s.status == StopStatus::GoodToGo);
            if stop.status != StopStatus::GoodToGo || was_gtg {
                continue;
            }

            let task = notify_truck_driver(
                self.gate.store(),
                &self.dispatch,
                truck_id,
                format!("Load {}", load.id),
                format!("{} is good to go", stop.facility.name),
                json!({ "loadId": load.id, "stopId": stop.id }),
            )
            .await?;
            if let Some(task_id) = task {
                info!(load_id = %load.id, stop_id = %stop.id, task_id = %task_id, "GTG push enqueued");
            }
        }
        Ok(())
    }
}

/// Single advance of the next stop, and completion once every stop is done.
fn progress_stops(load: &Load, patch: &mut LoadPatch) {
    if load.stops.is_empty() || load.stops.iter().any(|s| s.is_active()) {
        return;
    }

    if load.stops.iter().all(|s| s.is_terminal()) {
        if load.status != LoadStatus::Completed {
            patch.status = Some(LoadStatus::Completed);
        }
        return;
    }

    // No stop done yet: the first stop is next
    let next = match load.stops.iter().rposition(|s| s.is_terminal()) {
        Some(last_done) => load.stops.get(last_done + 1),
        None => load.stops.first(),
    };
    if let Some(stop) = next.filter(|s| s.is_initial()) {
        patch
            .stop_statuses
            .push((stop.id.clone(), stop.stop_type.activated()));
    }
}

#[async_trait]
impl Process<ChangeEvent<Load>> for LoadStopsConsumer {
    async fn process(&self, event: ChangeEvent<Load>) -> Result<()> {
        let Some(stamped) = self.gate.enter(&event).await? else {
            return Ok(());
        };
        let load = &stamped.document;

        let patch = self.derive(load).await;
        if let Some(status) = patch.status {
            info!(load_id = %load.id, status = %status, "Load completed");
        }
        for (stop_id, status) in &patch.stop_statuses {
            info!(load_id = %load.id, stop_id = %stop_id, status = %status, "Next stop activated");
        }

        if let CommitOutcome::Superseded = self.gate.commit(&stamped, &patch).await? {
            return Ok(());
        }

        self.notify_good_to_go(&event, load).await
    }
}
