// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Operator-entered truck availability resolved to an absolute instant.
//!
//! `availabilityAt` always reflects the current local time and place: when
//! either is cleared, or the zone cannot be resolved, it is cleared too so the
//! availability sweeper never acts on an instant the operator has replaced.

use std::sync::Arc;

use async_trait::async_trait;
use fleetflow_core::change::{ChangeFilter, Subscription};
use fleetflow_core::model::{Truck, TruckPatch};
use fleetflow_core::{ChangeEvent, Collection, CommitOutcome, EntityStore};
use tracing::{debug, info};

use crate::error::Result;
use crate::geo::GeoProvider;
use crate::timezone::resolve_local_time;
use crate::version_gate::{AvailabilityDerivation, VersionGate};
use crate::work_queue::Process;

/// Subscription name.
pub const SUBSCRIPTION: &str = "truck-availability";

/// Truck inserts and edits of the operator-entered availability.
pub fn subscription() -> Subscription {
    Subscription::new(
        SUBSCRIPTION,
        Collection::Trucks,
        ChangeFilter::inserts_and(&["availabilityAtLocal", "availabilityLocation"]),
    )
}

/// Resolves `availabilityAtLocal` at `availabilityLocation` into
/// `availabilityAt`.
pub struct TruckAvailabilityConsumer {
    gate: VersionGate<AvailabilityDerivation>,
    geo: Arc<dyn GeoProvider>,
}

impl TruckAvailabilityConsumer {
    /// Create the consumer.
    pub fn new(store: EntityStore, geo: Arc<dyn GeoProvider>) -> Self {
        Self {
            gate: VersionGate::new(store, AvailabilityDerivation),
            geo,
        }
    }

    async fn derive(&self, truck: &Truck) -> TruckPatch {
        let resolved = match (truck.availability_at_local, truck.availability_location) {
            (Some(local), Some(location)) => {
                let at = resolve_local_time(self.geo.as_ref(), location, local).await;
                if at.is_none() {
                    debug!(truck_id = %truck.id, local = %local, "Availability time unresolved");
                }
                at
            }
            _ => None,
        };

        if resolved == truck.availability_at {
            return TruckPatch::default();
        }
        TruckPatch {
            availability_at: Some(resolved),
            ..Default::default()
        }
    }
}

#[async_trait]
impl Process<ChangeEvent<Truck>> for TruckAvailabilityConsumer {
    async fn process(&self, event: ChangeEvent<Truck>) -> Result<()> {
        let Some(stamped) = self.gate.enter(&event).await? else {
            return Ok(());
        };

        let patch = self.derive(&stamped.document).await;
        if let CommitOutcome::Applied(truck) = self.gate.commit(&stamped, &patch).await? {
            info!(
                truck_id = %truck.id,
                availability_at = ?truck.availability_at,
                "Truck availability updated"
            );
        }
        Ok(())
    }
}
