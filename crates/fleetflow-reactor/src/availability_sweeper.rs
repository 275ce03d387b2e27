// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Expires "Will be available" windows.

use async_trait::async_trait;
use chrono::Utc;
use fleetflow_core::EntityStore;
use fleetflow_core::model::TruckStatus;
use tracing::{debug, info};

use crate::error::Result;
use crate::scheduler::Job;

/// Flips Will-be-available trucks to Available once `availabilityAt` has
/// passed. Trucks without a resolved instant are left alone.
pub struct AvailabilitySweeper {
    store: EntityStore,
}

impl AvailabilitySweeper {
    /// Sweeper over `store`.
    pub fn new(store: EntityStore) -> Self {
        Self { store }
    }

    /// One sweep. Returns how many trucks were released.
    pub async fn sweep(&self) -> Result<usize> {
        let now = Utc::now();
        let waiting = self
            .store
            .find_trucks_by_status(TruckStatus::WillBeAvailable)
            .await?;

        let mut released = 0;
        for truck in waiting {
            if self.store.release_truck_if_due(&truck.id, now).await? {
                info!(truck_id = %truck.id, availability_at = ?truck.availability_at, "Truck now available");
                released += 1;
            }
        }
        Ok(released)
    }
}

#[async_trait]
impl Job for AvailabilitySweeper {
    fn name(&self) -> &'static str {
        "availability-sweeper"
    }

    async fn run(&self) -> Result<()> {
        let released = self.sweep().await?;
        debug!(released = released, "Availability sweep finished");
        Ok(())
    }
}
