// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Lifecycle consumers.
//!
//! | Queue | Collection | Watermark | Derives |
//! |-------|------------|-----------|---------|
//! | `load-stops` | loads | `stopsVer` | stop progression, completion, route distances |
//! | `load-status` | loads | `statusVer` | load status, truck status, start location |
//! | `truck-availability` | trucks | `availabilityAtVer` | `availabilityAt` |

pub mod load_status;
pub mod load_stops;
pub mod truck_availability;

pub use self::load_status::LoadStatusConsumer;
pub use self::load_stops::LoadStopsConsumer;
pub use self::truck_availability::TruckAvailabilityConsumer;

use fleetflow_core::EntityStore;
use fleetflow_core::model::PushMessage;
use serde_json::Value;
use tracing::debug;

use crate::error::Result;
use crate::notifications::NotificationDispatch;

/// Enqueue a push to the driver of `truck_id`. Returns the task id, or
/// `None` when the truck has no driver.
pub(crate) async fn notify_truck_driver(
    store: &EntityStore,
    dispatch: &NotificationDispatch,
    truck_id: &str,
    title: String,
    body: String,
    data: Value,
) -> Result<Option<String>> {
    let Some(driver) = store.find_driver_for_truck(truck_id).await? else {
        debug!(truck_id = %truck_id, "No driver on truck; push skipped");
        return Ok(None);
    };

    let task_id = dispatch
        .create_task(PushMessage {
            driver_id: driver.id,
            title,
            body,
            data,
        })
        .await?;
    Ok(Some(task_id))
}
