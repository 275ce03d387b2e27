// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Domain model: loads, stops, trucks, drivers and notification tasks.

mod geo;
mod load;
mod notification;
mod truck;

pub use geo::{Facility, GeoPoint};
pub use load::{
    Load, LoadPatch, LoadStatus, LoadWatermark, RouteSegment, Stop, StopStatus, StopType,
    TimeWindow, TruckLeg,
};
pub use notification::{
    EmailMessage, EmailTask, NotificationTask, PushMessage, PushTask, TaskPayload, TaskState,
    TaskUpdate,
};
pub use truck::{Driver, Truck, TruckPatch, TruckStatus};
