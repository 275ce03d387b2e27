// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Loads and their stops.
//!
//! # Load Status State Machine
//!
//! ```text
//!  ┌───────────┐  truck   ┌─────────┐  truck free  ┌─────────────┐  all stops  ┌───────────┐
//!  │ AVAILABLE │─────────►│ PLANNED │─────────────►│ IN PROGRESS │────────────►│ COMPLETED │
//!  └───────────┘          └─────────┘◄─────────────└─────────────┘             └───────────┘
//!        ▲                             other load in progress
//!        │ truck removed
//!
//!  TONU / CANCELLED: direct edits from any non-terminal status
//! ```
//!
//! # Stop Status Sequences
//!
//! | Type | Sequence |
//! |------|----------|
//! | PickUp | New → On route to PU → On site PU → Loaded, Waiting GTG → GTG → Completed |
//! | Delivery | New → On route to DEL → On site DEL → Unloaded, Waiting GTG → GTG → Completed |

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::geo::{Facility, GeoPoint};
use crate::document::{Collection, Document};

/// Load (shipment) status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoadStatus {
    /// No truck assigned.
    Available,
    /// Truck assigned, waiting for the truck's current load to finish.
    Planned,
    /// Truck assigned and working this load.
    #[serde(rename = "In Progress")]
    InProgress,
    /// Truck ordered not used.
    #[serde(rename = "TONU")]
    Tonu,
    /// Cancelled by an operator.
    Cancelled,
    /// Every stop completed.
    Completed,
}

impl LoadStatus {
    /// Whether the status is final for derivation purposes.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Tonu | Self::Cancelled | Self::Completed)
    }

    /// Display name as stored.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Available => "Available",
            Self::Planned => "Planned",
            Self::InProgress => "In Progress",
            Self::Tonu => "TONU",
            Self::Cancelled => "Cancelled",
            Self::Completed => "Completed",
        }
    }
}

impl fmt::Display for LoadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stop kind. Immutable once the stop is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StopType {
    /// Pickup at a shipper.
    PickUp,
    /// Delivery at a receiver.
    Delivery,
}

/// Stop status. The legal order depends on the [`StopType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StopStatus {
    /// Not started.
    New,
    /// Driving to the pickup.
    #[serde(rename = "On route to PU")]
    OnRouteToPickUp,
    /// Arrived at the pickup.
    #[serde(rename = "On site PU")]
    OnSitePickUp,
    /// Loaded, waiting for good-to-go.
    #[serde(rename = "Loaded, Waiting GTG")]
    LoadedWaitingGtg,
    /// Driving to the delivery.
    #[serde(rename = "On route to DEL")]
    OnRouteToDelivery,
    /// Arrived at the delivery.
    #[serde(rename = "On site DEL")]
    OnSiteDelivery,
    /// Unloaded, waiting for good-to-go.
    #[serde(rename = "Unloaded, Waiting GTG")]
    UnloadedWaitingGtg,
    /// Good to go.
    #[serde(rename = "GTG")]
    GoodToGo,
    /// Done.
    Completed,
}

impl StopStatus {
    /// Display name as stored.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "New",
            Self::OnRouteToPickUp => "On route to PU",
            Self::OnSitePickUp => "On site PU",
            Self::LoadedWaitingGtg => "Loaded, Waiting GTG",
            Self::OnRouteToDelivery => "On route to DEL",
            Self::OnSiteDelivery => "On site DEL",
            Self::UnloadedWaitingGtg => "Unloaded, Waiting GTG",
            Self::GoodToGo => "GTG",
            Self::Completed => "Completed",
        }
    }
}

impl fmt::Display for StopStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const PICK_UP_SEQUENCE: [StopStatus; 6] = [
    StopStatus::New,
    StopStatus::OnRouteToPickUp,
    StopStatus::OnSitePickUp,
    StopStatus::LoadedWaitingGtg,
    StopStatus::GoodToGo,
    StopStatus::Completed,
];

const DELIVERY_SEQUENCE: [StopStatus; 6] = [
    StopStatus::New,
    StopStatus::OnRouteToDelivery,
    StopStatus::OnSiteDelivery,
    StopStatus::UnloadedWaitingGtg,
    StopStatus::GoodToGo,
    StopStatus::Completed,
];

impl StopType {
    /// Ordered status sequence for this stop type.
    pub fn sequence(self) -> &'static [StopStatus] {
        match self {
            Self::PickUp => &PICK_UP_SEQUENCE,
            Self::Delivery => &DELIVERY_SEQUENCE,
        }
    }

    /// Position of `status` in this type's sequence.
    pub fn position(self, status: StopStatus) -> Option<usize> {
        self.sequence().iter().position(|s| *s == status)
    }

    /// First status of the sequence.
    pub fn initial(self) -> StopStatus {
        self.sequence()[0]
    }

    /// Status a stop is activated into.
    pub fn activated(self) -> StopStatus {
        self.sequence()[1]
    }

    /// Last non-terminal status.
    pub fn good_to_go(self) -> StopStatus {
        let sequence = self.sequence();
        sequence[sequence.len() - 2]
    }

    /// Final status of the sequence.
    pub fn terminal(self) -> StopStatus {
        let sequence = self.sequence();
        sequence[sequence.len() - 1]
    }

    /// Whether a direct edit from `from` to `to` moves exactly one position.
    pub fn is_adjacent(self, from: StopStatus, to: StopStatus) -> bool {
        match (self.position(from), self.position(to)) {
            (Some(a), Some(b)) => a.abs_diff(b) == 1,
            _ => false,
        }
    }
}

/// Appointment window of a stop.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Window start.
    pub from: DateTime<Utc>,
    /// Window end, if the appointment is a range.
    pub to: Option<DateTime<Utc>>,
}

/// One pickup or delivery waypoint of a load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stop {
    /// Stop identifier, unique within the load.
    pub id: String,
    /// Stop kind.
    #[serde(rename = "type")]
    pub stop_type: StopType,
    /// Current status.
    pub status: StopStatus,
    /// Site of the stop.
    pub facility: Facility,
    /// Appointment window.
    pub window: TimeWindow,
}

impl Stop {
    /// Create a new stop in its initial status.
    pub fn new(
        id: impl Into<String>,
        stop_type: StopType,
        facility: Facility,
        window: TimeWindow,
    ) -> Self {
        Self {
            id: id.into(),
            stop_type,
            status: stop_type.initial(),
            facility,
            window,
        }
    }

    /// Stop has not started.
    pub fn is_initial(&self) -> bool {
        self.status == self.stop_type.initial()
    }

    /// Stop is done.
    pub fn is_terminal(&self) -> bool {
        self.status == self.stop_type.terminal()
    }

    /// Stop is neither initial nor terminal.
    pub fn is_active(&self) -> bool {
        !self.is_initial() && !self.is_terminal()
    }
}

/// Cached road distance between two consecutive stops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteSegment {
    /// Origin stop.
    pub from_stop: String,
    /// Destination stop.
    pub to_stop: String,
    /// Origin facility.
    pub from_facility: String,
    /// Destination facility.
    pub to_facility: String,
    /// Road distance in miles.
    pub miles: f64,
}

/// Cached distance from the truck's start location to the first stop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TruckLeg {
    /// Truck start location the distance was computed from.
    pub origin: GeoPoint,
    /// First stop.
    pub stop_id: String,
    /// First stop's facility.
    pub facility_id: String,
    /// Road distance in miles.
    pub miles: f64,
}

/// A load (shipment).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Load {
    /// Load identifier.
    pub id: String,
    /// Store-managed write version.
    #[serde(default)]
    pub version: i64,
    /// Watermark of the stops derivation.
    #[serde(default)]
    pub stops_ver: Option<i64>,
    /// Watermark of the status derivation.
    #[serde(default)]
    pub status_ver: Option<i64>,
    /// Current status.
    pub status: LoadStatus,
    /// Ordered itinerary.
    pub stops: Vec<Stop>,
    /// Assigned truck.
    #[serde(default)]
    pub truck: Option<String>,
    /// Start of the first stop's window.
    #[serde(default)]
    pub stops_start: Option<DateTime<Utc>>,
    /// End of the last stop's window.
    #[serde(default)]
    pub stops_end: Option<DateTime<Utc>>,
    /// Per-segment road distances; absent when any segment is unknown.
    #[serde(default)]
    pub route: Option<Vec<RouteSegment>>,
    /// Total road distance; absent when any segment is unknown.
    #[serde(default)]
    pub route_miles: Option<f64>,
    /// Where the truck starts this load from.
    #[serde(default)]
    pub start_truck_location: Option<GeoPoint>,
    /// Truck to first stop distance.
    #[serde(default)]
    pub truck_leg: Option<TruckLeg>,
}

impl Load {
    /// Create an Available load with no truck.
    pub fn new(id: impl Into<String>, stops: Vec<Stop>) -> Self {
        Self {
            id: id.into(),
            version: 0,
            stops_ver: None,
            status_ver: None,
            status: LoadStatus::Available,
            stops,
            truck: None,
            stops_start: None,
            stops_end: None,
            route: None,
            route_miles: None,
            start_truck_location: None,
            truck_leg: None,
        }
    }

    /// Look up a stop by id.
    pub fn stop(&self, stop_id: &str) -> Option<&Stop> {
        self.stops.iter().find(|s| s.id == stop_id)
    }

    /// Location of the final stop's facility.
    pub fn final_stop_location(&self) -> Option<GeoPoint> {
        self.stops.last().and_then(|s| s.facility.location)
    }
}

impl Document for Load {
    const COLLECTION: Collection = Collection::Loads;

    fn id(&self) -> &str {
        &self.id
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn set_version(&mut self, version: i64) {
        self.version = version;
    }
}

/// Watermark fields carried by a load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadWatermark {
    /// `stopsVer`.
    Stops,
    /// `statusVer`.
    Status,
}

impl LoadWatermark {
    /// Stored field name.
    pub fn field(self) -> &'static str {
        match self {
            Self::Stops => "stopsVer",
            Self::Status => "statusVer",
        }
    }

    /// Read the watermark from a load.
    pub fn get(self, load: &Load) -> Option<i64> {
        match self {
            Self::Stops => load.stops_ver,
            Self::Status => load.status_ver,
        }
    }

    /// Write the watermark on a load.
    pub fn set(self, load: &mut Load, version: i64) {
        match self {
            Self::Stops => load.stops_ver = Some(version),
            Self::Status => load.status_ver = Some(version),
        }
    }
}

/// Derived changes to a load, applied by a single conditional commit.
///
/// `None` leaves a field untouched; `Some(None)` clears an optional field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadPatch {
    /// New load status.
    pub status: Option<LoadStatus>,
    /// Stop status changes keyed by stop id.
    pub stop_statuses: Vec<(String, StopStatus)>,
    /// New `stopsStart`.
    pub stops_start: Option<Option<DateTime<Utc>>>,
    /// New `stopsEnd`.
    pub stops_end: Option<Option<DateTime<Utc>>>,
    /// New route segments.
    pub route: Option<Option<Vec<RouteSegment>>>,
    /// New total route distance.
    pub route_miles: Option<Option<f64>>,
    /// New truck leg.
    pub truck_leg: Option<Option<TruckLeg>>,
    /// New truck start location.
    pub start_truck_location: Option<Option<GeoPoint>>,
}

impl LoadPatch {
    /// Whether the patch changes nothing.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Apply the patch to a load.
    pub fn apply(&self, load: &mut Load) {
        if let Some(status) = self.status {
            load.status = status;
        }
        for (stop_id, status) in &self.stop_statuses {
            if let Some(stop) = load.stops.iter_mut().find(|s| &s.id == stop_id) {
                stop.status = *status;
            }
        }
        if let Some(value) = self.stops_start {
            load.stops_start = value;
        }
        if let Some(value) = self.stops_end {
            load.stops_end = value;
        }
        if let Some(value) = &self.route {
            load.route = value.clone();
        }
        if let Some(value) = self.route_miles {
            load.route_miles = value;
        }
        if let Some(value) = &self.truck_leg {
            load.truck_leg = value.clone();
        }
        if let Some(value) = self.start_truck_location {
            load.start_truck_location = value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_sequences_share_endpoints() {
        for stop_type in [StopType::PickUp, StopType::Delivery] {
            assert_eq!(stop_type.initial(), StopStatus::New);
            assert_eq!(stop_type.good_to_go(), StopStatus::GoodToGo);
            assert_eq!(stop_type.terminal(), StopStatus::Completed);
        }
        assert_eq!(StopType::PickUp.activated(), StopStatus::OnRouteToPickUp);
        assert_eq!(StopType::Delivery.activated(), StopStatus::OnRouteToDelivery);
    }

    #[test]
    fn test_adjacency_rejects_skips() {
        let t = StopType::PickUp;
        assert!(t.is_adjacent(StopStatus::New, StopStatus::OnRouteToPickUp));
        assert!(t.is_adjacent(StopStatus::GoodToGo, StopStatus::Completed));
        assert!(t.is_adjacent(StopStatus::OnSitePickUp, StopStatus::OnRouteToPickUp));
        assert!(!t.is_adjacent(StopStatus::New, StopStatus::Completed));
        assert!(!t.is_adjacent(StopStatus::New, StopStatus::New));
        // Delivery statuses are not part of the pickup sequence
        assert!(!t.is_adjacent(StopStatus::New, StopStatus::OnRouteToDelivery));
    }

    #[test]
    fn test_status_serialization_uses_display_names() {
        assert_eq!(
            serde_json::to_value(LoadStatus::InProgress).unwrap(),
            serde_json::json!("In Progress")
        );
        assert_eq!(
            serde_json::to_value(StopStatus::LoadedWaitingGtg).unwrap(),
            serde_json::json!("Loaded, Waiting GTG")
        );
        let status: LoadStatus = serde_json::from_value(serde_json::json!("TONU")).unwrap();
        assert_eq!(status, LoadStatus::Tonu);
    }

    #[test]
    fn test_load_serializes_camel_case_watermarks() {
        let mut load = Load::new("L1", vec![]);
        LoadWatermark::Stops.set(&mut load, 4);
        let value = serde_json::to_value(&load).unwrap();
        assert_eq!(value["stopsVer"], 4);
        assert!(value["statusVer"].is_null());
        assert!(value.get("startTruckLocation").is_some());
    }

    #[test]
    fn test_patch_apply_and_empty() {
        assert!(LoadPatch::default().is_empty());

        let mut load = Load::new("L1", vec![]);
        load.start_truck_location = Some(GeoPoint::new(1.0, 2.0));
        let patch = LoadPatch {
            status: Some(LoadStatus::Planned),
            start_truck_location: Some(None),
            ..Default::default()
        };
        assert!(!patch.is_empty());
        patch.apply(&mut load);
        assert_eq!(load.status, LoadStatus::Planned);
        assert!(load.start_truck_location.is_none());
    }
}
