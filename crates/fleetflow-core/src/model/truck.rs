// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Trucks and drivers.

use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use super::geo::GeoPoint;
use crate::document::{Collection, Document};

/// Truck availability status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TruckStatus {
    /// Free for assignment.
    Available,
    /// Out of service.
    #[serde(rename = "Not Available")]
    NotAvailable,
    /// Free from `availabilityAt` onwards.
    #[serde(rename = "Will be available")]
    WillBeAvailable,
    /// Working an in-progress load.
    #[serde(rename = "On route")]
    OnRoute,
}

impl TruckStatus {
    /// Display name as stored.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Available => "Available",
            Self::NotAvailable => "Not Available",
            Self::WillBeAvailable => "Will be available",
            Self::OnRoute => "On route",
        }
    }
}

impl fmt::Display for TruckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A truck.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Truck {
    /// Truck identifier.
    pub id: String,
    /// Store-managed write version.
    #[serde(default)]
    pub version: i64,
    /// Watermark of the availability derivation.
    #[serde(default)]
    pub availability_at_ver: Option<i64>,
    /// Current status.
    pub status: TruckStatus,
    /// Last reported position.
    #[serde(default)]
    pub last_location: Option<GeoPoint>,
    /// Where the truck will become available (operator input).
    #[serde(default)]
    pub availability_location: Option<GeoPoint>,
    /// When the truck will become available, in the operator's local time.
    #[serde(default)]
    pub availability_at_local: Option<NaiveDateTime>,
    /// `availabilityAtLocal` resolved to an absolute instant.
    #[serde(default)]
    pub availability_at: Option<DateTime<Utc>>,
    /// Assigned driver.
    #[serde(default)]
    pub driver: Option<String>,
}

impl Truck {
    /// Create an Available truck.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: 0,
            availability_at_ver: None,
            status: TruckStatus::Available,
            last_location: None,
            availability_location: None,
            availability_at_local: None,
            availability_at: None,
            driver: None,
        }
    }
}

impl Document for Truck {
    const COLLECTION: Collection = Collection::Trucks;

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

/// Derived changes to a truck.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TruckPatch {
    /// New status.
    pub status: Option<TruckStatus>,
    /// New resolved availability instant.
    pub availability_at: Option<Option<DateTime<Utc>>>,
}

impl TruckPatch {
    /// Whether the patch changes nothing.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Apply the patch to a truck.
    pub fn apply(&self, truck: &mut Truck) {
        if let Some(status) = self.status {
            truck.status = status;
        }
        if let Some(value) = self.availability_at {
            truck.availability_at = value;
        }
    }
}

/// A driver. Trucks reference drivers by id; consumers join explicitly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Driver {
    /// Driver identifier.
    pub id: String,
    /// Store-managed write version.
    #[serde(default)]
    pub version: i64,
    /// Full name.
    pub name: String,
    /// Email address.
    #[serde(default)]
    pub email: Option<String>,
    /// Registered push device tokens.
    #[serde(default)]
    pub push_tokens: Vec<String>,
}

impl Driver {
    /// Create a driver without contact details.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: 0,
            name: name.into(),
            email: None,
            push_tokens: Vec::new(),
        }
    }
}

impl Document for Driver {
    const COLLECTION: Collection = Collection::Drivers;

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
