// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Document trait and collection identifiers.

use std::fmt;

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Name of the write-version field present on every document.
pub const VERSION_FIELD: &str = "version";

/// Collections held by the store. Each collection has its own change feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    /// Loads (shipments) with their stops.
    Loads,
    /// Trucks.
    Trucks,
    /// Drivers.
    Drivers,
    /// Push notification tasks.
    PushTasks,
    /// Email notification tasks.
    EmailTasks,
}

impl Collection {
    /// Storage name of the collection.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Loads => "loads",
            Self::Trucks => "trucks",
            Self::Drivers => "drivers",
            Self::PushTasks => "push_tasks",
            Self::EmailTasks => "email_tasks",
        }
    }

    /// Parse a storage name back into a collection.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "loads" => Some(Self::Loads),
            "trucks" => Some(Self::Trucks),
            "drivers" => Some(Self::Drivers),
            "push_tasks" => Some(Self::PushTasks),
            "email_tasks" => Some(Self::EmailTasks),
            _ => None,
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A versioned document stored in a [`Collection`].
///
/// The store owns the `version` field: it is set to 1 on insert and
/// incremented by exactly one on every successful write.
pub trait Document: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Collection this document type lives in.
    const COLLECTION: Collection;

    /// Document identifier.
    fn id(&self) -> &str;

    /// Current write version.
    fn version(&self) -> i64;

    /// Overwrite the write version. Only the store calls this.
    fn set_version(&mut self, version: i64);
}
