// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Notification tasks.
//!
//! ```text
//!  ┌─────┐ targets ┌───────┐  claim  ┌────────────┐  delivered  ┌──────┐
//!  │ NEW │────────►│ READY │────────►│ PROCESSING │────────────►│ SENT │
//!  └──┬──┘         └───────┘         └─────┬──────┘             └──────┘
//!     │ no targets                         │ transport error
//!     └──────────────────►┌───────┐◄───────┘
//!                         │ ERROR │
//!                         └───────┘
//! ```

use std::fmt;
use std::fmt::Debug;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::truck::Driver;
use crate::document::{Collection, Document};

/// Delivery state of a notification task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    /// Created, targets not resolved yet.
    New,
    /// Targets resolved, waiting for a sender.
    Ready,
    /// Claimed by a sender.
    Processing,
    /// Delivered.
    Sent,
    /// Failed permanently.
    Error,
}

impl TaskState {
    /// Whether no further transitions happen.
    pub fn is_final(self) -> bool {
        matches!(self, Self::Sent | Self::Error)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::New => "new",
            Self::Ready => "ready",
            Self::Processing => "processing",
            Self::Sent => "sent",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// Channel-specific payload of a notification task.
pub trait TaskPayload:
    Serialize + DeserializeOwned + Clone + Debug + Send + Sync + 'static
{
    /// Collection holding tasks of this channel.
    const COLLECTION: Collection;

    /// Driver the notification addresses, if any.
    fn driver_id(&self) -> Option<&str>;

    /// Delivery targets for this payload, given the addressed driver.
    fn resolve_targets(&self, driver: Option<&Driver>) -> Vec<String>;
}

/// Push notification payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushMessage {
    /// Recipient driver.
    pub driver_id: String,
    /// Notification title.
    pub title: String,
    /// Notification body.
    pub body: String,
    /// Structured data for the mobile app.
    #[serde(default)]
    pub data: Value,
}

impl TaskPayload for PushMessage {
    const COLLECTION: Collection = Collection::PushTasks;

    fn driver_id(&self) -> Option<&str> {
        Some(&self.driver_id)
    }

    fn resolve_targets(&self, driver: Option<&Driver>) -> Vec<String> {
        driver.map(|d| d.push_tokens.clone()).unwrap_or_default()
    }
}

/// Email payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailMessage {
    /// Recipient driver, used when `to` is not set.
    #[serde(default)]
    pub driver_id: Option<String>,
    /// Explicit recipient address.
    #[serde(default)]
    pub to: Option<String>,
    /// Subject line.
    pub subject: String,
    /// Plain-text body.
    pub body: String,
}

impl TaskPayload for EmailMessage {
    const COLLECTION: Collection = Collection::EmailTasks;

    fn driver_id(&self) -> Option<&str> {
        self.driver_id.as_deref()
    }

    fn resolve_targets(&self, driver: Option<&Driver>) -> Vec<String> {
        self.to
            .clone()
            .or_else(|| driver.and_then(|d| d.email.clone()))
            .into_iter()
            .collect()
    }
}

/// A notification waiting for or past delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationTask<P> {
    /// Task identifier.
    pub id: String,
    /// Store-managed write version.
    #[serde(default)]
    pub version: i64,
    /// Delivery state.
    pub state: TaskState,
    /// What to send.
    pub payload: P,
    /// Resolved device tokens or addresses.
    #[serde(default)]
    pub targets: Vec<String>,
    /// Transport response on success.
    #[serde(default)]
    pub result: Option<Value>,
    /// Failure description.
    #[serde(default)]
    pub error: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Time of the last state change.
    pub updated_at: DateTime<Utc>,
}

impl<P: TaskPayload> NotificationTask<P> {
    /// Create a task in state New with a random id.
    pub fn new(payload: P) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            version: 0,
            state: TaskState::New,
            payload,
            targets: Vec::new(),
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

impl<P: TaskPayload> Document for NotificationTask<P> {
    const COLLECTION: Collection = P::COLLECTION;

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

/// Push notification task.
pub type PushTask = NotificationTask<PushMessage>;

/// Email notification task.
pub type EmailTask = NotificationTask<EmailMessage>;

/// State transition of a notification task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskUpdate {
    /// Target state.
    pub state: TaskState,
    /// Replace resolved targets.
    pub targets: Option<Vec<String>>,
    /// Record a transport result.
    pub result: Option<Value>,
    /// Record a failure.
    pub error: Option<String>,
}

impl TaskUpdate {
    /// Plain state change.
    pub fn state(state: TaskState) -> Self {
        Self {
            state,
            targets: None,
            result: None,
            error: None,
        }
    }

    /// Move to Error with a message.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::state(TaskState::Error)
        }
    }

    /// Apply the update to a task.
    pub fn apply<P>(&self, task: &mut NotificationTask<P>) {
        task.state = self.state;
        if let Some(targets) = &self.targets {
            task.targets = targets.clone();
        }
        if let Some(result) = &self.result {
            task.result = Some(result.clone());
        }
        if let Some(error) = &self.error {
            task.error = Some(error.clone());
        }
        task.updated_at = Utc::now();
    }
}
