// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Notification dispatch and delivery.
//!
//! Consumers enqueue work by inserting a task through [`NotificationDispatch`];
//! the insert lands on the task collection's change feed, where a
//! [`DeliveryConsumer`] picks it up and walks it through
//! `new → ready → processing → sent | error`.

pub mod delivery;
pub mod transport;

pub use self::delivery::DeliveryConsumer;
pub use self::transport::{
    LogTransport, RecordedSend, RecordingTransport, Transport, TransportError,
};

use fleetflow_core::EntityStore;
use fleetflow_core::change::{ChangeFilter, Subscription};
use fleetflow_core::model::{NotificationTask, TaskPayload, TaskState, TaskUpdate};
use tracing::{debug, info};

use crate::error::Result;

/// Creates and transitions notification tasks.
#[derive(Clone)]
pub struct NotificationDispatch {
    store: EntityStore,
}

impl NotificationDispatch {
    /// Dispatch over `store`.
    pub fn new(store: EntityStore) -> Self {
        Self { store }
    }

    /// Enqueue `payload`. Returns the new task id.
    pub async fn create_task<P: TaskPayload>(&self, payload: P) -> Result<String> {
        let task = self.store.insert_task(NotificationTask::new(payload)).await?;
        info!(
            task_id = %task.id,
            collection = %P::COLLECTION,
            "Notification task created"
        );
        Ok(task.id)
    }

    /// Apply `update` if the task is still in `from`. Returns whether it
    /// moved.
    pub async fn update_task<P: TaskPayload>(
        &self,
        id: &str,
        from: TaskState,
        update: TaskUpdate,
    ) -> Result<bool> {
        let moved = self
            .store
            .transition_task::<P>(id, from, &update)
            .await?
            .is_some();
        if moved {
            debug!(task_id = %id, from = %from, to = %update.state, "Task transitioned");
        } else {
            debug!(task_id = %id, from = %from, to = %update.state, "Task no longer in expected state");
        }
        Ok(moved)
    }
}

/// Delivery subscription for the task collection of `P`.
pub fn delivery_subscription<P: TaskPayload>(name: &str) -> Subscription {
    Subscription::new(name, P::COLLECTION, ChangeFilter::inserts_and(&["state"]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetflow_core::model::{EmailMessage, EmailTask};

    #[tokio::test]
    async fn test_create_and_update_task() {
        let store = EntityStore::in_memory();
        let dispatch = NotificationDispatch::new(store.clone());

        let id = dispatch
            .create_task(EmailMessage {
                driver_id: None,
                to: Some("ops@fleet.example".into()),
                subject: "Hello".into(),
                body: "World".into(),
            })
            .await
            .unwrap();

        let task: EmailTask = store.get_task(&id).await.unwrap().unwrap();
        assert_eq!(task.state, TaskState::New);

        let moved = dispatch
            .update_task::<EmailMessage>(&id, TaskState::New, TaskUpdate::state(TaskState::Ready))
            .await
            .unwrap();
        assert!(moved);

        // Second attempt from the same state is refused
        let moved = dispatch
            .update_task::<EmailMessage>(&id, TaskState::New, TaskUpdate::state(TaskState::Ready))
            .await
            .unwrap();
        assert!(!moved);
    }
}
