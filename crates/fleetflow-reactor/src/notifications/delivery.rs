// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Delivery of queued notification tasks through a [`Transport`].
//!
//! A task moves New to Ready (or Error when it has no targets), then Ready to
//! Processing by claim, then Processing to Sent or Error.

use std::sync::Arc;

use async_trait::async_trait;
use fleetflow_core::model::{NotificationTask, TaskPayload, TaskState, TaskUpdate};
use fleetflow_core::{ChangeEvent, EntityStore};
use tracing::{debug, info, warn};

use super::transport::Transport;
use crate::error::Result;
use crate::work_queue::Process;

/// Moves tasks of one channel from `new` to a final state.
///
/// Each step is a compare-and-set on the task state, so redelivered events
/// and competing consumers cannot send a task twice.
pub struct DeliveryConsumer<P: TaskPayload> {
    store: EntityStore,
    transport: Arc<dyn Transport<P>>,
}

impl<P: TaskPayload> DeliveryConsumer<P> {
    /// Consumer delivering through `transport`.
    pub fn new(store: EntityStore, transport: Arc<dyn Transport<P>>) -> Self {
        Self { store, transport }
    }

    async fn resolve(&self, task: &NotificationTask<P>) -> Result<()> {
        let driver = match task.payload.driver_id() {
            Some(driver_id) => self.store.get_driver(driver_id).await?,
            None => None,
        };
        let targets = task.payload.resolve_targets(driver.as_ref());

        let update = if targets.is_empty() {
            warn!(task_id = %task.id, "No delivery targets");
            TaskUpdate::failed("no delivery targets")
        } else {
            TaskUpdate {
                targets: Some(targets),
                ..TaskUpdate::state(TaskState::Ready)
            }
        };
        self.store
            .transition_task::<P>(&task.id, TaskState::New, &update)
            .await?;
        Ok(())
    }

    async fn deliver(&self, task: &NotificationTask<P>) -> Result<()> {
        let claim = TaskUpdate::state(TaskState::Processing);
        let Some(claimed) = self
            .store
            .transition_task::<P>(&task.id, TaskState::Ready, &claim)
            .await?
        else {
            debug!(task_id = %task.id, "Task already claimed");
            return Ok(());
        };

        let update = match self.transport.send(&claimed.payload, &claimed.targets).await {
            Ok(result) => {
                info!(
                    task_id = %claimed.id,
                    channel = self.transport.channel(),
                    targets = claimed.targets.len(),
                    "Notification sent"
                );
                TaskUpdate {
                    result: Some(result),
                    ..TaskUpdate::state(TaskState::Sent)
                }
            }
            Err(e) => {
                warn!(
                    task_id = %claimed.id,
                    channel = self.transport.channel(),
                    error = %e,
                    "Notification delivery failed"
                );
                TaskUpdate::failed(e.to_string())
            }
        };
        self.store
            .transition_task::<P>(&claimed.id, TaskState::Processing, &update)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl<P: TaskPayload> Process<ChangeEvent<NotificationTask<P>>> for DeliveryConsumer<P> {
    async fn process(&self, event: ChangeEvent<NotificationTask<P>>) -> Result<()> {
        let Some(task) = self
            .store
            .get_task::<P>(event.document_id())
            .await?
        else {
            return Ok(());
        };

        match task.state {
            TaskState::New => self.resolve(&task).await,
            TaskState::Ready => self.deliver(&task).await,
            TaskState::Processing | TaskState::Sent | TaskState::Error => Ok(()),
        }
    }
}
