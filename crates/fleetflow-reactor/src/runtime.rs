// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for fleetflow-reactor.
//!
//! [`ReactorRuntime`] wires every consumer to its subscription inside an
//! existing tokio application.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use fleetflow_core::EntityStore;
//! use fleetflow_reactor::geo::{GoogleMapsClient, GoogleMapsConfig};
//! use fleetflow_reactor::runtime::ReactorRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = EntityStore::open_sqlite(".data/fleetflow.db").await?;
//!     let geo = Arc::new(GoogleMapsClient::new(GoogleMapsConfig::default())?);
//!
//!     let runtime = ReactorRuntime::builder()
//!         .store(store)
//!         .geo(geo)
//!         .queue_parallelism(16)
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     // ... run your application ...
//!
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use fleetflow_core::EntityStore;
use fleetflow_core::model::{EmailMessage, EmailTask, Load, PushMessage, PushTask, Truck};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::availability_sweeper::AvailabilitySweeper;
use crate::consumers::{
    LoadStatusConsumer, LoadStopsConsumer, TruckAvailabilityConsumer, load_status, load_stops,
    truck_availability,
};
use crate::geo::GeoProvider;
use crate::notifications::{DeliveryConsumer, LogTransport, Transport, delivery_subscription};
use crate::scheduler::{JobHandle, Scheduler};
use crate::work_queue::{QueueStatus, WorkQueue, WorkQueueConfig};

/// Push delivery queue name.
pub const PUSH_DELIVERY: &str = "push-delivery";
/// Email delivery queue name.
pub const EMAIL_DELIVERY: &str = "email-delivery";

/// Builder for creating a [`ReactorRuntime`].
pub struct ReactorRuntimeBuilder {
    store: Option<EntityStore>,
    geo: Option<Arc<dyn GeoProvider>>,
    push_transport: Option<Arc<dyn Transport<PushMessage>>>,
    email_transport: Option<Arc<dyn Transport<EmailMessage>>>,
    queue_parallelism: usize,
    notification_parallelism: usize,
    queue_timeout: Duration,
    sweep_interval: Duration,
}

impl Default for ReactorRuntimeBuilder {
    fn default() -> Self {
        Self {
            store: None,
            geo: None,
            push_transport: None,
            email_transport: None,
            queue_parallelism: 8,
            notification_parallelism: 4,
            queue_timeout: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl ReactorRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the entity store (required).
    pub fn store(mut self, store: EntityStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the distance and time zone provider (required).
    pub fn geo(mut self, geo: Arc<dyn GeoProvider>) -> Self {
        self.geo = Some(geo);
        self
    }

    /// Set the push transport. Defaults to logging.
    pub fn push_transport(mut self, transport: Arc<dyn Transport<PushMessage>>) -> Self {
        self.push_transport = Some(transport);
        self
    }

    /// Set the email transport. Defaults to logging.
    pub fn email_transport(mut self, transport: Arc<dyn Transport<EmailMessage>>) -> Self {
        self.email_transport = Some(transport);
        self
    }

    /// Set the parallelism of the load and truck queues (default: 8).
    pub fn queue_parallelism(mut self, parallelism: usize) -> Self {
        self.queue_parallelism = parallelism;
        self
    }

    /// Set the parallelism of the delivery queues (default: 4).
    pub fn notification_parallelism(mut self, parallelism: usize) -> Self {
        self.notification_parallelism = parallelism;
        self
    }

    /// Set the per-job timeout (default: 30 seconds).
    pub fn queue_timeout(mut self, timeout: Duration) -> Self {
        self.queue_timeout = timeout;
        self
    }

    /// Set the availability sweeper period (default: 60 seconds).
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<ReactorRuntimeConfig> {
        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("store is required"))?;
        let geo = self.geo.ok_or_else(|| anyhow::anyhow!("geo is required"))?;
        if self.queue_parallelism == 0 || self.notification_parallelism == 0 {
            return Err(anyhow::anyhow!("parallelism must be positive"));
        }

        Ok(ReactorRuntimeConfig {
            store,
            geo,
            push_transport: self
                .push_transport
                .unwrap_or_else(|| Arc::new(LogTransport::new("push"))),
            email_transport: self
                .email_transport
                .unwrap_or_else(|| Arc::new(LogTransport::new("email"))),
            queue_parallelism: self.queue_parallelism,
            notification_parallelism: self.notification_parallelism,
            queue_timeout: self.queue_timeout,
            sweep_interval: self.sweep_interval,
        })
    }
}

/// Configuration for a [`ReactorRuntime`].
pub struct ReactorRuntimeConfig {
    store: EntityStore,
    geo: Arc<dyn GeoProvider>,
    push_transport: Arc<dyn Transport<PushMessage>>,
    email_transport: Arc<dyn Transport<EmailMessage>>,
    queue_parallelism: usize,
    notification_parallelism: usize,
    queue_timeout: Duration,
    sweep_interval: Duration,
}

impl ReactorRuntimeConfig {
    fn queue(&self, name: &str, parallelism: usize) -> WorkQueueConfig {
        WorkQueueConfig::new(name)
            .parallelism(parallelism)
            .timeout(self.queue_timeout)
    }

    /// Start every queue and the availability sweeper.
    pub async fn start(self) -> Result<ReactorRuntime> {
        let fatal = CancellationToken::new();
        let store = &self.store;

        let entity_queues = vec![
            WorkQueue::start(
                self.queue(load_stops::SUBSCRIPTION, self.queue_parallelism),
                store.subscribe::<Load>(load_stops::subscription()),
                Arc::new(LoadStopsConsumer::new(store.clone(), self.geo.clone())),
                fatal.clone(),
            ),
            WorkQueue::start(
                self.queue(load_status::SUBSCRIPTION, self.queue_parallelism),
                store.subscribe::<Load>(load_status::subscription()),
                Arc::new(LoadStatusConsumer::new(store.clone())),
                fatal.clone(),
            ),
            WorkQueue::start(
                self.queue(truck_availability::SUBSCRIPTION, self.queue_parallelism),
                store.subscribe::<Truck>(truck_availability::subscription()),
                Arc::new(TruckAvailabilityConsumer::new(
                    store.clone(),
                    self.geo.clone(),
                )),
                fatal.clone(),
            ),
        ];

        let delivery_queues = vec![
            WorkQueue::start(
                self.queue(PUSH_DELIVERY, self.notification_parallelism),
                store.subscribe::<PushTask>(delivery_subscription::<PushMessage>(PUSH_DELIVERY)),
                Arc::new(DeliveryConsumer::new(
                    store.clone(),
                    self.push_transport.clone(),
                )),
                fatal.clone(),
            ),
            WorkQueue::start(
                self.queue(EMAIL_DELIVERY, self.notification_parallelism),
                store.subscribe::<EmailTask>(delivery_subscription::<EmailMessage>(EMAIL_DELIVERY)),
                Arc::new(DeliveryConsumer::new(
                    store.clone(),
                    self.email_transport.clone(),
                )),
                fatal.clone(),
            ),
        ];

        let sweeper = Scheduler::every(
            self.sweep_interval,
            Arc::new(AvailabilitySweeper::new(store.clone())),
        );

        info!(
            backend = store.backend().name(),
            queues = entity_queues.len() + delivery_queues.len(),
            queue_parallelism = self.queue_parallelism,
            notification_parallelism = self.notification_parallelism,
            "ReactorRuntime started"
        );

        Ok(ReactorRuntime {
            store: self.store,
            entity_queues,
            delivery_queues,
            sweeper,
            fatal,
        })
    }
}

/// A running reactor.
pub struct ReactorRuntime {
    store: EntityStore,
    entity_queues: Vec<WorkQueue>,
    delivery_queues: Vec<WorkQueue>,
    sweeper: JobHandle,
    fatal: CancellationToken,
}

impl ReactorRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> ReactorRuntimeBuilder {
        ReactorRuntimeBuilder::new()
    }

    /// Store the runtime consumes.
    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    /// Cancelled when any queue's feed fails. The host should shut down.
    pub fn fatal_token(&self) -> CancellationToken {
        self.fatal.clone()
    }

    /// Status of every queue, by name.
    pub fn queue_statuses(&self) -> Vec<(String, QueueStatus)> {
        self.entity_queues
            .iter()
            .chain(&self.delivery_queues)
            .map(|q| (q.name().to_string(), q.status()))
            .collect()
    }

    /// Check if every queue and the sweeper are still running.
    pub fn is_running(&self) -> bool {
        !self.fatal.is_cancelled()
            && !self.sweeper.is_finished()
            && self
                .entity_queues
                .iter()
                .chain(&self.delivery_queues)
                .all(WorkQueue::is_running)
    }

    /// Gracefully shut down the runtime.
    ///
    /// Stops the sweeper, then drains the entity queues, then the delivery
    /// queues, which keep delivering pushes enqueued while the entity queues
    /// drain.
    pub async fn shutdown(self) -> Result<()> {
        info!("ReactorRuntime shutting down...");

        self.sweeper.stop().await;

        for queue in self.entity_queues {
            queue.stop().await;
        }
        for queue in self.delivery_queues {
            queue.stop().await;
        }

        info!("ReactorRuntime shutdown complete");
        Ok(())
    }
}
