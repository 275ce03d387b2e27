// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Delivery transports for notification tasks.

use std::sync::Mutex;

use async_trait::async_trait;
use fleetflow_core::model::TaskPayload;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::info;

/// Transport failures. Recorded on the task as its error.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The provider refused the message.
    #[error("rejected by provider: {0}")]
    Rejected(String),

    /// The provider could not be reached.
    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

/// Sends payloads of one channel.
#[async_trait]
pub trait Transport<P: TaskPayload>: Send + Sync {
    /// Channel name, for logs.
    fn channel(&self) -> &'static str;

    /// Deliver `payload` to `targets`. The returned value is stored as the
    /// task result.
    async fn send(&self, payload: &P, targets: &[String]) -> Result<Value, TransportError>;
}

/// Transport that only logs. Default when no provider is configured.
#[derive(Debug, Clone, Copy)]
pub struct LogTransport {
    channel: &'static str,
}

impl LogTransport {
    /// Log transport labelled `channel`.
    pub fn new(channel: &'static str) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl<P: TaskPayload> Transport<P> for LogTransport {
    fn channel(&self) -> &'static str {
        self.channel
    }

    async fn send(&self, payload: &P, targets: &[String]) -> Result<Value, TransportError> {
        info!(
            channel = self.channel,
            targets = targets.len(),
            payload = ?payload,
            "Notification delivered to log"
        );
        Ok(json!({ "channel": self.channel, "delivered": targets.len() }))
    }
}

/// A send captured by [`RecordingTransport`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedSend<P> {
    /// Payload sent.
    pub payload: P,
    /// Targets it was sent to.
    pub targets: Vec<String>,
}

/// Transport that records sends in memory, optionally failing them.
#[derive(Debug)]
pub struct RecordingTransport<P> {
    sent: Mutex<Vec<RecordedSend<P>>>,
    failure: Option<TransportError>,
}

impl<P> Default for RecordingTransport<P> {
    fn default() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            failure: None,
        }
    }
}

impl<P: Clone> RecordingTransport<P> {
    /// Transport that accepts every send.
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport that records then fails every send with `error`.
    pub fn failing(error: TransportError) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            failure: Some(error),
        }
    }

    /// Sends so far.
    pub fn sent(&self) -> Vec<RecordedSend<P>> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl<P: TaskPayload> Transport<P> for RecordingTransport<P> {
    fn channel(&self) -> &'static str {
        "recording"
    }

    async fn send(&self, payload: &P, targets: &[String]) -> Result<Value, TransportError> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(RecordedSend {
                payload: payload.clone(),
                targets: targets.to_vec(),
            });
        }
        match &self.failure {
            Some(error) => Err(error.clone()),
            None => Ok(json!({ "accepted": targets })),
        }
    }
}
