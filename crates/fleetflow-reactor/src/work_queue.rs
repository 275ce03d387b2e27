// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Bounded-concurrency pull/process engine.
//!
//! A [`WorkQueue`] owns one [`Pull`] source and one [`Process`]or. It keeps at
//! most `parallelism` jobs in flight: a permit is taken before each pull, so a
//! new pull is only issued while capacity remains, and it is released when the
//! job finishes (success, error, timeout or panic).
//!
//! ```text
//!            permit            pull()              spawn (timeout T)
//!  ┌──────────────┐   ┌─────────────────┐   ┌──────────────────────────┐
//!  │ Semaphore(N) │──►│  source.pull()  │──►│ processor.process(event) │
//!  └──────────────┘   └────────┬────────┘   └────────────┬─────────────┘
//!         ▲                    │ Err                     │ done
//!         │                    ▼                         │
//!         │            Failed + fatal.cancel()           │
//!         └──────────────────────────────────────────────┘
//! ```
//!
//! Pull errors are fatal: the queue moves to [`QueueStatus::Failed`] and
//! cancels the process-wide fatal token. Process errors, panics and timeouts
//! only drop the event.
//!
//! Every finished job is acknowledged back to its source with
//! [`Pull::ack`], whatever the outcome. A job still running when the process
//! dies is never acknowledged, so a durable source hands it out again.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::time::Duration;

use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use fleetflow_core::{ChangeEvent, ChangeStream, Document};
use futures::FutureExt;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::error::{ReactorError, Result};

/// Source of work items.
#[async_trait]
pub trait Pull: Send + 'static {
    /// Item produced by the source.
    type Item: Send + 'static;

    /// Wait for the next item. Must be cancel safe: the queue drops the
    /// returned future on shutdown and whenever a job finishes first.
    async fn pull(&mut self) -> Result<Self::Item>;

    /// Position to acknowledge once `item` has been handled.
    fn receipt(&self, _item: &Self::Item) -> Option<i64> {
        None
    }

    /// The job for `receipt` finished. Errors are treated like pull errors.
    async fn ack(&mut self, _receipt: i64) -> Result<()> {
        Ok(())
    }
}

/// Handler for work items.
#[async_trait]
pub trait Process<T>: Send + Sync + 'static {
    /// Handle one item.
    async fn process(&self, item: T) -> Result<()>;
}

#[async_trait]
impl<D: Document> Pull for ChangeStream<D> {
    type Item = ChangeEvent<D>;

    async fn pull(&mut self) -> Result<ChangeEvent<D>> {
        Ok(self.next().await?)
    }

    fn receipt(&self, item: &ChangeEvent<D>) -> Option<i64> {
        Some(item.position())
    }

    async fn ack(&mut self, receipt: i64) -> Result<()> {
        Ok(ChangeStream::ack(self, receipt).await?)
    }
}

#[async_trait]
impl<T: Send + 'static> Pull for mpsc::Receiver<T> {
    type Item = T;

    async fn pull(&mut self) -> Result<T> {
        self.recv()
            .await
            .ok_or_else(|| ReactorError::FeedClosed("channel".to_string()))
    }
}

/// Work queue settings.
#[derive(Debug, Clone)]
pub struct WorkQueueConfig {
    /// Queue name, used as the tracing span name.
    pub name: String,
    /// Maximum concurrent `process` calls.
    pub parallelism: usize,
    /// Per-item timeout.
    pub timeout: Duration,
}

impl WorkQueueConfig {
    /// Settings with the given name and defaults (8 jobs, 30s timeout).
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parallelism: 8,
            timeout: Duration::from_secs(30),
        }
    }

    /// Set the parallelism.
    pub fn parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    /// Set the per-item timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Lifecycle of a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueStatus {
    /// Pulling and processing.
    Running,
    /// No further pulls; draining in-flight jobs.
    Stopping,
    /// Drained after `stop()`.
    Stopped,
    /// The source failed. Terminal.
    Failed,
}

impl QueueStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Running,
            1 => Self::Stopping,
            2 => Self::Stopped,
            _ => Self::Failed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Running => 0,
            Self::Stopping => 1,
            Self::Stopped => 2,
            Self::Failed => 3,
        }
    }
}

struct QueueState {
    running: AtomicUsize,
    status: AtomicU8,
}

impl QueueState {
    fn status(&self) -> QueueStatus {
        QueueStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    fn set_status(&self, status: QueueStatus) {
        self.status.store(status.as_u8(), Ordering::Release);
    }

    /// Move to `status` unless the queue already failed.
    fn settle(&self, status: QueueStatus) {
        let _ = self.status.fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
            (current != QueueStatus::Failed.as_u8()).then_some(status.as_u8())
        });
    }
}

/// Decrements the running count even if the job panics.
struct RunningGuard(Arc<QueueState>);

impl RunningGuard {
    fn enter(state: &Arc<QueueState>) -> Self {
        state.running.fetch_add(1, Ordering::AcqRel);
        Self(state.clone())
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.running.fetch_sub(1, Ordering::AcqRel);
    }
}

/// A running work queue.
pub struct WorkQueue {
    name: String,
    state: Arc<QueueState>,
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

impl WorkQueue {
    /// Start pulling from `source` and processing with `processor`.
    ///
    /// `fatal` is cancelled if the source fails.
    pub fn start<S, H>(
        config: WorkQueueConfig,
        source: S,
        processor: Arc<H>,
        fatal: CancellationToken,
    ) -> Self
    where
        S: Pull,
        H: Process<S::Item>,
    {
        let state = Arc::new(QueueState {
            running: AtomicUsize::new(0),
            status: AtomicU8::new(QueueStatus::Running.as_u8()),
        });
        let stop = CancellationToken::new();
        let name = config.name.clone();

        let handle = tokio::spawn(drive(
            config,
            source,
            processor,
            state.clone(),
            stop.clone(),
            fatal,
        ));

        Self {
            name,
            state,
            stop,
            handle,
        }
    }

    /// Queue name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Jobs currently in flight.
    pub fn running(&self) -> usize {
        self.state.running.load(Ordering::Acquire)
    }

    /// Current lifecycle status.
    pub fn status(&self) -> QueueStatus {
        self.state.status()
    }

    /// Whether the driver task is still alive.
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Stop pulling and wait until every in-flight job has finished.
    ///
    /// An outstanding pull is abandoned.
    pub async fn stop(self) {
        self.state.settle(QueueStatus::Stopping);
        self.stop.cancel();
        if let Err(e) = self.handle.await {
            error!(queue = %self.name, "Work queue driver panicked: {}", e);
        }
    }
}

async fn drive<S, H>(
    config: WorkQueueConfig,
    mut source: S,
    processor: Arc<H>,
    state: Arc<QueueState>,
    stop: CancellationToken,
    fatal: CancellationToken,
) where
    S: Pull,
    H: Process<S::Item>,
{
    let span = info_span!("work_queue", queue = %config.name);
    let semaphore = Arc::new(Semaphore::new(config.parallelism.max(1)));
    let mut jobs: JoinSet<Option<i64>> = JoinSet::new();
    let mut permit = None;

    info!(
        parent: &span,
        parallelism = config.parallelism,
        timeout_ms = config.timeout.as_millis() as u64,
        "Work queue started"
    );

    let failure = loop {
        tokio::select! {
            biased;

            _ = stop.cancelled() => break None,

            Some(joined) = jobs.join_next() => {
                if let Err(e) = settle(&span, &mut source, joined).await {
                    break Some(e);
                }
            }

            acquired = semaphore.clone().acquire_owned(), if permit.is_none() => match acquired {
                Ok(acquired) => permit = Some(acquired),
                Err(_) => break None,
            },

            item = source.pull(), if permit.is_some() => {
                let item = match item {
                    Ok(item) => item,
                    Err(e) => break Some(e),
                };
                let receipt = source.receipt(&item);
                let permit = permit.take();
                let guard = RunningGuard::enter(&state);
                let processor = processor.clone();
                let timeout = config.timeout;
                let job_span = info_span!(parent: &span, "job");

                jobs.spawn(
                    async move {
                        let _permit = permit;
                        let _guard = guard;
                        let job = AssertUnwindSafe(processor.process(item)).catch_unwind();
                        match tokio::time::timeout(timeout, job).await {
                            Ok(Ok(Ok(()))) => {}
                            Ok(Ok(Err(e))) => warn!(error = %e, "Job failed; event dropped"),
                            Ok(Err(_)) => warn!("Job panicked; event dropped"),
                            Err(_) => warn!(
                                timeout_ms = timeout.as_millis() as u64,
                                "Job timed out; event dropped"
                            ),
                        }
                        receipt
                    }
                    .instrument(job_span),
                );
            }
        }
    };

    if let Some(e) = &failure {
        error!(parent: &span, error = %e, "Work queue source failed");
        state.set_status(QueueStatus::Failed);
        fatal.cancel();
    }

    debug!(parent: &span, in_flight = jobs.len(), "Work queue draining");
    while let Some(joined) = jobs.join_next().await {
        if let Err(e) = settle(&span, &mut source, joined).await {
            error!(parent: &span, error = %e, "Acknowledgement failed while draining");
        }
    }

    state.settle(QueueStatus::Stopped);
    info!(parent: &span, status = ?state.status(), "Work queue stopped");
}

/// Acknowledge a finished job to its source.
async fn settle<S: Pull>(
    span: &tracing::Span,
    source: &mut S,
    joined: std::result::Result<Option<i64>, tokio::task::JoinError>,
) -> Result<()> {
    match joined {
        Ok(Some(receipt)) => source.ack(receipt).await,
        Ok(None) => Ok(()),
        Err(e) => {
            debug!(parent: span, error = %e, "Job cancelled");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Counting {
        seen: AtomicUsize,
    }

    #[async_trait]
    impl Process<u32> for Counting {
        async fn process(&self, item: u32) -> Result<()> {
            if item == 13 {
                return Err(ReactorError::Other("unlucky".into()));
            }
            if item == 66 {
                panic!("job panic");
            }
            self.seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_errors_and_panics_are_isolated() {
        let (tx, rx) = mpsc::channel(16);
        let processor = Arc::new(Counting {
            seen: AtomicUsize::new(0),
        });
        let fatal = CancellationToken::new();
        let queue = WorkQueue::start(
            WorkQueueConfig::new("isolation").parallelism(2),
            rx,
            processor.clone(),
            fatal.clone(),
        );

        for item in [1, 13, 66, 2, 3] {
            tx.send(item).await.unwrap();
        }

        tokio::time::timeout(Duration::from_secs(5), async {
            while processor.seen.load(Ordering::SeqCst) < 3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("queue stalled after a failing job");

        assert_eq!(queue.status(), QueueStatus::Running);
        assert!(!fatal.is_cancelled());
        queue.stop().await;
    }

    #[tokio::test]
    async fn test_closed_source_is_fatal() {
        let (tx, rx) = mpsc::channel::<u32>(1);
        drop(tx);
        let fatal = CancellationToken::new();
        let queue = WorkQueue::start(
            WorkQueueConfig::new("closed"),
            rx,
            Arc::new(Counting {
                seen: AtomicUsize::new(0),
            }),
            fatal.clone(),
        );

        tokio::time::timeout(Duration::from_secs(5), fatal.cancelled())
            .await
            .expect("fatal token not cancelled");
        assert_eq!(queue.status(), QueueStatus::Failed);

        queue.stop().await;
    }

    #[test]
    fn test_config_parallelism_floor() {
        let config = WorkQueueConfig::new("q").parallelism(0);
        assert_eq!(config.parallelism, 1);
    }
}
