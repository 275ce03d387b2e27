// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Periodic maintenance jobs.
//!
//! Every scheduled job gets its own task and a [`JobHandle`]; there is no
//! global timer registry. Stopping a handle lets a running tick finish.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::error::Result;

/// A periodic job.
#[async_trait]
pub trait Job: Send + Sync + 'static {
    /// Job name, for logs.
    fn name(&self) -> &'static str;

    /// Run one tick.
    async fn run(&self) -> Result<()>;
}

/// Handle to a scheduled job.
pub struct JobHandle {
    name: &'static str,
    shutdown: Arc<Notify>,
    handle: JoinHandle<()>,
}

impl JobHandle {
    /// Job name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether the job task has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stop the job and wait for its task to exit.
    pub async fn stop(self) {
        self.shutdown.notify_one();
        if let Err(e) = self.handle.await {
            error!(job = self.name, "Scheduled job task panicked: {}", e);
        }
    }
}

/// Starts periodic jobs.
pub struct Scheduler;

impl Scheduler {
    /// Run `job` every `period`, first after one period.
    pub fn every(period: Duration, job: Arc<dyn Job>) -> JobHandle {
        let shutdown = Arc::new(Notify::new());
        let name = job.name();
        let handle = tokio::spawn(run_job(period, job, shutdown.clone()));
        JobHandle {
            name,
            shutdown,
            handle,
        }
    }
}

async fn run_job(period: Duration, job: Arc<dyn Job>, shutdown: Arc<Notify>) {
    info!(
        job = job.name(),
        period_secs = period.as_secs(),
        "Scheduled job started"
    );

    loop {
        tokio::select! {
            biased;

            _ = shutdown.notified() => {
                info!(job = job.name(), "Scheduled job shutting down");
                break;
            }
            _ = tokio::time::sleep(period) => {
                if let Err(e) = job.run().await {
                    error!(job = job.name(), error = %e, "Scheduled job failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Tick(AtomicUsize);

    #[async_trait]
    impl Job for Tick {
        fn name(&self) -> &'static str {
            "tick"
        }

        async fn run(&self) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_runs_until_stopped() {
        let job = Arc::new(Tick(AtomicUsize::new(0)));
        let handle = Scheduler::every(Duration::from_secs(10), job.clone());

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(job.0.load(Ordering::SeqCst), 3);

        handle.stop().await;
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(job.0.load(Ordering::SeqCst), 3);
    }
}
