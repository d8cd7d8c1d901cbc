//! Stoppable periodic tasks.
//!
//! A [`PeriodicTask`] owns a tokio task that runs a job on a fixed interval
//! until it is stopped or dropped. Ownership of the handle is ownership of the
//! timer: there are no ambient global intervals.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::error::{Error, Result};

/// Handle to a running periodic job
#[derive(Debug)]
pub struct PeriodicTask {
    name: String,
    shutdown: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicTask {
    /// Spawn `job` every `period`, first run one period from now.
    ///
    /// Must be called from within a tokio runtime. A zero period is rejected.
    pub fn spawn<F, Fut>(name: impl Into<String>, period: Duration, mut job: F) -> Result<Self>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        if period.is_zero() {
            return Err(Error::Config {
                name,
                reason: "period must be greater than 0".into(),
            });
        }
        let (shutdown, mut stop_rx) = watch::channel(false);
        let task_name = name.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            tracing::debug!(task = %task_name, period_ms = period.as_millis() as u64, "periodic task started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => job().await,
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            tracing::debug!(task = %task_name, "periodic task stopped");
        });

        Ok(Self {
            name,
            shutdown,
            handle: Some(handle),
        })
    }

    /// Task name used in logs
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check if the job loop is still running
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map(|h| !h.is_finished()).unwrap_or(false)
    }

    /// Signal the loop to exit and wait for it to finish
    pub async fn stop(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                tracing::warn!(task = %self.name, error = %e, "periodic task ended abnormally");
            }
        }
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}
