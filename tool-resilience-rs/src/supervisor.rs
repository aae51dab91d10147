//! # Periodic Task Supervision
//!
//! Background jobs (health sweeps, pool rebalancing, scaling analysis,
//! pressure checks) are owned by the component that schedules them. A
//! [`PeriodicTask`] is started with the component and stopped on shutdown or
//! when it is dropped.

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// A job that runs on a fixed period until stopped
#[derive(Debug)]
pub struct PeriodicTask {
    name: String,
    shutdown_tx: broadcast::Sender<()>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PeriodicTask {
    /// Spawns `job` every `period`, first run one period from now.
    ///
    /// The job returns `false` to end the loop, which is how jobs holding a
    /// weak reference to their owner stop once the owner is gone.
    pub fn spawn<F, Fut>(name: impl Into<String>, period: Duration, mut job: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let name = name.into();
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        let task_name = name.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!(task = %task_name, "Periodic task shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        debug!(task = %task_name, "Periodic task tick");
                        if !job().await {
                            debug!(task = %task_name, "Periodic task owner dropped, stopping");
                            break;
                        }
                    }
                }
            }
        });

        info!(task = %name, period_ms = period.as_millis() as u64, "Periodic task started");

        Self {
            name,
            shutdown_tx,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Task name used in logs
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Signals the loop to exit after the current tick
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Signals the loop and waits for it to finish
    pub async fn shutdown(&self) {
        self.stop();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Whether the loop has exited
    pub fn is_finished(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .map(|h| h.is_finished())
            .unwrap_or(true)
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
    }
}
