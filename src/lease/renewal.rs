//! Background lease renewal

use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::lease::Lease;
use crate::utils::SoloError;

/// Spawns renewal tasks at a fixed interval
#[derive(Debug, Clone, Copy)]
pub struct RenewalService {
    interval: Duration,
}

impl RenewalService {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Renew `lease` every interval until stopped or the lease is lost.
    ///
    /// Transient failures are retried on the next tick; a lost lease flips
    /// the handle's lost flag and ends the task.
    pub fn schedule(&self, lease: Lease) -> RenewalHandle {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let (lost_tx, lost_rx) = watch::channel(false);
        let interval = self.interval;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // the first tick completes immediately and the lease was just acquired
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = &mut stop_rx => {
                        debug!(namespace = %lease.namespace(), "Lease renewal stopped");
                        break;
                    }
                    _ = ticker.tick() => match lease.renew().await {
                        Ok(()) => {}
                        Err(SoloError::LeaseLost { namespace }) => {
                            warn!(%namespace, "Lease lost, stopping renewal");
                            let _ = lost_tx.send(true);
                            break;
                        }
                        Err(e) => {
                            warn!(namespace = %lease.namespace(), error = %e, "Lease renewal failed, will retry");
                        }
                    }
                }
            }
        });

        RenewalHandle {
            stop: Some(stop_tx),
            lost: lost_rx,
            task: Some(task),
        }
    }
}

/// Controls a scheduled renewal task
pub struct RenewalHandle {
    stop: Option<oneshot::Sender<()>>,
    lost: watch::Receiver<bool>,
    task: Option<JoinHandle<()>>,
}

impl RenewalHandle {
    pub fn is_lost(&self) -> bool {
        *self.lost.borrow()
    }

    /// Stop renewing and wait for the task to end
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for RenewalHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
