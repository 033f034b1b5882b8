//! Background eviction of stale visitors.

use std::sync::Weak;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use super::clock::Clock;
use super::store::VisitorStore;

/// Handle to a periodic sweep over a [`VisitorStore`].
///
/// Dropping the handle signals the task to stop. The task also ends by itself
/// once the store it sweeps has been dropped.
#[derive(Debug)]
pub(crate) struct CleanupTask {
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl CleanupTask {
    /// Spawn the sweep on the current Tokio runtime.
    pub(crate) fn spawn<C: Clock>(store: Weak<VisitorStore<C>>, period: Duration) -> Self {
        let (shutdown, mut stop) = oneshot::channel::<()>();

        info!(period = ?period, "Starting visitor cleanup task");

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = &mut stop => {
                        info!("Visitor cleanup task stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let Some(store) = store.upgrade() else {
                            debug!("Visitor store dropped, ending cleanup task");
                            break;
                        };
                        store.cleanup_stale_visitors();
                    }
                }
            }
        });

        Self {
            shutdown: Some(shutdown),
            handle,
        }
    }

    /// Whether the task has exited.
    pub(crate) fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for CleanupTask {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            // The task may already be gone
            let _ = shutdown.send(());
        }
    }
}
