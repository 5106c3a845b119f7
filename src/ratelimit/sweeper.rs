//! Background eviction of idle request counters.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info};

use super::limiter::RateLimiter;
use crate::error::Result;

/// Periodic sweep task over a [`RateLimiter`].
pub struct Sweeper;

/// Handle to a running sweep task.
///
/// Dropping the handle also stops the task, but only [`SweeperHandle::stop`]
/// waits for it to finish.
#[derive(Debug)]
pub struct SweeperHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl Sweeper {
    /// Spawn the sweep task on the current tokio runtime.
    ///
    /// The first sweep runs one full `period` after start.
    pub fn start(limiter: Arc<RateLimiter>, period: Duration) -> SweeperHandle {
        let (shutdown, mut shutdown_rx) = oneshot::channel::<()>();

        info!(period_secs = period.as_secs(), "Starting counter sweep task");

        let task = tokio::spawn(async move {
            let mut ticker = time::interval_at(time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => {
                        debug!("Counter sweep task received shutdown");
                        break;
                    }
                    _ = ticker.tick() => {
                        limiter.sweep();
                    }
                }
            }
        });

        SweeperHandle { shutdown, task }
    }
}

impl SweeperHandle {
    /// Stop the sweep task and wait for it to exit.
    pub async fn stop(self) -> Result<()> {
        let SweeperHandle { shutdown, task } = self;
        // The task may already be gone if the runtime is shutting down
        let _ = shutdown.send(());
        task.await?;
        info!("Counter sweep task stopped");
        Ok(())
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
