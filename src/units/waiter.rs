use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::{UnitManager, UnitSet};
use crate::errors::UnitResult;

/// Blocks until none of a set of units is running
#[async_trait]
pub trait CompletionWaiter: Send + Sync {
    /// Returns the number of running-set observations made.
    ///
    /// There is no timeout: stuck jobs are an external watchdog's problem.
    /// A hard manager error is returned instead of retried.
    async fn wait_until_finished(&self, units: &UnitSet) -> UnitResult<usize>;
}

/// Polls the host manager at a fixed cadence, the manager has no notify primitive
pub struct PollingWaiter {
    manager: Arc<dyn UnitManager>,
    poll_interval: Duration,
}

impl PollingWaiter {
    pub fn new(manager: Arc<dyn UnitManager>, poll_interval: Duration) -> Self {
        Self {
            manager,
            poll_interval,
        }
    }
}

#[async_trait]
impl CompletionWaiter for PollingWaiter {
    async fn wait_until_finished(&self, units: &UnitSet) -> UnitResult<usize> {
        let mut observations = 0;

        loop {
            let running = self.manager.list_running().await?;
            observations += 1;

            let waiting_for = units.still_running(&running);
            if waiting_for.is_empty() {
                debug!(units = %units, observations, "Units finished");
                return Ok(observations);
            }

            debug!(?waiting_for, "Still waiting for units");
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
