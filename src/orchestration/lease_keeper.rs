//! Background renewal of a task's execution lock.

use crate::execution::TaskCancellation;
use crate::locking::{FenceToken, LockManager};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Renews a held lock until stopped; cancels the task if renewal is refused
#[derive(Debug)]
pub struct LeaseKeeper {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

impl LeaseKeeper {
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        locks: Arc<LockManager>,
        key: String,
        owner_id: String,
        fence_token: FenceToken,
        lease_duration: Duration,
        renewal_interval: Duration,
        task: TaskCancellation,
    ) -> Self {
        let stop = CancellationToken::new();
        let stopped = stop.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stopped.cancelled() => break,
                    _ = task.cancelled() => break,
                    _ = tokio::time::sleep(renewal_interval) => {
                        match locks.renew(&key, &owner_id, fence_token, lease_duration) {
                            Ok(expires_at) => {
                                debug!(key = %key, expires_at = %expires_at, "Task lock renewed");
                            }
                            Err(e) => {
                                warn!(key = %key, error = %e, "Task lock renewal refused, cancelling task");
                                task.cancel(format!("lock ownership lost: {e}"));
                                break;
                            }
                        }
                    }
                }
            }
        });

        Self { stop, handle }
    }

    /// Stop renewing and wait for the keeper to exit
    pub async fn stop(self) {
        self.stop.cancel();
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Lease keeper ended abnormally");
        }
    }
}
