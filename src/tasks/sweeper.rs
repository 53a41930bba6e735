//! Expiry Sweeper Task
//!
//! Background task that periodically removes expired entries from one namespace.

use std::sync::Weak;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::Namespace;

/// Spawns a background task that periodically sweeps expired entries.
///
/// The task holds only a weak reference, so it ends on its own once the
/// namespace is dropped or torn down. Teardown also aborts it directly.
///
/// # Arguments
/// * `namespace` - Weak reference to the namespace to sweep
/// * `interval` - Time between sweep passes
///
/// # Example
/// ```ignore
/// let handle = spawn_sweeper_task(Arc::downgrade(&ns), ns.config().sweep_interval());
/// // Later, during teardown:
/// handle.abort();
/// ```
pub fn spawn_sweeper_task(namespace: Weak<Namespace>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Some(ns) = namespace.upgrade() {
            info!(
                namespace = %ns.name(),
                "Starting expiry sweeper with interval of {:?}",
                interval
            );
        }

        loop {
            tokio::time::sleep(interval).await;

            let Some(ns) = namespace.upgrade() else {
                break;
            };

            // Holds the namespace lock for the duration of one pass
            let removed = match ns.sweep().await {
                Ok(removed) => removed,
                Err(_) => break,
            };

            if removed > 0 {
                info!(namespace = %ns.name(), "Expiry sweep: removed {} expired entries", removed);
            } else {
                debug!(namespace = %ns.name(), "Expiry sweep: no expired entries found");
            }
        }

        debug!("Expiry sweeper stopped");
    })
}
