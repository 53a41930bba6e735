//! Auto-Tuning Task
//!
//! Background task that periodically adjusts one namespace's size budget
//! from its observed hit rate.

use std::sync::Weak;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::{Namespace, TuneOutcome};

/// Spawns a background task that runs one tuning step per interval.
///
/// Runs independently of the expiry sweeper; each step holds the namespace
/// lock while it reads the stats and applies the new budget.
pub fn spawn_tuning_task(namespace: Weak<Namespace>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;

            let Some(ns) = namespace.upgrade() else {
                break;
            };

            match ns.tune().await {
                Ok(TuneOutcome::Unchanged { budget }) => {
                    debug!(namespace = %ns.name(), budget, "Auto-tune: budget unchanged");
                }
                Ok(outcome) => {
                    let stats = ns.stats().await;
                    info!(
                        namespace = %ns.name(),
                        hit_rate = stats.hit_rate(),
                        miss_rate = stats.miss_rate(),
                        budget = outcome.budget(),
                        "Auto-tune applied"
                    );
                }
                Err(_) => break,
            }
        }

        debug!("Auto-tuning task stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{Codec, Transformer, MIN_BUDGET};
    use crate::config::NamespaceConfig;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_tuning_task_shrinks_on_low_hit_rate() {
        let (transformer, _handle) = Transformer::spawn(Codec::new(None, 3, 64));
        let budget = 4 * MIN_BUDGET;
        let ns = Namespace::new(
            NamespaceConfig::new("tune").with_max_size(budget),
            transformer,
        );

        // Ten cache-only misses on an empty namespace
        for i in 0..10 {
            let missing: Option<String> = crate::cache::execute(
                &ns,
                &format!("k{}", i),
                None::<fn() -> std::future::Ready<anyhow::Result<String>>>,
            )
            .await
            .unwrap();
            assert!(missing.is_none());
        }

        let handle = spawn_tuning_task(Arc::downgrade(&ns), Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(70)).await;
        handle.abort();

        assert!(ns.stats().await.max_size < budget);
    }
}
