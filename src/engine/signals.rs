// ABOUTME: Signal registry: broadcast delivery that wakes paused instances
// ABOUTME: The waiting-signal column is the source of truth; wakes are CAS-guarded

use futures::future::join_all;
use std::collections::VecDeque;
use tracing::{debug, error, info};

use super::error::Result;
use super::executor::{AdvanceMode, WorkItem, WorkflowEngine};

impl WorkflowEngine {
    /// Broadcast a signal: every instance currently waiting for it is woken
    /// and driven forward. Emits with no listeners are dropped silently.
    /// Delivery is at-least-once; a duplicate emit finds the waiting set
    /// empty and does nothing. Returns the number of instances woken.
    pub async fn emit_signal(&self, signal: &str) -> Result<usize> {
        info!("Signal '{}' emitted, resuming waiting instances", signal);

        let woken = self.wake_waiting(signal).await?;
        if woken.is_empty() {
            debug!("No instances waiting for signal '{}'", signal);
            return Ok(0);
        }

        let count = woken.len();
        let queue: VecDeque<WorkItem> = woken.into_iter().map(WorkItem::Execute).collect();
        self.drain(queue).await;

        Ok(count)
    }

    /// Clear the waiting-signal field of every listener through an
    /// advancement record, without executing anything yet. Wakes run
    /// concurrently; each is settled by the head CAS. Returns the instances
    /// that were actually transitioned out of the waiting set.
    pub(crate) async fn wake_waiting(&self, signal: &str) -> Result<Vec<String>> {
        let listeners = self
            .store()
            .get_instances_waiting_for_signal(signal)
            .await?;

        let wakes = listeners.into_iter().map(|instance_id| {
            let engine = self.clone();
            async move {
                let cleared = engine.clear_waiting(&instance_id, signal).await;
                (instance_id, cleared)
            }
        });
        let results = join_all(wakes).await;

        let mut woken = Vec::with_capacity(results.len());
        for (instance_id, cleared) in results {
            match cleared {
                Ok(true) => {
                    info!(
                        "Resuming instance {} waiting for signal '{}'",
                        instance_id, signal
                    );
                    woken.push(instance_id);
                }
                Ok(false) => debug!(
                    "Instance {} no longer waiting, skipping wake for '{}'",
                    instance_id, signal
                ),
                Err(e) => error!(
                    "Failed to wake instance {} for signal '{}': {}",
                    instance_id, signal, e
                ),
            }
        }

        Ok(woken)
    }

    /// Append a wake record for one instance: same node, waiting signal
    /// cleared. The instance must still be waiting for this exact signal;
    /// losing the head CAS means another waker or a timeout got there
    /// first, which is not an error.
    async fn clear_waiting(&self, instance_id: &str, signal: &str) -> Result<bool> {
        let loaded = self.load(instance_id).await?;
        if loaded.record.waiting_signal.as_deref() != Some(signal) {
            return Ok(false);
        }

        let node_id = loaded.execution.node_id.clone();
        match self
            .advance(&loaded, &node_id, &loaded.ctx, AdvanceMode::Wake)
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.is_stale_head() => Ok(false),
            Err(e) => Err(e),
        }
    }
}
