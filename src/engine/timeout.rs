// ABOUTME: Per-node timeout handling: deadline computation, timer arming, and the tick driver
// ABOUTME: Deadlines are bound to node-execution IDs; the head CAS settles every race

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use tracing::{debug, error, info};

use super::error::Result;
use super::executor::{WorkItem, WorkflowEngine};
use crate::parser::{Node, TimeoutConfig};

/// The absolute deadline a node's timeout configuration arms on entry, if any.
pub(crate) fn deadline_for(node: &Node) -> Result<Option<DateTime<Utc>>> {
    let Some(config) = &node.timeout else {
        return Ok(None);
    };
    let duration = config.duration()?;
    Ok(Some(
        Utc::now() + chrono::Duration::milliseconds(duration.as_millis() as i64),
    ))
}

impl WorkflowEngine {
    /// Arm an in-process timer for the node execution the instance just
    /// entered. The timer carries the execution ID as its cookie; firing
    /// against a head that has moved on is a silent no-op.
    pub(crate) fn arm_node_timeout(
        &self,
        instance_id: &str,
        execution_id: &str,
        config: &TimeoutConfig,
    ) {
        let duration = match config.duration() {
            Ok(duration) => duration,
            Err(e) => {
                error!(
                    "Instance {}: unparseable timeout duration '{}': {}",
                    instance_id, config.duration, e
                );
                return;
            }
        };

        debug!(
            "Arming {} timeout for instance {} (execution {})",
            config.duration, instance_id, execution_id
        );

        let engine = self.clone();
        let instance_id = instance_id.to_string();
        let execution_id = execution_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            if let Err(e) = engine.fire_deadline(&instance_id, &execution_id).await {
                error!(
                    "Timeout firing failed for instance {}: {}",
                    instance_id, e
                );
            }
        });
    }

    /// Fire one deadline: if the instance is still at the armed node
    /// execution, transition it to `timeout.next` (clearing any signal
    /// wait, context unchanged) and resume execution. Returns whether the
    /// transition happened.
    pub(crate) async fn fire_deadline(
        &self,
        instance_id: &str,
        execution_id: &str,
    ) -> Result<bool> {
        let loaded = self.load(instance_id).await?;

        if loaded.record.current_node_execution_id != execution_id {
            debug!(
                "Discarding timeout for instance {}: execution {} is no longer current",
                instance_id, execution_id
            );
            return Ok(false);
        }

        let node = loaded.node()?;
        let Some(config) = node.timeout.clone() else {
            debug!(
                "Instance {} node {} no longer defines a timeout",
                instance_id, node.id
            );
            return Ok(false);
        };

        match self
            .advance(
                &loaded,
                &config.next,
                &loaded.ctx,
                super::executor::AdvanceMode::Enter,
            )
            .await
        {
            Ok((_, end_emit)) => {
                info!(
                    "Instance {} timed out at node {}, transitioned to {}",
                    instance_id, loaded.execution.node_id, config.next
                );
                let mut queue: VecDeque<WorkItem> = VecDeque::new();
                queue.push_back(WorkItem::Execute(instance_id.to_string()));
                if let Some(signal) = end_emit {
                    queue.push_back(WorkItem::Emit(signal));
                }
                self.drain(queue).await;
                Ok(true)
            }
            Err(e) if e.is_stale_head() => {
                debug!(
                    "Instance {} advanced concurrently, timeout for execution {} discarded",
                    instance_id, execution_id
                );
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Advance every instance whose deadline has passed, FIFO by expiry.
    /// Returns how many transitions fired.
    pub async fn tick(&self) -> Result<usize> {
        let expired = self.store().get_expired_instances(Utc::now()).await?;
        let mut fired = 0;

        for instance_id in expired {
            let record = match self.store().get_instance(&instance_id).await {
                Ok(record) => record,
                Err(e) => {
                    error!("Skipping expired instance {}: {}", instance_id, e);
                    continue;
                }
            };
            match self
                .fire_deadline(&instance_id, &record.current_node_execution_id)
                .await
            {
                Ok(true) => fired += 1,
                Ok(false) => {}
                Err(e) => error!("Failed to expire instance {}: {}", instance_id, e),
            }
        }

        Ok(fired)
    }

    /// Re-arm timers after a restart from the persisted deadlines. Past-due
    /// deadlines fire immediately, FIFO; future ones get fresh timers.
    pub async fn resume_timeouts(&self) -> Result<usize> {
        let armed = self.store().get_armed_deadlines().await?;
        let now = Utc::now();
        let mut resumed = 0;

        for deadline in armed {
            if deadline.expires_at <= now {
                match self
                    .fire_deadline(&deadline.instance_id, &deadline.execution_id)
                    .await
                {
                    Ok(_) => resumed += 1,
                    Err(e) => error!(
                        "Failed to fire overdue deadline for instance {}: {}",
                        deadline.instance_id, e
                    ),
                }
            } else {
                let remaining = (deadline.expires_at - now)
                    .to_std()
                    .unwrap_or_default();
                let engine = self.clone();
                let instance_id = deadline.instance_id.clone();
                let execution_id = deadline.execution_id.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(remaining).await;
                    if let Err(e) = engine.fire_deadline(&instance_id, &execution_id).await {
                        error!(
                            "Re-armed timeout failed for instance {}: {}",
                            instance_id, e
                        );
                    }
                });
                resumed += 1;
            }
        }

        Ok(resumed)
    }
}
