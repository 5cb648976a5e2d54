// ABOUTME: The workflow execution engine: instance lifecycle and node dispatch
// ABOUTME: Loads instance state, runs one node at a time, and advances atomically

use chrono::{DateTime, Utc};
use handlebars::Handlebars;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::context::{self, Context};
use super::definitions::DefinitionStore;
use super::error::{EngineError, Result};
use super::forms;
use super::gateway;
use super::timeout;
use crate::parser::{Definition, Node, NodeType};
use crate::persistence::{InstanceRecord, NodeExecutionRecord, Store};
use crate::script::ScriptSandbox;

/// Context key seeded with the instance's own ID at creation.
const INSTANCE_ID_KEY: &str = "instance_id";

/// The public status view of a running instance.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceStatus {
    pub instance_id: String,
    pub workflow_id: String,
    pub node_id: String,
    pub node_type: NodeType,
    pub context: Context,
    pub waiting_signal: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Terminal page rendered from the end node's HTML template, when the
    /// instance has reached an end node that defines one.
    pub end_html: Option<String>,
}

impl InstanceStatus {
    pub fn is_terminal(&self) -> bool {
        self.node_type == NodeType::End
    }
}

/// A fully resolved view of one instance: head record, current log row,
/// definition, and the deserialized context.
pub(crate) struct LoadedInstance {
    pub record: InstanceRecord,
    pub execution: NodeExecutionRecord,
    pub definition: Arc<Definition>,
    pub ctx: Context,
}

impl LoadedInstance {
    pub fn node(&self) -> Result<&Node> {
        self.definition
            .node(&self.execution.node_id)
            .ok_or_else(|| EngineError::NodeNotFound {
                workflow_id: self.record.workflow_id.clone(),
                node_id: self.execution.node_id.clone(),
            })
    }
}

/// How an advancement treats the target node's `signal.catch`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum AdvanceMode {
    /// Normal entry: the target's catch arms a wait.
    Enter,
    /// Signal delivery: re-enter the same node with the wait cleared.
    Wake,
}

/// Deferred work produced while driving an instance: further instances to
/// execute and signals to broadcast. Draining a queue instead of recursing
/// keeps signal cascades bounded.
pub(crate) enum WorkItem {
    Execute(String),
    Emit(String),
}

#[derive(Clone)]
pub struct WorkflowEngine {
    definitions: DefinitionStore,
    store: Arc<dyn Store>,
    sandbox: ScriptSandbox,
}

impl WorkflowEngine {
    pub fn new(store: Arc<dyn Store>, workflow_dir: Option<PathBuf>, script_budget: Duration) -> Self {
        Self {
            definitions: DefinitionStore::new(Arc::clone(&store), workflow_dir),
            store,
            sandbox: ScriptSandbox::new(script_budget),
        }
    }

    pub fn definitions(&self) -> &DefinitionStore {
        &self.definitions
    }

    pub(crate) fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Create a new instance of a workflow and start executing it, unless
    /// the start node catches a signal.
    #[instrument(skip(self))]
    pub async fn create_instance(&self, workflow_id: &str) -> Result<InstanceStatus> {
        let definition = self.definitions.get(workflow_id).await?;
        let start = definition
            .start_node()
            .ok_or_else(|| EngineError::MissingStartNode {
                workflow_id: workflow_id.to_string(),
            })?;

        let instance_id = Uuid::new_v4().to_string();
        let mut ctx = Context::new();
        ctx.insert(
            INSTANCE_ID_KEY.to_string(),
            serde_json::Value::String(instance_id.clone()),
        );

        let waiting = start.catch_signal();
        let expires = timeout::deadline_for(start)?;

        self.store
            .save_new_instance(
                &instance_id,
                workflow_id,
                &start.id,
                &context::to_json(&ctx)?,
                waiting,
                expires,
            )
            .await?;

        match waiting {
            Some(signal) => info!(
                "Instance {} created for workflow {}, waiting for signal '{}'",
                instance_id, workflow_id, signal
            ),
            None => {
                info!(
                    "Instance {} created for workflow {}, starting execution",
                    instance_id, workflow_id
                );
                if let Err(e) = self.execute_next(&instance_id).await {
                    error!("Initial execution of instance {} failed: {}", instance_id, e);
                }
            }
        }

        self.get_status(&instance_id).await
    }

    /// Advance an instance as far as it can go: until it reaches an end
    /// node, parks at a form, enters a signal wait, or fails. The single
    /// entry point for driving progress.
    pub async fn execute_next(&self, instance_id: &str) -> Result<()> {
        let emitted = self.run_instance(instance_id).await?;
        self.drain(emitted.into_iter().map(WorkItem::Emit).collect())
            .await;
        Ok(())
    }

    /// Submit form data for an instance parked at a form node, then resume
    /// execution.
    #[instrument(skip(self, form_data))]
    pub async fn submit_form(
        &self,
        instance_id: &str,
        form_data: HashMap<String, String>,
    ) -> Result<InstanceStatus> {
        let loaded = self.load(instance_id).await?;
        let node = loaded.node()?;

        if node.node_type != NodeType::Form {
            return Err(EngineError::NotAtFormNode {
                instance_id: instance_id.to_string(),
                node_id: node.id.clone(),
            });
        }

        let errors = forms::validate_form_input(&node.fields, &form_data);
        if !errors.is_empty() {
            return Err(EngineError::FormValidation { errors });
        }

        let next = node
            .next
            .clone()
            .ok_or_else(|| EngineError::MissingTransition {
                node_id: node.id.clone(),
            })?;

        let mut ctx = loaded.ctx.clone();
        forms::merge_form_input(&mut ctx, &node.fields, &form_data);

        let (_, end_emit) = self
            .advance(&loaded, &next, &ctx, AdvanceMode::Enter)
            .await?;
        info!(
            "Instance {} advanced to node {} after form submission",
            instance_id, next
        );

        let mut queue: VecDeque<WorkItem> = VecDeque::new();
        queue.push_back(WorkItem::Execute(instance_id.to_string()));
        if let Some(signal) = end_emit {
            queue.push_back(WorkItem::Emit(signal));
        }
        self.drain(queue).await;

        self.get_status(instance_id).await
    }

    /// The current status of an instance, including the rendered terminal
    /// page when it sits at an end node with an HTML template.
    pub async fn get_status(&self, instance_id: &str) -> Result<InstanceStatus> {
        let loaded = self.load(instance_id).await?;
        let node = loaded.node()?;

        let end_html = match (&node.node_type, &node.end) {
            (NodeType::End, Some(end)) => end
                .html
                .as_ref()
                .and_then(|template| self.render_end_page(instance_id, template, &loaded.ctx)),
            _ => None,
        };

        Ok(InstanceStatus {
            instance_id: loaded.record.id.clone(),
            workflow_id: loaded.record.workflow_id.clone(),
            node_id: loaded.execution.node_id.clone(),
            node_type: node.node_type,
            context: loaded.ctx,
            waiting_signal: loaded.record.waiting_signal.clone(),
            expires_at: loaded.record.expires_at,
            created_at: loaded.record.created_at,
            updated_at: loaded.record.updated_at,
            end_html,
        })
    }

    fn render_end_page(&self, instance_id: &str, template: &str, ctx: &Context) -> Option<String> {
        let handlebars = Handlebars::new();
        match handlebars.render_template(template, ctx) {
            Ok(html) => Some(html),
            Err(e) => {
                warn!(
                    "Failed to render end page for instance {}: {}",
                    instance_id, e
                );
                None
            }
        }
    }

    /// The append-only execution log of one instance, oldest first.
    pub async fn get_history(&self, instance_id: &str) -> Result<Vec<NodeExecutionRecord>> {
        Ok(self.store.get_node_executions(instance_id).await?)
    }

    pub(crate) async fn load(&self, instance_id: &str) -> Result<LoadedInstance> {
        let record = self.store.get_instance(instance_id).await?;
        let execution = self
            .store
            .get_node_execution(&record.current_node_execution_id)
            .await?;
        let definition = self.definitions.get(&record.workflow_id).await?;
        let ctx = context::from_json(&record.ctx_json)?;

        Ok(LoadedInstance {
            record,
            execution,
            definition,
            ctx,
        })
    }

    /// Dispatch the instance's current node and keep advancing until it
    /// parks. Returns the signals that must be broadcast now that their
    /// originating transitions are durable.
    pub(crate) async fn run_instance(&self, instance_id: &str) -> Result<Vec<String>> {
        let mut emitted = Vec::new();

        loop {
            let loaded = self.load(instance_id).await?;
            let node = loaded.node()?.clone();

            if let Some(signal) = &loaded.record.waiting_signal {
                debug!(
                    "Instance {} is waiting for signal '{}', not executing",
                    instance_id, signal
                );
                break;
            }
            if loaded.record.is_expired(Utc::now()) {
                debug!(
                    "Instance {} has a passed deadline, leaving it to the timeout driver",
                    instance_id
                );
                break;
            }

            if let Some(timeout) = &node.timeout {
                self.arm_node_timeout(
                    instance_id,
                    &loaded.record.current_node_execution_id,
                    timeout,
                );
            }

            debug!(
                "Executing node {} (type {}) for instance {}",
                node.id, node.node_type, instance_id
            );

            match node.node_type {
                NodeType::Start => {
                    let next = node
                        .next
                        .as_deref()
                        .ok_or_else(|| EngineError::MissingTransition {
                            node_id: node.id.clone(),
                        })?;
                    let (_, end_emit) = self
                        .advance(&loaded, next, &loaded.ctx, AdvanceMode::Enter)
                        .await?;
                    emitted.extend(end_emit);
                }
                NodeType::Form => {
                    debug!(
                        "Instance {} parked at form node {}, awaiting input",
                        instance_id, node.id
                    );
                    break;
                }
                NodeType::Script => {
                    let script = node
                        .script
                        .as_ref()
                        .ok_or_else(|| EngineError::MissingScript {
                            node_id: node.id.clone(),
                        })?;
                    let next = node
                        .next
                        .as_deref()
                        .ok_or_else(|| EngineError::MissingTransition {
                            node_id: node.id.clone(),
                        })?;

                    let updated = self.sandbox.run_script(instance_id, &script.code, &loaded.ctx)?;
                    let (_, end_emit) = self
                        .advance(&loaded, next, &updated, AdvanceMode::Enter)
                        .await?;
                    emitted.extend(end_emit);
                }
                NodeType::Gateway => {
                    let decision =
                        gateway::resolve(instance_id, &node, &loaded.ctx, &self.sandbox)?;
                    let (_, end_emit) = self
                        .advance(&loaded, &decision.next, &loaded.ctx, AdvanceMode::Enter)
                        .await?;
                    // the throw is only broadcast now that the transition
                    // is durable
                    emitted.extend(decision.throw_signal);
                    emitted.extend(end_emit);
                }
                NodeType::End => {
                    debug!(
                        "Instance {} is terminal at end node {}",
                        instance_id, node.id
                    );
                    break;
                }
            }
        }

        Ok(emitted)
    }

    /// The atomic advancement primitive: append a node-execution row with
    /// the context snapshot and repoint the head, in one transaction guarded
    /// by the current execution ID. Returns the new execution ID and, when
    /// the target is an end node, the signal it emits on entry.
    pub(crate) async fn advance(
        &self,
        loaded: &LoadedInstance,
        target_id: &str,
        ctx: &Context,
        mode: AdvanceMode,
    ) -> Result<(String, Option<String>)> {
        let target = loaded
            .definition
            .node(target_id)
            .ok_or_else(|| EngineError::NodeNotFound {
                workflow_id: loaded.record.workflow_id.clone(),
                node_id: target_id.to_string(),
            })?;

        let waiting = match (mode, target.node_type) {
            (AdvanceMode::Wake, _) | (_, NodeType::End) => None,
            (AdvanceMode::Enter, _) => target.catch_signal(),
        };
        let expires = timeout::deadline_for(target)?;

        let execution_id = self
            .store
            .append_node_execution_and_update_head(
                &loaded.record.id,
                &loaded.record.current_node_execution_id,
                target_id,
                &context::to_json(ctx)?,
                waiting,
                expires,
            )
            .await?;

        info!(
            "Instance {} advanced: {} -> {}",
            loaded.record.id, loaded.execution.node_id, target_id
        );

        let end_emit = match target.node_type {
            NodeType::End => {
                info!(
                    "Instance {} completed at end node {}",
                    loaded.record.id, target_id
                );
                target.emit_signal().map(str::to_string)
            }
            _ => None,
        };

        Ok((execution_id, end_emit))
    }

    /// Work off deferred executions and signal broadcasts until quiescent.
    /// Failures of individual items are logged; the cascade continues.
    pub(crate) async fn drain(&self, mut queue: VecDeque<WorkItem>) {
        while let Some(item) = queue.pop_front() {
            match item {
                WorkItem::Execute(instance_id) => match self.run_instance(&instance_id).await {
                    Ok(signals) => queue.extend(signals.into_iter().map(WorkItem::Emit)),
                    Err(e) => error!("Error executing instance {}: {}", instance_id, e),
                },
                WorkItem::Emit(signal) => match self.wake_waiting(&signal).await {
                    Ok(woken) => queue.extend(woken.into_iter().map(WorkItem::Execute)),
                    Err(e) => error!("Error delivering signal '{}': {}", signal, e),
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::SqliteStore;

    async fn engine_with(definition_json: &str) -> WorkflowEngine {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::in_memory().await.unwrap());
        let engine = WorkflowEngine::new(store, None, Duration::from_secs(2));
        engine.definitions().install(definition_json).await.unwrap();
        engine
    }

    #[tokio::test]
    async fn test_start_to_end_auto_run() {
        let engine = engine_with(
            r#"{"id": "wf", "name": "wf", "nodes": [
                {"id": "start_node", "type": "start", "next": "done"},
                {"id": "done", "type": "end"}
            ]}"#,
        )
        .await;

        let status = engine.create_instance("wf").await.unwrap();
        assert!(status.is_terminal());
        assert_eq!(status.node_id, "done");
        assert_eq!(
            status.context.get(INSTANCE_ID_KEY).unwrap(),
            &serde_json::Value::String(status.instance_id.clone())
        );
    }

    #[tokio::test]
    async fn test_unknown_workflow_rejected() {
        let engine = engine_with(
            r#"{"id": "wf", "name": "wf", "nodes": [
                {"id": "start_node", "type": "start", "next": "done"},
                {"id": "done", "type": "end"}
            ]}"#,
        )
        .await;

        let err = engine.create_instance("ghost").await.unwrap_err();
        assert!(matches!(err, EngineError::DefinitionNotFound { .. }));
    }

    #[tokio::test]
    async fn test_submit_on_non_form_node_errors() {
        let engine = engine_with(
            r#"{"id": "wf", "name": "wf", "nodes": [
                {"id": "start_node", "type": "start", "next": "done"},
                {"id": "done", "type": "end"}
            ]}"#,
        )
        .await;

        let status = engine.create_instance("wf").await.unwrap();
        let err = engine
            .submit_form(&status.instance_id, HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotAtFormNode { .. }));
    }

    #[tokio::test]
    async fn test_end_html_renders_context() {
        let engine = engine_with(
            r#"{"id": "wf", "name": "wf", "nodes": [
                {"id": "start_node", "type": "start", "next": "done"},
                {"id": "done", "type": "end",
                 "end": {"html": "<p>instance {{instance_id}}</p>"}}
            ]}"#,
        )
        .await;

        let status = engine.create_instance("wf").await.unwrap();
        let html = status.end_html.unwrap();
        assert!(html.contains(&status.instance_id));
    }
}
