// ABOUTME: Persistence module for the flowline engine
// ABOUTME: Defines the Store trait consumed by the core and its SQLite implementation

pub mod error;
pub mod records;
pub mod sqlite;

pub use error::{Result, StoreError};
pub use records::{ArmedDeadline, DefinitionRow, InstanceRecord, NodeExecutionRecord};
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// The small typed interface the execution engine needs from durable
/// storage. Node-execution rows are append-only; the instance head is the
/// only mutable record, and every head update is guarded by the expected
/// current execution ID (optimistic compare-and-set).
#[async_trait]
pub trait Store: Send + Sync {
    /// Upsert a raw workflow definition document.
    async fn save_definition(
        &self,
        id: &str,
        name: &str,
        meta_json: Option<&str>,
        raw_json: &str,
    ) -> Result<()>;

    async fn get_definition(&self, id: &str) -> Result<Option<DefinitionRow>>;

    /// Create the instance head and its initial node-execution row in one
    /// transaction. Returns the initial node-execution ID.
    async fn save_new_instance(
        &self,
        instance_id: &str,
        workflow_id: &str,
        initial_node_id: &str,
        ctx_json: &str,
        waiting_signal: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<String>;

    /// Append a node-execution row and repoint the instance head at it, in
    /// one transaction. The head update only succeeds while
    /// `current_node_execution_id` still equals `expected_execution_id`;
    /// otherwise the call fails with [`StoreError::StaleHead`] and nothing
    /// is written.
    async fn append_node_execution_and_update_head(
        &self,
        instance_id: &str,
        expected_execution_id: &str,
        new_node_id: &str,
        ctx_json: &str,
        waiting_signal: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<String>;

    async fn get_instance(&self, instance_id: &str) -> Result<InstanceRecord>;

    async fn get_node_execution(&self, execution_id: &str) -> Result<NodeExecutionRecord>;

    /// All node executions of one instance, oldest first.
    async fn get_node_executions(&self, instance_id: &str) -> Result<Vec<NodeExecutionRecord>>;

    async fn get_instances_waiting_for_signal(&self, signal: &str) -> Result<Vec<String>>;

    /// Instances whose deadline has passed, FIFO by `expires_at`.
    async fn get_expired_instances(&self, now: DateTime<Utc>) -> Result<Vec<String>>;

    /// Every instance with an armed deadline, FIFO by `expires_at`. Used to
    /// re-arm timers after a restart.
    async fn get_armed_deadlines(&self) -> Result<Vec<ArmedDeadline>>;
}
