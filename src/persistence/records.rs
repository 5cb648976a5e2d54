// ABOUTME: Typed row records returned by the persistence layer
// ABOUTME: Instance head, append-only node execution, definition, and deadline rows

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefinitionRow {
    pub id: String,
    pub name: String,
    pub meta_json: Option<String>,
    pub raw_json: String,
}

/// The mutable head record of a running instance. `current_node_execution_id`
/// always references the newest row of the instance's execution log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub id: String,
    pub workflow_id: String,
    pub current_node_execution_id: String,
    pub ctx_json: String,
    pub waiting_signal: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InstanceRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at < now).unwrap_or(false)
    }
}

/// One immutable entry of an instance into a node, with the context
/// snapshot taken on entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeExecutionRecord {
    pub id: String,
    pub instance_id: String,
    pub node_id: String,
    pub ctx_json: String,
    pub waiting_signal: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A pending timeout deadline, keyed by the node execution that armed it.
#[derive(Debug, Clone, PartialEq)]
pub struct ArmedDeadline {
    pub instance_id: String,
    pub execution_id: String,
    pub expires_at: DateTime<Utc>,
}
