// ABOUTME: Error types for the persistence layer
// ABOUTME: Defines storage failures including the compare-and-set head conflict

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Workflow instance not found: {instance_id}")]
    InstanceNotFound { instance_id: String },

    #[error("Node execution not found: {execution_id}")]
    ExecutionNotFound { execution_id: String },

    #[error("Stale head for instance {instance_id}: another transition already committed")]
    StaleHead { instance_id: String },

    #[error("Invalid stored timestamp: {value}")]
    InvalidTimestamp { value: String },
}

impl StoreError {
    /// True when a head update lost the race against a concurrent
    /// transition out of the same node execution.
    pub fn is_stale_head(&self) -> bool {
        matches!(self, StoreError::StaleHead { .. })
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
