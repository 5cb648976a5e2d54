// ABOUTME: Error types for the workflow execution engine
// ABOUTME: Defines dispatch, gateway, form, and condition evaluation failures

use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Definition error: {0}")]
    Parser(#[from] crate::parser::ParserError),

    #[error("Storage error: {0}")]
    Store(#[from] crate::persistence::StoreError),

    #[error("Script error: {0}")]
    Script(#[from] crate::script::ScriptError),

    #[error("Context serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Workflow definition not found: {workflow_id}")]
    DefinitionNotFound { workflow_id: String },

    #[error("Workflow definition '{workflow_id}' is invalid: {details}")]
    InvalidDefinition { workflow_id: String, details: String },

    #[error("Workflow '{workflow_id}' has no start node")]
    MissingStartNode { workflow_id: String },

    #[error("Node '{node_id}' not found in workflow '{workflow_id}'")]
    NodeNotFound {
        workflow_id: String,
        node_id: String,
    },

    #[error("Node '{node_id}' has no next transition")]
    MissingTransition { node_id: String },

    #[error("Script node '{node_id}' has no script code")]
    MissingScript { node_id: String },

    #[error("No matching gateway condition on node '{node_id}' for instance {instance_id}")]
    NoMatchingBranch {
        node_id: String,
        instance_id: String,
    },

    #[error("Instance {instance_id} is not at a form node (current node '{node_id}')")]
    NotAtFormNode {
        instance_id: String,
        node_id: String,
    },

    #[error("Form validation failed: {errors:?}")]
    FormValidation { errors: HashMap<String, String> },
}

impl EngineError {
    /// True when an advancement lost the head compare-and-set race.
    pub fn is_stale_head(&self) -> bool {
        matches!(self, EngineError::Store(e) if e.is_stale_head())
    }
}

/// Errors from evaluating the built-in comparison grammar. These are
/// reported, never fatal: the containing gateway treats the branch as
/// unmatched and keeps scanning.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConditionError {
    #[error("empty condition expression")]
    Empty,

    #[error("no comparison operator in '{expr}'")]
    MissingOperator { expr: String },

    #[error("variable '{path}' not found in context")]
    UnknownVariable { path: String },

    #[error("cannot compare numeric '{path}' with non-numeric literal '{literal}'")]
    TypeMismatch { path: String, literal: String },

    #[error("unsupported context value type '{type_name}' for '{path}'")]
    UnsupportedType { path: String, type_name: String },
}

pub type Result<T> = std::result::Result<T, EngineError>;
