// ABOUTME: Error types for workflow definition parsing and validation
// ABOUTME: Defines specific error types for parser module operations

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParserError {
    #[error("Failed to read definition file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse definition JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid definition format: {0}")]
    InvalidFormat(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

#[derive(Error, Debug, Clone)]
pub enum ValidationError {
    #[error("Definition has no node with the entry ID '{entry}'")]
    MissingStartNode { entry: String },

    #[error("Entry node '{entry}' must be of type start, found {found}")]
    WrongStartNodeType { entry: String, found: String },

    #[error("Duplicate node ID: {node}")]
    DuplicateNode { node: String },

    #[error("Node '{node}' transitions to unknown node '{target}'")]
    DanglingTransition { node: String, target: String },

    #[error("Gateway node '{node}' has no conditions")]
    EmptyGateway { node: String },

    #[error("Script node '{node}' has no script code")]
    MissingScript { node: String },

    #[error("Script node '{node}' carries invalid base64: {reason}")]
    InvalidScriptEncoding { node: String, reason: String },

    #[error("Node '{node}' of type {node_type} has no next transition")]
    MissingTransition { node: String, node_type: String },

    #[error("Node '{node}' has unparseable timeout duration '{duration}': {reason}")]
    InvalidDuration {
        node: String,
        duration: String,
        reason: String,
    },

    #[error("Form node '{node}' has a field with an empty name")]
    UnnamedFormField { node: String },
}

pub type Result<T> = std::result::Result<T, ParserError>;
