// ABOUTME: Error types for sandboxed script evaluation
// ABOUTME: Covers decoding, syntax, runtime, budget, and result-shape failures

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScriptError {
    #[error("Failed to decode base64 script: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("Script is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("Script syntax error: {0}")]
    Syntax(String),

    #[error("Script runtime error: {0}")]
    Runtime(String),

    #[error("Script exceeded its execution budget of {budget:?}")]
    BudgetExceeded { budget: Duration },

    #[error("Predicate did not return a boolean, found {found}")]
    NotBoolean { found: String },

    #[error("Failed to bind context into the script scope: {0}")]
    ContextBinding(String),
}

pub type Result<T> = std::result::Result<T, ScriptError>;
