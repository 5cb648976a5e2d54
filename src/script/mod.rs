// ABOUTME: Script sandbox module for the flowline engine
// ABOUTME: Evaluates user scripts and boolean predicates in isolated interpreters

pub mod error;
pub mod sandbox;

pub use error::{Result, ScriptError};
pub use sandbox::ScriptSandbox;
