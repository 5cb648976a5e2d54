// ABOUTME: Main library module for the flowline workflow engine
// ABOUTME: Exports all core modules and provides the public API

pub mod cli;
pub mod engine;
pub mod parser;
pub mod persistence;
pub mod script;

// Re-export commonly used types
pub use cli::{App, Args, Config};
pub use engine::{DefinitionStore, InstanceStatus, WorkflowEngine};
pub use parser::{Definition, DefinitionValidator, Node, NodeType};
pub use persistence::{SqliteStore, Store};
pub use script::ScriptSandbox;

// Error handling
pub type Result<T> = anyhow::Result<T>;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
