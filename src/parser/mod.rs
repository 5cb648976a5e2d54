// ABOUTME: Workflow definition parsing module for the flowline engine
// ABOUTME: Defines the definition data model, JSON loading, and structural validation

pub mod definition;
pub mod error;
pub mod validation;

pub use definition::{
    Definition, EndConfig, FormField, GatewayBranch, Meta, Node, NodeType, ScriptConfig, SignalConfig,
    TimeoutConfig, START_NODE_ID,
};
pub use error::{ParserError, Result, ValidationError};
pub use validation::{DefinitionValidator, ValidationReport};
