// ABOUTME: Workflow execution engine module for the flowline engine
// ABOUTME: Node dispatch, gateway resolution, signals, timeouts, and the definition store

pub mod condition;
pub mod context;
pub mod definitions;
pub mod error;
pub mod executor;
pub mod forms;
pub mod gateway;
pub mod signals;
pub mod timeout;

pub use context::Context;
pub use definitions::DefinitionStore;
pub use error::{ConditionError, EngineError, Result};
pub use executor::{InstanceStatus, WorkflowEngine};
pub use gateway::GatewayDecision;
