// ABOUTME: Gateway branch resolution for the execution engine
// ABOUTME: Ordered scan of conditions, first satisfied branch wins, surfaces signal throws

use tracing::{debug, warn};

use super::condition;
use super::context::Context;
use super::error::{EngineError, Result};
use crate::parser::Node;
use crate::script::ScriptSandbox;

/// The branch a gateway picked: where to go next and, optionally, a signal
/// to throw once the transition is durably recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayDecision {
    pub next: String,
    pub throw_signal: Option<String>,
}

/// Scan the gateway's conditions in order and pick the first satisfied
/// branch. A `when` expression uses the comparison grammar; a `script`
/// predicate runs in the sandbox. Evaluation errors fail only the branch
/// under scan. An `else` branch matches unconditionally.
pub fn resolve(
    instance_id: &str,
    node: &Node,
    ctx: &Context,
    sandbox: &ScriptSandbox,
) -> Result<GatewayDecision> {
    for branch in &node.conditions {
        let matched = if let Some(when) = &branch.when {
            match condition::evaluate(when, ctx) {
                Ok(matched) => matched,
                Err(e) => {
                    warn!(
                        "Gateway '{}' condition '{}' failed for instance {}: {}",
                        node.id, when, instance_id, e
                    );
                    false
                }
            }
        } else if let Some(script) = &branch.script {
            match sandbox.eval_bool(instance_id, &script.code, ctx) {
                Ok(matched) => matched,
                Err(e) => {
                    warn!(
                        "Gateway '{}' script predicate failed for instance {}: {}",
                        node.id, instance_id, e
                    );
                    false
                }
            }
        } else {
            branch.otherwise
        };

        if matched {
            debug!(
                "Gateway '{}' resolved to '{}' for instance {}",
                node.id, branch.next, instance_id
            );
            return Ok(GatewayDecision {
                next: branch.next.clone(),
                throw_signal: branch.signal.as_ref().and_then(|s| s.throw.clone()),
            });
        }
    }

    Err(EngineError::NoMatchingBranch {
        node_id: node.id.clone(),
        instance_id: instance_id.to_string(),
    })
}
