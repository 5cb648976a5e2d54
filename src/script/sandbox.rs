// ABOUTME: Isolated script evaluation over the instance context using rhai
// ABOUTME: Fresh interpreter per invocation, process_data binding, wall-clock budget

use base64::Engine as _;
use rhai::{Dynamic, Engine, EvalAltResult, Scope};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use super::error::{Result, ScriptError};
use crate::engine::context::Context;

/// Name the instance context is bound to inside every script.
const CONTEXT_BINDING: &str = "process_data";

/// Evaluates base64-encoded scripts in a fresh interpreter per invocation.
/// Scripts see the instance context as `process_data` and have no access to
/// the filesystem, the network, or state from other invocations.
#[derive(Debug, Clone)]
pub struct ScriptSandbox {
    budget: Duration,
}

impl ScriptSandbox {
    pub fn new(budget: Duration) -> Self {
        Self { budget }
    }

    /// Run a script for its side effects on `process_data` and return the
    /// updated context. A result that no longer reduces to an object map
    /// leaves the context unchanged.
    pub fn run_script(&self, instance_id: &str, code_b64: &str, ctx: &Context) -> Result<Context> {
        let code = decode(code_b64)?;
        let engine = self.build_engine(instance_id);
        let ast = engine
            .compile(&code)
            .map_err(|e| ScriptError::Syntax(e.to_string()))?;

        let mut scope = Scope::new();
        scope.push(CONTEXT_BINDING, bind_context(ctx)?);

        engine
            .run_ast_with_scope(&mut scope, &ast)
            .map_err(|e| self.map_eval_error(e))?;

        let result = match scope.get_value::<Dynamic>(CONTEXT_BINDING) {
            Some(value) => value,
            None => {
                warn!(
                    "Instance {}: script removed {}, keeping context unchanged",
                    instance_id, CONTEXT_BINDING
                );
                return Ok(ctx.clone());
            }
        };

        match rhai::serde::from_dynamic::<Context>(&result) {
            Ok(updated) => Ok(updated),
            Err(_) => {
                warn!(
                    "Instance {}: script left {} as {}, keeping context unchanged",
                    instance_id,
                    CONTEXT_BINDING,
                    result.type_name()
                );
                Ok(ctx.clone())
            }
        }
    }

    /// Evaluate a script as a boolean expression over the context.
    pub fn eval_bool(&self, instance_id: &str, code_b64: &str, ctx: &Context) -> Result<bool> {
        let code = decode(code_b64)?;
        let engine = self.build_engine(instance_id);
        let ast = engine
            .compile_expression(&code)
            .map_err(|e| ScriptError::Syntax(e.to_string()))?;

        let mut scope = Scope::new();
        scope.push(CONTEXT_BINDING, bind_context(ctx)?);

        let value = engine
            .eval_ast_with_scope::<Dynamic>(&mut scope, &ast)
            .map_err(|e| self.map_eval_error(e))?;

        value.as_bool().map_err(|type_name| ScriptError::NotBoolean {
            found: type_name.to_string(),
        })
    }

    fn build_engine(&self, instance_id: &str) -> Engine {
        let mut engine = Engine::new();

        let tag = instance_id.to_string();
        engine.on_print(move |message| info!("[script {}] {}", tag, message));
        let tag = instance_id.to_string();
        engine.on_debug(move |message, _source, pos| {
            info!("[script {}] debug @ {:?}: {}", tag, pos, message)
        });

        let deadline = Instant::now() + self.budget;
        engine.on_progress(move |_ops| {
            if Instant::now() >= deadline {
                Some(Dynamic::UNIT)
            } else {
                None
            }
        });

        engine
    }

    fn map_eval_error(&self, err: Box<EvalAltResult>) -> ScriptError {
        match *err {
            EvalAltResult::ErrorTerminated(..) => ScriptError::BudgetExceeded {
                budget: self.budget,
            },
            other => ScriptError::Runtime(other.to_string()),
        }
    }
}

impl Default for ScriptSandbox {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

fn decode(code_b64: &str) -> Result<String> {
    let bytes = base64::engine::general_purpose::STANDARD.decode(code_b64.trim())?;
    Ok(String::from_utf8(bytes)?)
}

fn bind_context(ctx: &Context) -> Result<Dynamic> {
    rhai::serde::to_dynamic(ctx).map_err(|e| ScriptError::ContextBinding(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn encode(script: &str) -> String {
        base64::engine::general_purpose::STANDARD.encode(script)
    }

    fn ctx_from(raw: &str) -> Context {
        crate::engine::context::from_json(raw).unwrap()
    }

    #[test]
    fn test_script_mutates_context() {
        let sandbox = ScriptSandbox::default();
        let ctx = ctx_from(r#"{"count": 1}"#);

        let updated = sandbox
            .run_script("inst", &encode("process_data.x = 42;"), &ctx)
            .unwrap();

        assert_eq!(updated.get("x"), Some(&json!(42)));
        assert_eq!(updated.get("count"), Some(&json!(1)));
    }

    #[test]
    fn test_script_reads_existing_values() {
        let sandbox = ScriptSandbox::default();
        let ctx = ctx_from(r#"{"a": 2, "b": 3}"#);

        let updated = sandbox
            .run_script(
                "inst",
                &encode("process_data.sum = process_data.a + process_data.b;"),
                &ctx,
            )
            .unwrap();

        assert_eq!(updated.get("sum"), Some(&json!(5)));
    }

    #[test]
    fn test_no_state_leaks_between_runs() {
        let sandbox = ScriptSandbox::default();
        let ctx = Context::new();

        sandbox
            .run_script("inst", &encode("let secret = 7; process_data.a = 1;"), &ctx)
            .unwrap();

        // A later run must not see `secret` from the previous interpreter.
        let err = sandbox
            .run_script("inst", &encode("process_data.b = secret;"), &ctx)
            .unwrap_err();
        assert!(matches!(err, ScriptError::Runtime(_)));
    }

    #[test]
    fn test_syntax_error_is_typed() {
        let sandbox = ScriptSandbox::default();
        let err = sandbox
            .run_script("inst", &encode("let = ;"), &Context::new())
            .unwrap_err();
        assert!(matches!(err, ScriptError::Syntax(_)));
    }

    #[test]
    fn test_bad_base64_is_typed() {
        let sandbox = ScriptSandbox::default();
        let err = sandbox
            .run_script("inst", "not//valid==b64!!", &Context::new())
            .unwrap_err();
        assert!(matches!(err, ScriptError::Decode(_)));
    }

    #[test]
    fn test_budget_aborts_runaway_script() {
        let sandbox = ScriptSandbox::new(Duration::from_millis(50));
        let err = sandbox
            .run_script("inst", &encode("loop { }"), &Context::new())
            .unwrap_err();
        assert!(matches!(err, ScriptError::BudgetExceeded { .. }));
    }

    #[test]
    fn test_non_map_result_keeps_context() {
        let sandbox = ScriptSandbox::default();
        let ctx = ctx_from(r#"{"keep": true}"#);

        let updated = sandbox
            .run_script("inst", &encode("process_data = 17;"), &ctx)
            .unwrap();

        assert_eq!(updated, ctx);
    }

    #[test]
    fn test_eval_bool() {
        let sandbox = ScriptSandbox::default();
        let ctx = ctx_from(r#"{"age": 31}"#);

        assert!(sandbox
            .eval_bool("inst", &encode("process_data.age >= 30"), &ctx)
            .unwrap());
        assert!(!sandbox
            .eval_bool("inst", &encode("process_data.age >= 40"), &ctx)
            .unwrap());
    }

    #[test]
    fn test_eval_bool_rejects_non_boolean() {
        let sandbox = ScriptSandbox::default();
        let err = sandbox
            .eval_bool("inst", &encode("1 + 1"), &Context::new())
            .unwrap_err();
        assert!(matches!(err, ScriptError::NotBoolean { .. }));
    }
}
