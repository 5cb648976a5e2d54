// ABOUTME: Evaluator for the built-in gateway comparison grammar
// ABOUTME: Parses "<dotted.path> <op> <literal>" and compares against the context

use serde_json::Value;

use super::context::{get_path, Context};
use super::error::ConditionError;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Op {
    Ge,
    Le,
    Eq,
    Ne,
    Gt,
    Lt,
}

impl Op {
    fn apply_num(self, actual: f64, target: f64) -> bool {
        match self {
            Op::Ge => actual >= target,
            Op::Le => actual <= target,
            Op::Eq => actual == target,
            Op::Ne => actual != target,
            Op::Gt => actual > target,
            Op::Lt => actual < target,
        }
    }

    fn apply_str(self, actual: &str, target: &str) -> bool {
        match self {
            Op::Ge => actual >= target,
            Op::Le => actual <= target,
            Op::Eq => actual == target,
            Op::Ne => actual != target,
            Op::Gt => actual > target,
            Op::Lt => actual < target,
        }
    }
}

// Two-character operators are probed first so ">=" never parses as ">".
const OPERATORS: [(&str, Op); 6] = [
    (">=", Op::Ge),
    ("<=", Op::Le),
    ("==", Op::Eq),
    ("!=", Op::Ne),
    (">", Op::Gt),
    ("<", Op::Lt),
];

/// Evaluate a single comparison expression against the context. A numeric
/// context value compares numerically (the literal must parse as a number);
/// a string value compares lexicographically, regardless of whether the
/// literal looks numeric.
pub fn evaluate(expr: &str, ctx: &Context) -> Result<bool, ConditionError> {
    let expr = expr.trim();
    if expr.is_empty() {
        return Err(ConditionError::Empty);
    }

    let (token, op, at) = OPERATORS
        .iter()
        .find_map(|(token, op)| expr.find(token).map(|at| (*token, *op, at)))
        .ok_or_else(|| ConditionError::MissingOperator {
            expr: expr.to_string(),
        })?;

    let path = expr[..at].trim();
    let literal = expr[at + token.len()..].trim();
    if path.is_empty() {
        return Err(ConditionError::MissingOperator {
            expr: expr.to_string(),
        });
    }

    let actual = get_path(ctx, path).ok_or_else(|| ConditionError::UnknownVariable {
        path: path.to_string(),
    })?;

    match actual {
        Value::Number(n) => {
            let actual = n.as_f64().ok_or_else(|| ConditionError::UnsupportedType {
                path: path.to_string(),
                type_name: "number".to_string(),
            })?;
            let target: f64 = literal
                .parse()
                .map_err(|_| ConditionError::TypeMismatch {
                    path: path.to_string(),
                    literal: literal.to_string(),
                })?;
            Ok(op.apply_num(actual, target))
        }
        Value::String(s) => Ok(op.apply_str(s, literal)),
        other => Err(ConditionError::UnsupportedType {
            path: path.to_string(),
            type_name: type_name(other).to_string(),
        }),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
