// ABOUTME: Form input validation and context merging
// ABOUTME: Checks submissions against field descriptors and unions them into the context

use serde_json::Value;
use std::collections::HashMap;

use super::context::Context;
use crate::parser::FormField;

/// Validate submitted form data against the node's field descriptors.
/// Returns a field-name → message map; empty means the submission is valid.
pub fn validate_form_input(
    fields: &[FormField],
    input: &HashMap<String, String>,
) -> HashMap<String, String> {
    let mut errors = HashMap::new();

    for field in fields {
        let value = input.get(&field.name).map(|v| v.trim());

        if field.required && value.map(|v| v.is_empty()).unwrap_or(true) {
            errors.insert(field.name.clone(), "This field is required.".to_string());
            continue;
        }

        let Some(value) = value.filter(|v| !v.is_empty()) else {
            continue;
        };

        match field.field_type.as_str() {
            "number" => {
                if value.parse::<f64>().is_err() {
                    errors.insert(field.name.clone(), "Must be a valid number.".to_string());
                }
            }
            "email" => {
                if !value.contains('@') || !value.contains('.') {
                    errors.insert(
                        field.name.clone(),
                        "Must be a valid email address.".to_string(),
                    );
                }
            }
            _ => {}
        }
    }

    errors
}

/// Merge validated form input into the context. Number fields are coerced
/// to numeric values; everything else stays a string. Keys already present
/// in the context are overwritten by the submission.
pub fn merge_form_input(ctx: &mut Context, fields: &[FormField], input: &HashMap<String, String>) {
    for field in fields {
        let Some(value) = input.get(&field.name) else {
            continue;
        };

        let merged = match field.field_type.as_str() {
            "number" => value
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or_else(|| Value::String(value.clone())),
            _ => Value::String(value.clone()),
        };

        ctx.insert(field.name.clone(), merged);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields() -> Vec<FormField> {
        vec![
            FormField {
                id: None,
                name: "name".to_string(),
                label: Some("Name".to_string()),
                field_type: "text".to_string(),
                required: true,
            },
            FormField {
                id: None,
                name: "age".to_string(),
                label: None,
                field_type: "number".to_string(),
                required: false,
            },
            FormField {
                id: None,
                name: "email".to_string(),
                label: None,
                field_type: "email".to_string(),
                required: false,
            },
        ]
    }

    fn input(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_valid_submission() {
        let errors = validate_form_input(
            &fields(),
            &input(&[("name", "alice"), ("age", "31"), ("email", "a@b.c")]),
        );
        assert!(errors.is_empty());
    }

    #[test]
    fn test_missing_required_field() {
        let errors = validate_form_input(&fields(), &input(&[("age", "31")]));
        assert_eq!(errors.len(), 1);
        assert!(errors.contains_key("name"));

        // whitespace-only counts as missing
        let errors = validate_form_input(&fields(), &input(&[("name", "   ")]));
        assert!(errors.contains_key("name"));
    }

    #[test]
    fn test_bad_number_and_email() {
        let errors = validate_form_input(
            &fields(),
            &input(&[("name", "alice"), ("age", "old"), ("email", "nope")]),
        );
        assert!(errors.contains_key("age"));
        assert!(errors.contains_key("email"));
    }

    #[test]
    fn test_optional_empty_values_pass() {
        let errors = validate_form_input(&fields(), &input(&[("name", "alice"), ("age", "")]));
        assert!(errors.is_empty());
    }

    #[test]
    fn test_merge_coerces_numbers_and_overwrites() {
        let mut ctx = crate::engine::context::from_json(r#"{"name": "old", "keep": 1}"#).unwrap();

        merge_form_input(
            &mut ctx,
            &fields(),
            &input(&[("name", "alice"), ("age", "31"), ("stray", "ignored")]),
        );

        assert_eq!(ctx.get("name"), Some(&json!("alice")));
        assert_eq!(ctx.get("age"), Some(&json!(31.0)));
        assert_eq!(ctx.get("keep"), Some(&json!(1)));
        // only declared fields are merged
        assert!(!ctx.contains_key("stray"));
    }
}
