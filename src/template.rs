//! Restricted template evaluation for extendable actions.
//!
//! A template is either a `${identifier}` interpolation over the context
//! map or a single call of the one admitted namespace function,
//! `generate_resource_model_from_resource_structure_by_resource_type`.
//! Nothing else evaluates: there is no expression language to escape
//! from. A denylist of reserved tokens is still screened first so that
//! hostile configuration records are rejected with a uniform error.

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;

use crate::constants::RESOURCE_MODEL_FUNCTION;
use crate::error::{EngineError, Result};
use crate::registry::Registry;

fn forbidden_tokens() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"\b(delete|throw|new|process|global|globalThis|require|import|eval|Function|constructor|prototype|__proto__)\b",
        )
        .unwrap()
    })
}

fn placeholder() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}").unwrap())
}

fn lone_placeholder() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\$\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}$").unwrap())
}

fn namespace_call() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(&format!(
            r"^\s*{RESOURCE_MODEL_FUNCTION}\(\s*([A-Za-z_][A-Za-z0-9_]*)\s*\)\s*$"
        ))
        .unwrap()
    })
}

/// Evaluate a template expression against a context map.
///
/// `datastore` backs the namespace function; evaluating a call without
/// one fails `UndefinedContext`.
pub async fn evaluate(
    expression: &str,
    context: &Map<String, Value>,
    datastore: Option<&Registry>,
) -> Result<Value> {
    if forbidden_tokens().is_match(expression) {
        return Err(EngineError::generic("template contains forbidden token"));
    }

    if let Some(captures) = namespace_call().captures(expression) {
        let identifier = &captures[1];
        let resource_type = lookup(context, identifier)?;
        let resource_type = resource_type.as_str().ok_or_else(|| {
            EngineError::UnexpectedValueType(format!(
                "template identifier {identifier} must name a resource type string"
            ))
        })?;
        let registry = datastore.ok_or_else(|| {
            EngineError::UndefinedContext(
                "template namespace function requires a datastore".to_string(),
            )
        })?;
        return generate_resource_model(registry, resource_type).await;
    }

    let trimmed = expression.trim();

    // A template that is exactly one placeholder (or one bare identifier
    // bound in the context) yields the context value itself, preserving
    // its type for non-string defaults.
    if let Some(captures) = lone_placeholder().captures(trimmed) {
        return lookup(context, &captures[1]).cloned();
    }
    if is_identifier(trimmed) {
        if let Some(value) = context.get(trimmed) {
            return Ok(value.clone());
        }
    }

    // Interpolation: substitute every placeholder with its context value.
    let mut rendered = String::with_capacity(expression.len());
    let mut cursor = 0;
    for captures in placeholder().captures_iter(expression) {
        let whole = captures.get(0).unwrap();
        let value = lookup(context, &captures[1])?;
        rendered.push_str(&expression[cursor..whole.start()]);
        rendered.push_str(&stringify(value));
        cursor = whole.end();
    }
    rendered.push_str(&expression[cursor..]);

    Ok(Value::String(rendered))
}

/// Produce a model shape for a stored resource structure: one null slot
/// per property, plus the resource type.
async fn generate_resource_model(registry: &Registry, resource_type: &str) -> Result<Value> {
    let structure = registry
        .resource_structure(resource_type)
        .await?
        .ok_or_else(|| {
            EngineError::UndefinedValue(format!(
                "no resource structure stored for type {resource_type}"
            ))
        })?;

    let mut model = Map::new();
    model.insert(
        "resource_type".to_string(),
        Value::String(structure.resource_type.clone()),
    );
    for property in structure.properties_by_argument_name.keys() {
        model.insert(property.clone(), Value::Null);
    }
    Ok(Value::Object(model))
}

fn lookup<'a>(context: &'a Map<String, Value>, identifier: &str) -> Result<&'a Value> {
    context.get(identifier).ok_or_else(|| {
        EngineError::UndefinedValue(format!("template identifier {identifier} not in context"))
    })
}

fn is_identifier(candidate: &str) -> bool {
    let mut chars = candidate.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_interpolation() {
        let ctx = context(&[("resourceType", json!("Report"))]);
        let value = evaluate("Create${resourceType}", &ctx, None).await.unwrap();
        assert_eq!(value, json!("CreateReport"));
    }

    #[tokio::test]
    async fn test_single_placeholder_preserves_value_type() {
        let ctx = context(&[("limit", json!(25))]);
        let value = evaluate("${limit}", &ctx, None).await.unwrap();
        assert_eq!(value, json!(25));
    }

    #[tokio::test]
    async fn test_bare_identifier_resolves_from_context() {
        let ctx = context(&[("resourceId", json!("r-1"))]);
        let value = evaluate("resourceId", &ctx, None).await.unwrap();
        assert_eq!(value, json!("r-1"));
    }

    #[tokio::test]
    async fn test_unbound_bare_text_is_literal() {
        let value = evaluate("ReportCreated", &Map::new(), None).await.unwrap();
        assert_eq!(value, json!("ReportCreated"));
    }

    #[tokio::test]
    async fn test_missing_identifier_fails() {
        let error = evaluate("Create${resourceType}", &Map::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(error, EngineError::UndefinedValue(_)));
    }

    #[tokio::test]
    async fn test_forbidden_tokens_rejected() {
        let ctx = context(&[("x", json!(1))]);
        for expression in [
            "delete ${x}",
            "new Thing(${x})",
            "process.exit(1)",
            "global.leak",
            "require('fs')",
            "throw ${x}",
            "${x}.constructor",
            "eval('${x}')",
        ] {
            let error = evaluate(expression, &ctx, None).await.unwrap_err();
            assert!(
                error.to_string().contains("forbidden token"),
                "expected rejection for {expression}"
            );
        }
    }

    #[tokio::test]
    async fn test_identifiers_containing_reserved_words_pass() {
        let ctx = context(&[("processType", json!("batch"))]);
        let value = evaluate("${processType}", &ctx, None).await.unwrap();
        assert_eq!(value, json!("batch"));
    }

    #[tokio::test]
    async fn test_namespace_call_without_datastore_fails_undefined_context() {
        let ctx = context(&[("resourceType", json!("Report"))]);
        let error = evaluate(
            "generate_resource_model_from_resource_structure_by_resource_type(resourceType)",
            &ctx,
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(error, EngineError::UndefinedContext(_)));
    }

    #[tokio::test]
    async fn test_namespace_call_requires_bound_identifier() {
        let error = evaluate(
            "generate_resource_model_from_resource_structure_by_resource_type(resourceType)",
            &Map::new(),
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(error, EngineError::UndefinedValue(_)));
    }
}
