//! Signature resolution and argument type checking.
//!
//! A handler may declare several candidate signatures (ordered lists of
//! argument names). Resolution picks the first candidate fully covered by
//! the message; two argument names are special: `options` passes the
//! entire message and `origin_user_id` is taken from the action's origin
//! metadata rather than the message.

use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::constants::{OPTIONS_ARGUMENT, ORIGIN_USER_ID_ARGUMENT};
use crate::error::{EngineError, Result};

/// Pick the first candidate signature fully covered by the message, then
/// type-check its arguments against the schema.
///
/// Deterministic: the same candidate list and message keys always select
/// the same signature.
pub fn resolve<'a>(
    candidates: &'a [Vec<String>],
    message: &Map<String, Value>,
    schema: &HashMap<String, String>,
) -> Result<&'a [String]> {
    let selected = candidates
        .iter()
        .find(|candidate| is_satisfied(candidate, message))
        .ok_or_else(|| {
            let message_keys: Vec<&String> = message.keys().collect();
            EngineError::UndefinedContext(format!(
                "no signature satisfied by message: candidates {candidates:?}, message keys {message_keys:?}"
            ))
        })?;

    for argument_name in selected {
        if is_sentinel(argument_name) {
            continue;
        }
        if let Some(descriptor) = schema.get(argument_name) {
            let value = message.get(argument_name).unwrap_or(&Value::Null);
            type_check(argument_name, value, descriptor)?;
        }
    }

    Ok(selected)
}

/// Build the positional argument list for a resolved signature.
pub fn arguments(
    signature: &[String],
    message: &Map<String, Value>,
    origin_user_id: &str,
) -> Vec<Value> {
    signature
        .iter()
        .map(|argument_name| match argument_name.as_str() {
            OPTIONS_ARGUMENT => Value::Object(message.clone()),
            ORIGIN_USER_ID_ARGUMENT => Value::String(origin_user_id.to_string()),
            name => message.get(name).cloned().unwrap_or(Value::Null),
        })
        .collect()
}

/// Check one value against a type descriptor.
///
/// Descriptors are lowercased primitive names plus `array` and `object`;
/// a compound `a.<B>` reduces to `a`, and a trailing `?` marks the
/// argument optional (null admitted).
pub fn type_check(argument_name: &str, value: &Value, descriptor: &str) -> Result<()> {
    let (base, optional) = parse_descriptor(descriptor);

    if value.is_null() {
        if optional {
            return Ok(());
        }
        return Err(EngineError::UnexpectedValueType(format!(
            "argument {argument_name} is null but declared {descriptor}"
        )));
    }

    let matches = match base.as_str() {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        // Unknown descriptors are not enforced
        _ => true,
    };

    if matches {
        Ok(())
    } else {
        Err(EngineError::UnexpectedValueType(format!(
            "argument {argument_name} expected {base}, got {}",
            value_type_name(value)
        )))
    }
}

/// Check every message value that has a schema entry. Used at publish
/// time, before any signature is selected.
pub fn type_check_message(
    message: &Map<String, Value>,
    schema: &HashMap<String, String>,
) -> Result<()> {
    for (argument_name, value) in message {
        if let Some(descriptor) = schema.get(argument_name) {
            type_check(argument_name, value, descriptor)?;
        }
    }
    Ok(())
}

fn is_satisfied(candidate: &[String], message: &Map<String, Value>) -> bool {
    candidate
        .iter()
        .all(|argument_name| is_sentinel(argument_name) || message.contains_key(argument_name))
}

fn is_sentinel(argument_name: &str) -> bool {
    argument_name == OPTIONS_ARGUMENT || argument_name == ORIGIN_USER_ID_ARGUMENT
}

fn parse_descriptor(descriptor: &str) -> (String, bool) {
    let trimmed = descriptor.trim();
    let (body, optional) = match trimmed.strip_suffix('?') {
        Some(body) => (body, true),
        None => (trimmed, false),
    };
    let base = match body.find(".<") {
        Some(index) => &body[..index],
        None => body,
    };
    (base.to_lowercase(), optional)
}

fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn signature(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_picks_first_satisfied_candidate() {
        let candidates = vec![signature(&["AID1", "AID2"]), signature(&["AID1", "AID3"])];
        let msg = message(&[("AID1", json!("a")), ("AID3", json!([true]))]);

        let selected = resolve(&candidates, &msg, &HashMap::new()).unwrap();
        assert_eq!(selected, signature(&["AID1", "AID3"]).as_slice());
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let candidates = vec![signature(&["a"]), signature(&["a", "b"])];
        let msg = message(&[("a", json!(1)), ("b", json!(2))]);
        for _ in 0..10 {
            let selected = resolve(&candidates, &msg, &HashMap::new()).unwrap();
            assert_eq!(selected, signature(&["a"]).as_slice());
        }
    }

    #[test]
    fn test_empty_message_satisfies_options_only_signature() {
        let candidates = vec![signature(&["options"])];
        let selected = resolve(&candidates, &Map::new(), &HashMap::new()).unwrap();
        assert_eq!(selected, signature(&["options"]).as_slice());
    }

    #[test]
    fn test_origin_user_id_is_not_required_in_message() {
        let candidates = vec![signature(&["AID1", "origin_user_id"])];
        let msg = message(&[("AID1", json!("a"))]);
        assert!(resolve(&candidates, &msg, &HashMap::new()).is_ok());
    }

    #[test]
    fn test_missing_argument_fails_undefined_context() {
        let candidates = vec![signature(&["AID1", "AID2"])];
        let msg = message(&[("AID1", json!("a"))]);
        let error = resolve(&candidates, &msg, &HashMap::new()).unwrap_err();
        assert!(matches!(&error, EngineError::UndefinedContext(_)));
        // Failure carries both the candidates and the message keys
        assert!(error.to_string().contains("AID2"));
        assert!(error.to_string().contains("AID1"));
    }

    #[test]
    fn test_type_mismatch_fails_unexpected_value_type() {
        let candidates = vec![signature(&["AID1"])];
        let msg = message(&[("AID1", json!(42))]);
        let schema = HashMap::from([("AID1".to_string(), "string".to_string())]);
        let error = resolve(&candidates, &msg, &schema).unwrap_err();
        assert!(matches!(error, EngineError::UnexpectedValueType(_)));
    }

    #[test]
    fn test_compound_descriptor_reduces_to_base() {
        assert!(type_check("xs", &json!([1, 2]), "array.<Number>").is_ok());
        assert!(type_check("xs", &json!("nope"), "array.<Number>").is_err());
    }

    #[test]
    fn test_optional_descriptor_admits_null() {
        assert!(type_check("note", &Value::Null, "string?").is_ok());
        assert!(type_check("note", &Value::Null, "string").is_err());
        assert!(type_check("note", &json!("hi"), "string?").is_ok());
    }

    #[test]
    fn test_positional_arguments() {
        let sig = signature(&["options", "AID1", "origin_user_id"]);
        let msg = message(&[("AID1", json!("a"))]);
        let args = arguments(&sig, &msg, "u1");

        assert_eq!(args.len(), 3);
        assert_eq!(args[0], Value::Object(msg.clone()));
        assert_eq!(args[1], json!("a"));
        assert_eq!(args[2], json!("u1"));
    }

    #[test]
    fn test_type_check_message_at_publish() {
        let schema = HashMap::from([
            ("AID1".to_string(), "string".to_string()),
            ("AID2".to_string(), "boolean".to_string()),
        ]);
        let ok = message(&[("AID1", json!("a")), ("AID2", json!(true))]);
        assert!(type_check_message(&ok, &schema).is_ok());

        let bad = message(&[("AID2", json!("not-a-bool"))]);
        assert!(matches!(
            type_check_message(&bad, &schema).unwrap_err(),
            EngineError::UnexpectedValueType(_)
        ));
    }
}
