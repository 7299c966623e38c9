//! Check tool call arguments against the tool's JSON schema before execution.

use serde_json::Value;

/// Validate parsed arguments against a JSON schema.
///
/// Covers what models usually get wrong: a non-object payload, missing
/// required fields, wrong top-level property types (including union types
/// such as `["string", "null"]`), and values outside a string `enum`.
/// Returns a description of the first violation.
pub fn validate_arguments(args: &Value, schema: &Value) -> Result<(), String> {
    let expects_object = schema.get("type").and_then(Value::as_str) == Some("object");
    if expects_object && !args.is_object() {
        return Err(format!(
            "expected object arguments, got {}",
            json_type_name(args)
        ));
    }

    let Some(obj) = args.as_object() else {
        return Ok(());
    };

    let required = schema
        .get("required")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str);
    for name in required {
        if !obj.contains_key(name) {
            return Err(format!("missing required field '{name}'"));
        }
    }

    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Ok(());
    };

    for (key, value) in obj {
        let Some(prop) = properties.get(key) else {
            continue;
        };
        if let Some(expected) = prop.get("type") {
            if !matches_declared_type(value, expected) {
                return Err(format!(
                    "field '{key}' expected type '{}', got {}",
                    describe_type(expected),
                    json_type_name(value)
                ));
            }
        }
        if let Some(allowed) = prop.get("enum").and_then(Value::as_array) {
            if !allowed.contains(value) {
                return Err(format!("field '{key}' must be one of {}", Value::Array(allowed.clone())));
            }
        }
    }

    Ok(())
}

fn matches_declared_type(value: &Value, declared: &Value) -> bool {
    match declared {
        Value::String(name) => value_matches_type(value, name),
        Value::Array(names) => names
            .iter()
            .filter_map(Value::as_str)
            .any(|name| value_matches_type(value, name)),
        _ => true,
    }
}

fn value_matches_type(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn describe_type(declared: &Value) -> String {
    match declared {
        Value::String(name) => name.clone(),
        Value::Array(names) => names
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join("|"),
        other => other.to_string(),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
