//! Typed access to tool call arguments.

use serde_json::{Map, Value};

use crate::error::AgentError;

/// Wrapper around tool call arguments providing typed extraction.
///
/// Models send arguments as a serialized JSON string; an empty or
/// whitespace-only payload means "no arguments" and parses to `{}`.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolArguments {
    value: Value,
}

impl ToolArguments {
    pub fn new(value: Value) -> Self {
        Self { value }
    }

    /// Parse the serialized payload carried by a tool call.
    pub fn from_serialized(raw: &str) -> Result<Self, AgentError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(Self::new(Value::Object(Map::new())));
        }
        let value = serde_json::from_str(trimmed).map_err(|e| {
            AgentError::InvalidArgument(format!("tool arguments must be valid JSON: {e}"))
        })?;
        Ok(Self::new(value))
    }

    /// Get the raw JSON value.
    pub fn raw(&self) -> &Value {
        &self.value
    }

    /// Coerce into a JSON object suitable for a remote `tools/call`.
    ///
    /// Accepts an object, a string holding a serialized object, or null.
    pub fn to_object(&self) -> Result<Map<String, Value>, AgentError> {
        coerce_object(self.value.clone())
    }

    /// Get a string argument by key.
    pub fn get_str(&self, key: &str) -> Result<&str, AgentError> {
        self.value
            .get(key)
            .and_then(|v| v.as_str())
            .ok_or_else(|| AgentError::InvalidArgument(format!("Missing string argument: {key}")))
    }

    /// Get an optional string argument.
    pub fn get_str_opt(&self, key: &str) -> Option<&str> {
        self.value.get(key).and_then(|v| v.as_str())
    }

    /// Get an optional integer argument.
    pub fn get_u64_opt(&self, key: &str) -> Option<u64> {
        self.value.get(key).and_then(|v| v.as_u64())
    }

    /// Deserialize the entire arguments into a typed struct.
    pub fn deserialize<T: serde::de::DeserializeOwned>(&self) -> Result<T, AgentError> {
        let object = self.to_object()?;
        serde_json::from_value(Value::Object(object)).map_err(|e| {
            AgentError::InvalidArgument(format!("Failed to deserialize arguments: {e}"))
        })
    }
}

fn coerce_object(value: Value) -> Result<Map<String, Value>, AgentError> {
    match value {
        Value::Null => Ok(Map::new()),
        Value::Object(map) => Ok(map),
        Value::String(raw) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                return Ok(Map::new());
            }
            let parsed: Value = serde_json::from_str(trimmed).map_err(|e| {
                AgentError::InvalidArgument(format!("tool arguments must be valid JSON: {e}"))
            })?;
            match parsed {
                Value::String(_) => Err(AgentError::InvalidArgument(
                    "tool arguments must be a JSON object; got a nested string".into(),
                )),
                other => coerce_object(other),
            }
        }
        other => Err(AgentError::InvalidArgument(format!(
            "tool arguments must be a JSON object; got {other}"
        ))),
    }
}
