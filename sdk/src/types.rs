//! Tool call argument types
//!
//! Servers receive `tools/call` params as `{"name": ..., "arguments": {...}}`.
//! `ToolInput` wraps that shape with typed accessors.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Input to a tool function
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolInput {
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl ToolInput {
    /// Create a new ToolInput
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: Map::new(),
        }
    }

    /// Decode `tools/call` params.
    ///
    /// A missing `arguments` member is treated as an empty object; a
    /// non-object `arguments` member is rejected.
    pub fn from_params(params: &Value) -> Result<Self, ToolError> {
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::MissingParameter("name".to_string()))?;

        let arguments = match params.get("arguments") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map.clone(),
            Some(_) => {
                return Err(ToolError::InvalidParameter(
                    "arguments must be an object".to_string(),
                ))
            }
        };

        Ok(Self {
            name: name.to_string(),
            arguments,
        })
    }

    /// Add an argument
    pub fn with_arg(mut self, key: impl Into<String>, value: Value) -> Self {
        self.arguments.insert(key.into(), value);
        self
    }

    /// Get a string argument
    pub fn param_str(&self, key: &str) -> Result<String, ToolError> {
        self.arguments
            .get(key)
            .and_then(|v| v.as_str())
            .map(String::from)
            .ok_or_else(|| ToolError::MissingParameter(key.to_string()))
    }

    /// Get a string argument, falling back to `default` when absent
    pub fn param_str_or(&self, key: &str, default: &str) -> String {
        self.param_str_opt(key)
            .unwrap_or_else(|| default.to_string())
    }

    /// Get an optional string argument
    pub fn param_str_opt(&self, key: &str) -> Option<String> {
        self.arguments
            .get(key)
            .and_then(|v| v.as_str())
            .map(String::from)
    }

    /// Get an optional bool argument
    pub fn param_bool_opt(&self, key: &str) -> Option<bool> {
        self.arguments.get(key).and_then(|v| v.as_bool())
    }
}

/// Tool-specific errors
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ToolError {
    #[error("Missing parameter: {0}")]
    MissingParameter(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_params() {
        let input = ToolInput::from_params(&json!({
            "name": "read_file",
            "arguments": { "path": "notes.txt" }
        }))
        .unwrap();

        assert_eq!(input.name, "read_file");
        assert_eq!(input.param_str("path").unwrap(), "notes.txt");
    }

    #[test]
    fn test_from_params_without_arguments() {
        let input = ToolInput::from_params(&json!({ "name": "list_dir" })).unwrap();
        assert!(input.arguments.is_empty());
        assert_eq!(input.param_str_or("path", "."), ".");
    }

    #[test]
    fn test_from_params_missing_name() {
        let result = ToolInput::from_params(&json!({ "arguments": {} }));
        assert_eq!(
            result.unwrap_err(),
            ToolError::MissingParameter("name".to_string())
        );
    }

    #[test]
    fn test_from_params_rejects_non_object_arguments() {
        let result = ToolInput::from_params(&json!({ "name": "x", "arguments": [1, 2] }));
        assert!(matches!(result, Err(ToolError::InvalidParameter(_))));
    }

    #[test]
    fn test_param_str_missing() {
        let input = ToolInput::new("test");
        let result = input.param_str("missing");
        assert!(matches!(
            result.unwrap_err(),
            ToolError::MissingParameter(_)
        ));
    }

    #[test]
    fn test_param_str_wrong_type() {
        let input = ToolInput::new("test").with_arg("path", json!(42));
        assert!(input.param_str("path").is_err());
        assert_eq!(input.param_str_opt("path"), None);
    }

    #[test]
    fn test_param_bool_opt() {
        let input = ToolInput::new("test").with_arg("recursive", json!(true));
        assert_eq!(input.param_bool_opt("recursive"), Some(true));
        assert_eq!(input.param_bool_opt("missing"), None);
    }

    #[test]
    fn test_tool_error_display() {
        let err = ToolError::MissingParameter("path".to_string());
        assert_eq!(err.to_string(), "Missing parameter: path");

        let err = ToolError::UnknownTool("delete_everything".to_string());
        assert_eq!(err.to_string(), "Unknown tool: delete_everything");
    }
}
