//! Capability parameter types
//!
//! `ParameterSchema` is what a capability declares to the model; `ToolInput`
//! is what the dispatcher hands back to it once the model has chosen.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;

/// Arguments passed to a capability invocation
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ToolInput {
    pub params: HashMap<String, Value>,
}

impl ToolInput {
    /// Create an empty input
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the JSON arguments string produced by the model.
    ///
    /// An empty string is treated as `{}`. Anything that is not a JSON object
    /// is rejected.
    pub fn from_json(arguments: &str) -> Result<Self, ToolError> {
        let trimmed = arguments.trim();
        if trimmed.is_empty() {
            return Ok(Self::new());
        }

        match serde_json::from_str::<Value>(trimmed) {
            Ok(Value::Object(map)) => Ok(Self {
                params: map.into_iter().collect(),
            }),
            Ok(other) => Err(ToolError::InvalidArguments(format!(
                "expected a JSON object, got {}",
                other
            ))),
            Err(e) => Err(ToolError::InvalidArguments(e.to_string())),
        }
    }

    /// Add a parameter
    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    /// Get a string parameter
    pub fn param_str(&self, key: &str) -> Result<String, ToolError> {
        self.params
            .get(key)
            .and_then(|v| v.as_str())
            .map(String::from)
            .ok_or_else(|| ToolError::MissingParameter(key.to_string()))
    }

    /// Get an i64 parameter
    pub fn param_i64(&self, key: &str) -> Result<i64, ToolError> {
        self.params
            .get(key)
            .and_then(|v| v.as_i64())
            .ok_or_else(|| ToolError::MissingParameter(key.to_string()))
    }

    /// Get an optional string parameter. Blank strings count as absent.
    pub fn param_str_opt(&self, key: &str) -> Option<String> {
        self.params
            .get(key)
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
            .map(String::from)
    }

    /// Get an optional i64 parameter
    ///
    /// Models sometimes send numbers as strings; those are accepted too.
    pub fn param_i64_opt(&self, key: &str) -> Option<i64> {
        match self.params.get(key)? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Get an optional list of strings
    pub fn param_str_list(&self, key: &str) -> Vec<String> {
        self.params
            .get(key)
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|i| i.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Capability argument errors
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Missing parameter: {0}")]
    MissingParameter(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),
}

/// Primitive and array types a parameter may declare
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array(Box<ParamType>),
}

impl ParamType {
    fn to_json_schema(&self) -> Value {
        match self {
            ParamType::String => json!({ "type": "string" }),
            ParamType::Integer => json!({ "type": "integer" }),
            ParamType::Number => json!({ "type": "number" }),
            ParamType::Boolean => json!({ "type": "boolean" }),
            ParamType::Array(items) => json!({
                "type": "array",
                "items": items.to_json_schema(),
            }),
        }
    }
}

/// One named field in a capability's parameter schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterField {
    pub name: String,
    pub param_type: ParamType,
    pub description: String,
    pub required: bool,
}

/// Declared parameters of a capability
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterSchema {
    pub fields: Vec<ParameterField>,
}

impl ParameterSchema {
    /// Schema with no parameters
    pub fn empty() -> Self {
        Self::default()
    }

    /// Add a required field
    pub fn required(
        mut self,
        name: impl Into<String>,
        param_type: ParamType,
        description: impl Into<String>,
    ) -> Self {
        self.fields.push(ParameterField {
            name: name.into(),
            param_type,
            description: description.into(),
            required: true,
        });
        self
    }

    /// Add an optional field
    pub fn optional(
        mut self,
        name: impl Into<String>,
        param_type: ParamType,
        description: impl Into<String>,
    ) -> Self {
        self.fields.push(ParameterField {
            name: name.into(),
            param_type,
            description: description.into(),
            required: false,
        });
        self
    }

    /// Render as a JSON Schema object, the form function-calling APIs expect.
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();

        for field in &self.fields {
            let mut schema = field.param_type.to_json_schema();
            if let Some(obj) = schema.as_object_mut() {
                obj.insert("description".to_string(), json!(field.description));
            }
            properties.insert(field.name.clone(), schema);
            if field.required {
                required.push(json!(field.name));
            }
        }

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}
