//! Parameter schemas and parameter merging
//!
//! Node kinds describe their parameters with a JSON-schema style object
//! (`properties` with `type`, `minimum`, `maximum`, `default`, `tunable`).
//! Only the subset needed for defaults and live-tune validation is kept.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, StagingError};

/// JSON type of a parameter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    Number,
    Integer,
    String,
    Boolean,
    Object,
    Array,
    #[default]
    Any,
}

impl ParamType {
    fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some("number") => Self::Number,
            Some("integer") => Self::Integer,
            Some("string") => Self::String,
            Some("boolean") => Self::Boolean,
            Some("object") => Self::Object,
            Some("array") => Self::Array,
            _ => Self::Any,
        }
    }

    fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::Number => value.is_number(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::String => value.is_string(),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
            Self::Any => true,
        }
    }
}

/// One parameter of a node kind
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamField {
    #[serde(rename = "type", default)]
    pub param_type: ParamType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
    /// May be changed on a live, non-staged node
    #[serde(default)]
    pub tunable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<Value>>,
}

impl ParamField {
    pub fn number(default: f64, minimum: f64, maximum: f64) -> Self {
        Self {
            param_type: ParamType::Number,
            default: Some(Value::from(default)),
            minimum: Some(minimum),
            maximum: Some(maximum),
            ..Self::default()
        }
    }

    pub fn integer(default: i64) -> Self {
        Self {
            param_type: ParamType::Integer,
            default: Some(Value::from(default)),
            ..Self::default()
        }
    }

    pub fn string(default: Option<&str>) -> Self {
        Self {
            param_type: ParamType::String,
            default: default.map(Value::from),
            ..Self::default()
        }
    }

    pub fn boolean(default: bool) -> Self {
        Self {
            param_type: ParamType::Boolean,
            default: Some(Value::from(default)),
            ..Self::default()
        }
    }

    pub fn tunable(mut self) -> Self {
        self.tunable = true;
        self
    }

    pub fn bounded(mut self, minimum: f64, maximum: f64) -> Self {
        self.minimum = Some(minimum);
        self.maximum = Some(maximum);
        self
    }

    pub fn described(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Check a value against type, enum and numeric bounds
    pub fn check(&self, value: &Value) -> std::result::Result<(), String> {
        if !self.param_type.accepts(value) {
            return Err(format!(
                "expected {:?}, got {}",
                self.param_type,
                json_type_name(value)
            ));
        }
        if let Some(allowed) = &self.allowed {
            if !allowed.contains(value) {
                return Err(format!("{} is not one of the allowed values", value));
            }
        }
        if let Some(n) = value.as_f64() {
            if !n.is_finite() {
                return Err(format!("{} is not a finite number", n));
            }
            if let Some(min) = self.minimum {
                if n < min {
                    return Err(format!("{} is below minimum {}", n, min));
                }
            }
            if let Some(max) = self.maximum {
                if n > max {
                    return Err(format!("{} is above maximum {}", n, max));
                }
            }
        }
        Ok(())
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

/// Parameter schema of a node kind
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamSchema {
    #[serde(default)]
    pub fields: BTreeMap<String, ParamField>,
}

impl ParamSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, field: ParamField) -> Self {
        self.fields.insert(name.into(), field);
        self
    }

    /// Parse the `properties` of a JSON-schema object
    ///
    /// `null` or a schema without `properties` yields an empty schema.
    pub fn from_json_schema(schema: &Value) -> Result<Self> {
        let mut fields = BTreeMap::new();
        let Some(properties) = schema.get("properties") else {
            return Ok(Self { fields });
        };
        let properties = properties
            .as_object()
            .ok_or_else(|| StagingError::parse("param schema 'properties' must be an object"))?;

        for (name, prop) in properties {
            let field = ParamField {
                param_type: ParamType::parse(prop.get("type").and_then(Value::as_str)),
                default: prop.get("default").cloned(),
                minimum: prop.get("minimum").and_then(Value::as_f64),
                maximum: prop.get("maximum").and_then(Value::as_f64),
                tunable: prop.get("tunable").and_then(Value::as_bool).unwrap_or(false),
                description: prop
                    .get("description")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                allowed: prop.get("enum").and_then(Value::as_array).cloned(),
            };
            fields.insert(name.clone(), field);
        }
        Ok(Self { fields })
    }

    pub fn get(&self, key: &str) -> Option<&ParamField> {
        self.fields.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Initial params object for a newly added node
    pub fn defaults(&self) -> Value {
        let map = self
            .fields
            .iter()
            .filter_map(|(name, field)| field.default.clone().map(|d| (name.clone(), d)))
            .collect();
        Value::Object(map)
    }

    /// Validate a single-field live edit
    pub fn validate_tune(&self, key: &str, value: &Value) -> std::result::Result<(), String> {
        let field = self
            .fields
            .get(key)
            .ok_or_else(|| format!("unknown parameter '{}'", key))?;
        if !field.tunable {
            return Err(format!("parameter '{}' cannot be changed while running", key));
        }
        field.check(value)
    }
}

/// Merge a partial params value into existing params
///
/// Objects merge key by key (recursively while both sides are objects);
/// any other value replaces what was there.
pub fn merge_params(existing: &Value, partial: &Value) -> Value {
    match (existing, partial) {
        (Value::Object(base), Value::Object(update)) => {
            let mut merged = base.clone();
            for (key, value) in update {
                let next = match merged.get(key) {
                    Some(current) => merge_params(current, value),
                    None => value.clone(),
                };
                merged.insert(key.clone(), next);
            }
            Value::Object(merged)
        }
        _ => partial.clone(),
    }
}

/// Compare params the way a node reads them
///
/// Numbers compare by value, so `1` and `1.0` are equal. Objects and
/// arrays compare element by element.
pub fn params_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(x, y)| params_equal(x, y))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(key, value)| y.get(key).is_some_and(|other| params_equal(value, other)))
        }
        _ => a == b,
    }
}
