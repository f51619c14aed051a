//! Plugin configuration schema and validation.
//!
//! A plugin declares the shape of the config it accepts as a list of
//! `ConfigField`s; `validate` checks a supplied `serde_json::Map` against
//! that declaration, rejecting unknown fields, missing required fields,
//! and type/enum mismatches, and filling in declared defaults.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PluginError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    String,
    Int,
    Bool,
    Float,
    ArrayOfString,
    ArrayOfObject,
    Object,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigField {
    pub name: String,
    pub description: String,
    pub required: bool,
    pub default: Option<Value>,
    pub kind: FieldKind,
    /// Restricts a string field to one of a fixed set of values.
    #[serde(default)]
    pub enum_values: Option<Vec<String>>,
    /// Field declarations for each object in an `ArrayOfObject` field.
    #[serde(default)]
    pub nested: Option<Vec<ConfigField>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigSchema {
    pub fields: Vec<ConfigField>,
}

impl ConfigSchema {
    pub fn new(fields: Vec<ConfigField>) -> Self {
        Self { fields }
    }

    /// Validates `input` against this schema, returning a config map with
    /// every declared default filled in for fields the caller omitted.
    pub fn validate(&self, input: &HashMap<String, Value>) -> Result<HashMap<String, Value>, PluginError> {
        let known: std::collections::HashSet<&str> =
            self.fields.iter().map(|f| f.name.as_str()).collect();
        for key in input.keys() {
            if !known.contains(key.as_str()) {
                return Err(PluginError::ConfigInvalid(format!("unknown config field: {key}")));
            }
        }

        let mut out = HashMap::with_capacity(self.fields.len());
        for field in &self.fields {
            match input.get(&field.name) {
                Some(value) => {
                    check_type(field, value)?;
                    out.insert(field.name.clone(), value.clone());
                }
                None => {
                    if field.required {
                        return Err(PluginError::ConfigInvalid(format!(
                            "missing required config field: {}",
                            field.name
                        )));
                    }
                    if let Some(default) = &field.default {
                        out.insert(field.name.clone(), default.clone());
                    }
                }
            }
        }
        Ok(out)
    }
}

fn check_type(field: &ConfigField, value: &Value) -> Result<(), PluginError> {
    let type_ok = match field.kind {
        FieldKind::String => value.is_string(),
        FieldKind::Int => value.is_i64() || value.is_u64(),
        FieldKind::Bool => value.is_boolean(),
        FieldKind::Float => value.is_number(),
        FieldKind::ArrayOfString => {
            value.is_array() && value.as_array().unwrap().iter().all(|v| v.is_string())
        }
        FieldKind::ArrayOfObject => value.is_array(),
        FieldKind::Object => value.is_object(),
    };
    if !type_ok {
        return Err(PluginError::ConfigInvalid(format!(
            "field '{}' expected {:?}, got {value}",
            field.name, field.kind
        )));
    }

    if let (FieldKind::String, Some(allowed)) = (field.kind, &field.enum_values) {
        let actual = value.as_str().unwrap_or_default();
        if !allowed.iter().any(|a| a == actual) {
            return Err(PluginError::ConfigInvalid(format!(
                "field '{}' value '{}' is not one of {:?}",
                field.name, actual, allowed
            )));
        }
    }

    if let FieldKind::ArrayOfObject = field.kind {
        if let Some(nested_schema) = &field.nested {
            let schema = ConfigSchema::new(nested_schema.clone());
            for item in value.as_array().unwrap() {
                let map: HashMap<String, Value> = item
                    .as_object()
                    .ok_or_else(|| {
                        PluginError::ConfigInvalid(format!(
                            "field '{}' array items must be objects",
                            field.name
                        ))
                    })?
                    .clone()
                    .into_iter()
                    .collect();
                schema.validate(&map)?;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_schema() -> ConfigSchema {
        ConfigSchema::new(vec![
            ConfigField {
                name: "webhook_url".into(),
                description: "Discord webhook".into(),
                required: true,
                default: None,
                kind: FieldKind::String,
                enum_values: None,
                nested: None,
            },
            ConfigField {
                name: "level".into(),
                description: "severity".into(),
                required: false,
                default: Some(json!("info")),
                kind: FieldKind::String,
                enum_values: Some(vec!["info".into(), "warn".into(), "error".into()]),
                nested: None,
            },
        ])
    }

    #[test]
    fn fills_defaults_for_omitted_optional_fields() {
        let schema = sample_schema();
        let mut input = HashMap::new();
        input.insert("webhook_url".to_string(), json!("https://example.com/hook"));
        let validated = schema.validate(&input).unwrap();
        assert_eq!(validated.get("level").unwrap(), &json!("info"));
    }

    #[test]
    fn rejects_missing_required_field() {
        let schema = sample_schema();
        let input = HashMap::new();
        assert!(matches!(
            schema.validate(&input),
            Err(PluginError::ConfigInvalid(_))
        ));
    }

    #[test]
    fn rejects_unknown_field() {
        let schema = sample_schema();
        let mut input = HashMap::new();
        input.insert("webhook_url".to_string(), json!("https://example.com/hook"));
        input.insert("bogus".to_string(), json!(true));
        assert!(matches!(
            schema.validate(&input),
            Err(PluginError::ConfigInvalid(_))
        ));
    }

    #[test]
    fn rejects_enum_violation() {
        let schema = sample_schema();
        let mut input = HashMap::new();
        input.insert("webhook_url".to_string(), json!("https://example.com/hook"));
        input.insert("level".to_string(), json!("critical"));
        assert!(matches!(
            schema.validate(&input),
            Err(PluginError::ConfigInvalid(_))
        ));
    }

    #[test]
    fn rejects_type_mismatch() {
        let schema = sample_schema();
        let mut input = HashMap::new();
        input.insert("webhook_url".to_string(), json!(42));
        assert!(matches!(
            schema.validate(&input),
            Err(PluginError::ConfigInvalid(_))
        ));
    }
}
