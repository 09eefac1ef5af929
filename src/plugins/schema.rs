//! Config schema declared by plugins and validated at the request boundary

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ConfigMap;
use crate::{Error, Result};

/// JSON type expected for a config field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl FieldKind {
    fn matches(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }

    const fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }
}

/// One declared config key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigField {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
    #[serde(default)]
    pub description: String,
}

/// Declared shape of a plugin's `config` map
///
/// Keys not declared here are rejected. A `null` value counts as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigSchema {
    pub fields: Vec<ConfigField>,
}

impl ConfigSchema {
    /// Add an optional field
    #[must_use]
    pub fn optional(mut self, name: &str, kind: FieldKind, description: &str) -> Self {
        self.fields.push(ConfigField {
            name: name.to_string(),
            kind,
            required: false,
            description: description.to_string(),
        });
        self
    }

    /// Add a required field
    #[must_use]
    pub fn required(mut self, name: &str, kind: FieldKind, description: &str) -> Self {
        self.fields.push(ConfigField {
            name: name.to_string(),
            kind,
            required: true,
            description: description.to_string(),
        });
        self
    }

    /// Collect every problem with a config map
    #[must_use]
    pub fn errors(&self, config: &ConfigMap) -> Vec<String> {
        let mut errors = Vec::new();

        for field in &self.fields {
            match config.get(&field.name).filter(|v| !v.is_null()) {
                None if field.required => {
                    errors.push(format!("missing required field '{}'", field.name));
                }
                Some(value) if !field.kind.matches(value) => {
                    errors.push(format!(
                        "field '{}' must be of type {}",
                        field.name,
                        field.kind.as_str()
                    ));
                }
                _ => {}
            }
        }

        for key in config.keys() {
            if !self.fields.iter().any(|f| &f.name == key) {
                errors.push(format!("unknown field '{key}'"));
            }
        }

        errors
    }

    /// Validate a config map
    ///
    /// # Errors
    ///
    /// Returns `Validation` listing every problem found
    pub fn validate(&self, config: &ConfigMap) -> Result<()> {
        let errors = self.errors(config);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation(errors.join("; ")))
        }
    }
}

/// Convert a validated map into a plugin's typed config struct
///
/// # Errors
///
/// Returns `Validation` if the map does not fit `T`
pub fn decode_config<T: DeserializeOwned>(config: &ConfigMap) -> Result<T> {
    serde_json::from_value(Value::Object(config.clone()))
        .map_err(|e| Error::Validation(format!("invalid config: {e}")))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn schema() -> ConfigSchema {
        ConfigSchema::default()
            .required("repo", FieldKind::String, "target repository")
            .optional("depth", FieldKind::Integer, "history depth")
    }

    fn map(value: Value) -> ConfigMap {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_valid_config() {
        assert!(schema().validate(&map(json!({ "repo": "fleet" }))).is_ok());
        assert!(schema()
            .validate(&map(json!({ "repo": "fleet", "depth": 3 })))
            .is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let errors = schema().errors(&map(json!({ "depth": "deep", "extra": 1 })));
        assert_eq!(errors.len(), 3);
        assert!(errors.iter().any(|e| e.contains("missing required field 'repo'")));
        assert!(errors.iter().any(|e| e.contains("'depth' must be of type integer")));
        assert!(errors.iter().any(|e| e.contains("unknown field 'extra'")));
    }

    #[test]
    fn test_null_counts_as_absent() {
        let err = schema().validate(&map(json!({ "repo": null }))).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_decode_config() {
        #[derive(Deserialize)]
        struct Typed {
            repo: String,
            #[serde(default)]
            depth: u32,
        }

        let typed: Typed = decode_config(&map(json!({ "repo": "fleet" }))).unwrap();
        assert_eq!(typed.repo, "fleet");
        assert_eq!(typed.depth, 0);
    }
}
