//! JSON schemas for setup, job input and job output.
//!
//! Schemas are compiled once, when a component definition is loaded. A
//! schema that does not compile makes the definition invalid.

use std::sync::Arc;

use jsonschema::Validator;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// A compiled JSON schema together with its source document.
#[derive(Clone)]
pub struct Schema {
  source: Value,
  validator: Arc<Validator>,
}

impl Schema {
  pub fn compile(source: Value) -> Result<Self, String> {
    let validator = jsonschema::validator_for(&source).map_err(|e| e.to_string())?;
    Ok(Self {
      source,
      validator: Arc::new(validator),
    })
  }

  pub fn source(&self) -> &Value {
    &self.source
  }

  /// Check `instance`, reporting every violation in one message.
  pub fn validate(&self, instance: &Value) -> Result<(), String> {
    let errors: Vec<String> = self
      .validator
      .iter_errors(instance)
      .map(|e| e.to_string())
      .collect();

    if errors.is_empty() {
      Ok(())
    } else {
      Err(errors.join("; "))
    }
  }

  /// Names listed under the top-level `required` keyword.
  pub fn required(&self) -> impl Iterator<Item = &str> {
    self
      .source
      .get("required")
      .and_then(Value::as_array)
      .into_iter()
      .flatten()
      .filter_map(Value::as_str)
  }
}

impl std::fmt::Debug for Schema {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_tuple("Schema").field(&self.source).finish()
  }
}

impl PartialEq for Schema {
  fn eq(&self, other: &Self) -> bool {
    self.source == other.source
  }
}

impl Serialize for Schema {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    self.source.serialize(serializer)
  }
}

impl<'de> Deserialize<'de> for Schema {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let source = Value::deserialize(deserializer)?;
    Schema::compile(source).map_err(serde::de::Error::custom)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn schema() -> Schema {
    Schema::compile(json!({
      "type": "object",
      "required": ["name"],
      "properties": {
        "name": { "type": "string", "minLength": 2 },
        "tags": { "type": "array", "items": { "type": "string" } },
        "mode": { "enum": ["fast", "slow"] }
      }
    }))
    .unwrap()
  }

  #[test]
  fn test_valid_value() {
    let value = json!({ "name": "ada", "tags": ["x"], "mode": "fast" });
    assert!(schema().validate(&value).is_ok());
  }

  #[test]
  fn test_reports_every_violation() {
    let err = schema()
      .validate(&json!({ "name": "a", "tags": [1], "mode": "medium" }))
      .unwrap_err();
    assert_eq!(err.split("; ").count(), 3);
  }

  #[test]
  fn test_missing_required() {
    let err = schema().validate(&json!({})).unwrap_err();
    assert!(err.contains("\"name\""));
  }

  #[test]
  fn test_rejects_malformed_schema() {
    assert!(Schema::compile(json!({ "type": 3 })).is_err());
    assert!(Schema::compile(json!({ "minLength": "two" })).is_err());
  }

  #[test]
  fn test_required_names() {
    assert_eq!(schema().required().collect::<Vec<_>>(), vec!["name"]);
  }

  #[test]
  fn test_deserialize_compiles() {
    let parsed: Schema = serde_json::from_value(json!({ "type": "string" })).unwrap();
    assert!(parsed.validate(&json!("ok")).is_ok());
    assert!(parsed.validate(&json!(1)).is_err());

    let err = serde_json::from_value::<Schema>(json!({ "type": "strnig" })).unwrap_err();
    assert!(!err.to_string().is_empty());
  }
}
