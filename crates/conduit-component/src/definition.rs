//! Static component metadata.
//!
//! A definition is built from three JSON documents shipped with a component:
//!
//! ```text
//! definition.json  { "id": "json", "title": "JSON", "tasks": ["TASK_MARSHAL"] }
//! setup.json       JSON schema of the setup object (optional)
//! tasks.json       { "TASK_MARSHAL": { "input": {...}, "output": {...} } }
//! ```
//!
//! Definitions are loaded once when a component is constructed and shared
//! read-only by every execution of that component.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ComponentError;
use crate::schema::Schema;

/// Input and output schema of one task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskSchema {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub input: Option<Schema>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub output: Option<Schema>,
}

#[derive(Debug, Deserialize)]
struct DefinitionHeader {
  id: String,
  #[serde(default)]
  title: Option<String>,
  #[serde(default)]
  version: Option<String>,
  tasks: Vec<String>,
}

/// Validated static metadata of a component.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Definition {
  pub id: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub title: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub version: Option<String>,
  /// Declared tasks, in declaration order.
  pub tasks: Vec<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub setup_schema: Option<Schema>,
  pub task_schemas: BTreeMap<String, TaskSchema>,
}

impl Definition {
  /// Parse and validate a definition.
  ///
  /// `setup_json` may be `None` for components without setup.
  pub fn load(
    definition_json: &str,
    setup_json: Option<&str>,
    tasks_json: &str,
  ) -> Result<Self, ComponentError> {
    let header: DefinitionHeader = serde_json::from_str(definition_json)
      .map_err(|e| ComponentError::invalid_definition(format!("definition: {}", e)))?;

    if header.id.trim().is_empty() {
      return Err(ComponentError::invalid_definition("definition: empty id"));
    }
    if header.tasks.is_empty() {
      return Err(ComponentError::invalid_definition(format!(
        "definition '{}': no tasks declared",
        header.id
      )));
    }
    let mut seen = BTreeSet::new();
    for task in &header.tasks {
      if !seen.insert(task.as_str()) {
        return Err(ComponentError::invalid_definition(format!(
          "definition '{}': task '{}' declared twice",
          header.id, task
        )));
      }
    }

    let setup_schema = match setup_json {
      Some(json) => {
        let source: Value = serde_json::from_str(json).map_err(|e| {
          ComponentError::invalid_definition(format!("setup of '{}': {}", header.id, e))
        })?;
        let schema = Schema::compile(source).map_err(|e| {
          ComponentError::invalid_definition(format!("setup of '{}': {}", header.id, e))
        })?;
        Some(schema)
      }
      None => None,
    };

    let task_schemas: BTreeMap<String, TaskSchema> = serde_json::from_str(tasks_json)
      .map_err(|e| ComponentError::invalid_definition(format!("tasks of '{}': {}", header.id, e)))?;

    if let Some(task) = header.tasks.iter().find(|t| !task_schemas.contains_key(*t)) {
      return Err(ComponentError::invalid_definition(format!(
        "tasks of '{}': no schema for declared task '{}'",
        header.id, task
      )));
    }
    if let Some(extra) = task_schemas.keys().find(|t| !seen.contains(t.as_str())) {
      return Err(ComponentError::invalid_definition(format!(
        "tasks of '{}': schema for undeclared task '{}'",
        header.id, extra
      )));
    }

    Ok(Self {
      id: header.id,
      title: header.title,
      version: header.version,
      tasks: header.tasks,
      setup_schema,
      task_schemas,
    })
  }

  /// Load a definition bundled with a component.
  ///
  /// # Panics
  ///
  /// Panics if the definition is malformed. Bundled definitions are part of
  /// the build, so this is a startup failure, not a request error.
  pub fn must_load(definition_json: &str, setup_json: Option<&str>, tasks_json: &str) -> Self {
    match Self::load(definition_json, setup_json, tasks_json) {
      Ok(definition) => definition,
      Err(e) => panic!("failed to load component definition: {}", e),
    }
  }

  /// Whether the component declares this task.
  pub fn declares(&self, task: &str) -> bool {
    self.tasks.iter().any(|t| t == task)
  }

  pub fn task_schema(&self, task: &str) -> Option<&TaskSchema> {
    self.task_schemas.get(task)
  }

  /// Check setup against the setup schema.
  ///
  /// Required string fields must also be non-empty, so an empty credential
  /// is rejected the same way as a missing one.
  pub fn validate_setup(&self, setup: &Value) -> Result<(), ComponentError> {
    let Some(setup_schema) = &self.setup_schema else {
      return Ok(());
    };

    setup_schema
      .validate(setup)
      .map_err(|message| ComponentError::invalid_setup(&self.id, message))?;

    for field in setup_schema.required() {
      if setup.get(field).and_then(Value::as_str).is_some_and(|s| s.trim().is_empty()) {
        return Err(ComponentError::invalid_setup(
          &self.id,
          format!("required field '{}' is empty", field),
        ));
      }
    }

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  const DEFINITION: &str = r#"{ "id": "issues", "title": "Issues", "tasks": ["TASK_CREATE", "TASK_LIST"] }"#;
  const SETUP: &str = r#"{
    "type": "object",
    "required": ["token"],
    "properties": { "token": { "type": "string" }, "base-url": { "type": "string" } }
  }"#;
  const TASKS: &str = r#"{
    "TASK_CREATE": { "input": { "type": "object", "required": ["title"] } },
    "TASK_LIST": {}
  }"#;

  #[test]
  fn test_load() {
    let definition = Definition::load(DEFINITION, Some(SETUP), TASKS).unwrap();
    assert_eq!(definition.id, "issues");
    assert!(definition.declares("TASK_LIST"));
    assert!(!definition.declares("TASK_DELETE"));
    assert!(definition.task_schema("TASK_CREATE").unwrap().input.is_some());
  }

  #[test]
  fn test_load_rejects_missing_task_schema() {
    let err = Definition::load(DEFINITION, None, r#"{ "TASK_CREATE": {} }"#).unwrap_err();
    assert!(err.to_string().contains("no schema for declared task 'TASK_LIST'"));
  }

  #[test]
  fn test_load_rejects_undeclared_task_schema() {
    let tasks = r#"{ "TASK_CREATE": {}, "TASK_LIST": {}, "TASK_DELETE": {} }"#;
    let err = Definition::load(DEFINITION, None, tasks).unwrap_err();
    assert!(err.to_string().contains("undeclared task 'TASK_DELETE'"));
  }

  #[test]
  fn test_load_rejects_bad_schema() {
    let err = Definition::load(DEFINITION, Some(r#"{ "type": 3 }"#), TASKS).unwrap_err();
    assert!(matches!(err, ComponentError::InvalidDefinition { .. }));
  }

  #[test]
  fn test_load_rejects_bad_task_schema() {
    let tasks = r#"{ "TASK_CREATE": { "input": { "minLength": -1 } }, "TASK_LIST": {} }"#;
    let err = Definition::load(DEFINITION, None, tasks).unwrap_err();
    assert!(matches!(err, ComponentError::InvalidDefinition { .. }));
    assert!(err.to_string().contains("tasks of 'issues'"));
  }

  #[test]
  fn test_load_rejects_duplicate_task() {
    let definition = r#"{ "id": "x", "tasks": ["TASK_A", "TASK_A"] }"#;
    let err = Definition::load(definition, None, r#"{ "TASK_A": {} }"#).unwrap_err();
    assert!(err.to_string().contains("declared twice"));
  }

  #[test]
  #[should_panic(expected = "failed to load component definition")]
  fn test_must_load_panics() {
    Definition::must_load("not json", None, "{}");
  }

  #[test]
  fn test_validate_setup() {
    let definition = Definition::load(DEFINITION, Some(SETUP), TASKS).unwrap();
    assert!(definition.validate_setup(&json!({ "token": "abc" })).is_ok());

    let err = definition.validate_setup(&json!({})).unwrap_err();
    assert!(matches!(err, ComponentError::InvalidSetup { .. }));

    let err = definition.validate_setup(&json!({ "token": "  " })).unwrap_err();
    assert!(err.to_string().contains("required field 'token' is empty"));

    let err = definition.validate_setup(&json!({ "token": 42 })).unwrap_err();
    assert!(matches!(err, ComponentError::InvalidSetup { .. }));
  }

  #[test]
  fn test_validate_setup_applies_every_keyword() {
    let setup = r#"{
      "properties": {
        "token": { "type": "string", "minLength": 8 },
        "region": { "enum": ["us", "eu"] }
      },
      "required": ["token"]
    }"#;
    let definition = Definition::load(DEFINITION, Some(setup), TASKS).unwrap();

    assert!(definition.validate_setup(&json!({ "token": "abcdefgh", "region": "eu" })).is_ok());

    let err = definition
      .validate_setup(&json!({ "token": "x", "region": "mars" }))
      .unwrap_err();
    let ComponentError::InvalidSetup { component, message } = err else {
      panic!("expected invalid setup");
    };
    assert_eq!(component, "issues");
    assert!(message.contains("\"x\""));
    assert!(message.contains("\"mars\""));
  }
}
