//! The `json` operator: converts between JSON values and strings and edits
//! JSON documents in place.

use conduit_component::{
  Component, ComponentError, Definition, Execution, ExecutionParams, JobError, TaskExecution,
  TaskTable, handler_fn,
};
use serde_json::{Map, Value, json};
use tracing::debug;

mod edit;

pub use edit::{ConflictResolution, Update, apply_updates};

pub const TASK_MARSHAL: &str = "TASK_MARSHAL";
pub const TASK_UNMARSHAL: &str = "TASK_UNMARSHAL";
pub const TASK_EDIT_VALUES: &str = "TASK_EDIT_VALUES";

const DEFINITION_JSON: &str = include_str!("config/definition.json");
const TASKS_JSON: &str = include_str!("config/tasks.json");

/// In-process JSON operator. Needs no setup.
pub struct JsonOperator {
  definition: Definition,
}

impl Default for JsonOperator {
  fn default() -> Self {
    Self::new()
  }
}

impl JsonOperator {
  pub fn new() -> Self {
    Self {
      definition: Definition::must_load(DEFINITION_JSON, None, TASKS_JSON),
    }
  }
}

impl Component for JsonOperator {
  fn definition(&self) -> &Definition {
    &self.definition
  }

  fn create_execution(&self, params: ExecutionParams) -> Result<Box<dyn Execution>, ComponentError> {
    let handler = TaskTable::new(&self.definition)
      .route(TASK_MARSHAL, handler_fn(|input: Value| async move { marshal(input) }))
      .route(TASK_UNMARSHAL, handler_fn(|input: Value| async move { unmarshal(input) }))
      .route(TASK_EDIT_VALUES, handler_fn(|input: Value| async move { edit_values(input) }))
      .resolve(&params.task)?;
    debug!(component_id = %params.component_id, task = %params.task, "json_execution_created");
    Ok(Box::new(TaskExecution::new(&params, handler)))
  }
}

fn marshal(input: Value) -> Result<Value, JobError> {
  let string = serde_json::to_string(&input["json"])
    .map_err(|e| JobError::new(format!("Couldn't convert the provided object to JSON. {}", e)))?;
  Ok(json!({ "string": string }))
}

fn unmarshal(input: Value) -> Result<Value, JobError> {
  let string = input["string"].as_str().unwrap_or_default();
  let value: Value = serde_json::from_str(string).map_err(|e| {
    JobError::new(format!(
      "Couldn't parse the JSON string. Please check the syntax is correct. {}",
      e
    ))
  })?;
  Ok(json!({ "json": value }))
}

fn edit_values(mut input: Value) -> Result<Value, JobError> {
  let resolution = match input.get("conflictResolution").and_then(Value::as_str) {
    None => ConflictResolution::Skip,
    Some(name) => ConflictResolution::from_name(name)
      .ok_or_else(|| JobError::new(format!("unknown conflict resolution '{}'", name)))?,
  };
  let dot_notation = input
    .get("supportDotNotation")
    .and_then(Value::as_bool)
    .unwrap_or(true);
  let updates: Vec<Update> = serde_json::from_value(input["updates"].take())?;

  let mut data = input["data"].take();
  if let Value::Array(items) = &mut data {
    for (i, item) in items.iter_mut().enumerate() {
      apply_updates(item, &updates, dot_notation, resolution)
        .map_err(|e| JobError::new(format!("Error in object {}: {}", i, e)))?;
    }
  } else if data.is_object() {
    apply_updates(&mut data, &updates, dot_notation, resolution)
      .map_err(|e| JobError::new(format!("Error in single object: {}", e)))?;
  } else {
    return Err(JobError::new("data must be an object or an array of objects"));
  }

  let mut output = Map::new();
  output.insert("data".to_string(), data);
  Ok(Value::Object(output))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_definition_loads() {
    let operator = JsonOperator::new();
    assert_eq!(operator.definition().id, "json");
    assert!(operator.definition().declares(TASK_MARSHAL));
    assert!(!operator.definition().declares("TASK_JQ"));
  }

  #[test]
  fn test_marshal() {
    let output = marshal(json!({ "json": { "a": [1, 2] } })).unwrap();
    assert_eq!(output, json!({ "string": "{\"a\":[1,2]}" }));
  }

  #[test]
  fn test_unmarshal() {
    let output = unmarshal(json!({ "string": "{\"a\": true}" })).unwrap();
    assert_eq!(output, json!({ "json": { "a": true } }));

    let err = unmarshal(json!({ "string": "{oops" })).unwrap_err();
    assert!(err.message().starts_with("Couldn't parse the JSON string."));
  }

  #[test]
  fn test_edit_values_over_array() {
    let output = edit_values(json!({
      "data": [{ "user": { "name": "a" } }, { "user": { "name": "b" } }],
      "updates": [{ "field": "user.name", "newValue": "z" }],
    }))
    .unwrap();
    assert_eq!(
      output,
      json!({ "data": [{ "user": { "name": "z" } }, { "user": { "name": "z" } }] })
    );
  }

  #[test]
  fn test_edit_values_rejects_scalar_data() {
    let err = edit_values(json!({ "data": 3, "updates": [] })).unwrap_err();
    assert_eq!(err.message(), "data must be an object or an array of objects");
  }

  #[test]
  fn test_unsupported_task() {
    let result = JsonOperator::new().create_execution(ExecutionParams::new(
      "j",
      "TASK_JQ",
      Default::default(),
    ));
    assert!(matches!(result, Err(ComponentError::UnsupportedTask { .. })));
  }
}
