use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::component::ComponentDef;

/// A pipeline recipe as written by the user.
///
/// Maps are ordered so that a recipe serializes the same way every time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeDef {
  #[serde(default = "default_version")]
  pub version: String,
  #[serde(default)]
  pub variable: BTreeMap<String, VariableDef>,
  #[serde(default)]
  pub component: BTreeMap<String, ComponentDef>,
  #[serde(default)]
  pub output: BTreeMap<String, OutputDef>,
}

fn default_version() -> String {
  "v1beta".to_string()
}

/// A trigger variable declaration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariableDef {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub title: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  /// Free-form format hint, e.g. "string" or "json"
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub format: Option<String>,
}

/// A pipeline output field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputDef {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub title: Option<String>,
  /// Value template, usually a single reference such as `${comp.output.text}`
  pub value: serde_json::Value,
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_parse_recipe() {
    let recipe: RecipeDef = serde_json::from_value(json!({
      "variable": { "name": { "title": "Name", "format": "string" } },
      "component": {
        "greet": {
          "type": "json",
          "task": "TASK_MARSHAL",
          "input": { "json": { "hello": "${variable.name}" } },
          "condition": "${variable.name} != \"\""
        }
      },
      "output": { "greeting": { "value": "${greet.output.string}" } }
    }))
    .unwrap();

    assert_eq!(recipe.version, "v1beta");
    assert_eq!(recipe.variable["name"].format.as_deref(), Some("string"));
    let greet = &recipe.component["greet"];
    assert_eq!(greet.component_type, "json");
    assert_eq!(greet.task, "TASK_MARSHAL");
    assert!(greet.setup.is_none());
    assert_eq!(greet.condition.as_deref(), Some("${variable.name} != \"\""));
    assert_eq!(recipe.output["greeting"].value, json!("${greet.output.string}"));
  }

  #[test]
  fn test_empty_sections_default() {
    let recipe: RecipeDef = serde_json::from_value(json!({})).unwrap();
    assert!(recipe.variable.is_empty());
    assert!(recipe.component.is_empty());
    assert!(recipe.output.is_empty());
  }

  #[test]
  fn test_component_requires_type() {
    let result: Result<RecipeDef, _> = serde_json::from_value(json!({
      "component": { "a": { "task": "TASK_X" } }
    }));
    assert!(result.is_err());
  }

  #[test]
  fn test_parse_iterator() {
    let recipe: RecipeDef = serde_json::from_value(json!({
      "variable": { "items": {} },
      "component": {
        "each": {
          "type": "iterator",
          "input": "${variable.items}",
          "component": {
            "encode": {
              "type": "json",
              "task": "TASK_MARSHAL",
              "input": { "json": "${each.element}" }
            }
          },
          "output-elements": { "texts": "${encode.output.string}" }
        }
      }
    }))
    .unwrap();

    let each = &recipe.component["each"];
    assert!(each.is_iterator());
    assert!(each.task.is_empty());
    assert_eq!(each.component["encode"].task, "TASK_MARSHAL");
    assert_eq!(each.output_elements["texts"], "${encode.output.string}");
    assert!(!each.component["encode"].is_iterator());
  }
}
