use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Component type of iterator nodes.
pub const ITERATOR_TYPE: &str = "iterator";

/// A single component node in a recipe.
///
/// Iterator nodes (`"type": "iterator"`) have no task. They run their nested
/// `component` map once per element of `input`, or once per index of
/// `range` when there is no input, and gather `outputElements` into arrays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentDef {
  /// Component definition ID in the registry, e.g. "json"
  #[serde(rename = "type")]
  pub component_type: String,

  /// Task identifier, e.g. "TASK_MARSHAL"
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub task: String,

  /// Input template. May contain `${...}` references.
  #[serde(default)]
  pub input: serde_json::Value,

  /// Setup template, rendered once per trigger against secrets and
  /// connections.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub setup: Option<serde_json::Value>,

  /// Optional expression deciding whether the component runs for a record.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub condition: Option<String>,

  /// Iterator range: `[start, stop]`, `[start, stop, step]` or an object
  /// with `start`, `stop` and optional `step`. Values may be references.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub range: Option<serde_json::Value>,

  /// Name the current range index is exposed under. Defaults to `i`.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub index: Option<String>,

  /// Components an iterator runs per element.
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub component: BTreeMap<String, ComponentDef>,

  /// Iterator output field to per-element template.
  #[serde(
    default,
    rename = "outputElements",
    alias = "output-elements",
    skip_serializing_if = "BTreeMap::is_empty"
  )]
  pub output_elements: BTreeMap<String, String>,
}

impl ComponentDef {
  pub fn is_iterator(&self) -> bool {
    self.component_type == ITERATOR_TYPE
  }
}
