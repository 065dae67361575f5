//! Trigger request and result types.

use std::collections::BTreeMap;
use std::sync::Arc;

use conduit_recipe::Recipe;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One trigger invocation of a compiled recipe.
#[derive(Debug, Clone)]
pub struct TriggerRequest {
  pub recipe: Arc<Recipe>,
  /// One variable object per input record.
  pub records: Vec<Value>,
  pub secrets: Map<String, Value>,
  pub connections: Map<String, Value>,
  /// Attach per-component traces to the result.
  pub return_traces: bool,
}

impl TriggerRequest {
  pub fn new(recipe: Arc<Recipe>, records: Vec<Value>) -> Self {
    Self {
      recipe,
      records,
      secrets: Map::new(),
      connections: Map::new(),
      return_traces: false,
    }
  }

  pub fn with_secrets(mut self, secrets: Map<String, Value>) -> Self {
    self.secrets = secrets;
    self
  }

  pub fn with_connections(mut self, connections: Map<String, Value>) -> Self {
    self.connections = connections;
    self
  }

  pub fn with_traces(mut self, return_traces: bool) -> Self {
    self.return_traces = return_traces;
    self
  }
}

/// Per-record status of one component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TraceStatus {
  Completed,
  Skipped,
  Error,
  /// Never ran, e.g. the trigger was cut short.
  Pending,
}

/// What one component did for every record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
  pub statuses: Vec<TraceStatus>,
  pub inputs: Vec<Value>,
  pub outputs: Vec<Value>,
  pub errors: Vec<Option<String>>,
}

/// Result of a complete trigger.
///
/// Records are independent: `outputs[i]` and `errors[i]` belong to input
/// record `i`, and a record may carry both partial outputs and errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerOutput {
  pub trigger_id: String,
  /// Rendered pipeline output per record.
  pub outputs: Vec<Value>,
  /// Component ID to error message, per record.
  pub errors: Vec<BTreeMap<String, String>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub traces: Option<BTreeMap<String, Trace>>,
}

impl TriggerOutput {
  /// Whether any record carries an error.
  pub fn has_errors(&self) -> bool {
    self.errors.iter().any(|e| !e.is_empty())
  }
}
