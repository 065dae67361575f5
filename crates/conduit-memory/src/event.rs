//! Trigger lifecycle events.
//!
//! Events are published to a trigger's workflow memory and fanned out to
//! every subscriber, e.g. a server-sent-event stream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event names, serialized as `SCREAMING_SNAKE_CASE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
  PipelineStatusUpdated,
  PipelineOutputUpdated,
  PipelineErrorUpdated,
  /// Terminal event. Nothing is published after it.
  PipelineClosed,
  ComponentStatusUpdated,
  ComponentInputUpdated,
  ComponentOutputUpdated,
  ComponentErrorUpdated,
}

impl EventKind {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::PipelineStatusUpdated => "PIPELINE_STATUS_UPDATED",
      Self::PipelineOutputUpdated => "PIPELINE_OUTPUT_UPDATED",
      Self::PipelineErrorUpdated => "PIPELINE_ERROR_UPDATED",
      Self::PipelineClosed => "PIPELINE_CLOSED",
      Self::ComponentStatusUpdated => "COMPONENT_STATUS_UPDATED",
      Self::ComponentInputUpdated => "COMPONENT_INPUT_UPDATED",
      Self::ComponentOutputUpdated => "COMPONENT_OUTPUT_UPDATED",
      Self::ComponentErrorUpdated => "COMPONENT_ERROR_UPDATED",
    }
  }

  /// Component events are only published for streaming triggers.
  pub fn is_component_event(self) -> bool {
    matches!(
      self,
      Self::ComponentStatusUpdated
        | Self::ComponentInputUpdated
        | Self::ComponentOutputUpdated
        | Self::ComponentErrorUpdated
    )
  }
}

impl std::fmt::Display for EventKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Error payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorData {
  pub message: String,
}

/// Event payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventData {
  pub update_time: DateTime<Utc>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub batch_index: Option<usize>,
  #[serde(default, rename = "componentID", skip_serializing_if = "Option::is_none")]
  pub component_id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub status: Option<Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub input: Option<Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub output: Option<Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<ErrorData>,
}

impl EventData {
  pub fn now() -> Self {
    Self {
      update_time: Utc::now(),
      batch_index: None,
      component_id: None,
      status: None,
      input: None,
      output: None,
      error: None,
    }
  }

  pub fn batch(mut self, index: usize) -> Self {
    self.batch_index = Some(index);
    self
  }

  pub fn component(mut self, component_id: impl Into<String>) -> Self {
    self.component_id = Some(component_id.into());
    self
  }
}

/// One published event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
  pub name: EventKind,
  pub data: EventData,
}

impl Event {
  pub fn new(name: EventKind, data: EventData) -> Self {
    Self { name, data }
  }

  pub fn is_closed(&self) -> bool {
    self.name == EventKind::PipelineClosed
  }
}

/// Per-record component status flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentStatus {
  #[serde(default)]
  pub started: bool,
  #[serde(default)]
  pub skipped: bool,
  #[serde(default)]
  pub errored: bool,
  #[serde(default)]
  pub completed: bool,
}

impl ComponentStatus {
  /// The record never reaches the component's outputs.
  pub fn is_blocked(&self) -> bool {
    self.skipped || self.errored
  }
}

/// Trigger-level status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStatus {
  pub started: bool,
  pub errored: bool,
  pub completed: bool,
}
