//! Component error types.

use thiserror::Error;

/// Errors raised by the component contract.
///
/// Per-job failures are [`JobError`]s and never surface here.
#[derive(Debug, Error)]
pub enum ComponentError {
  /// The task is not among the component's declared tasks.
  #[error("component '{component}' does not support task '{task}'")]
  UnsupportedTask { component: String, task: String },

  /// Required setup is missing or malformed.
  #[error("invalid setup for component '{component}': {message}")]
  InvalidSetup { component: String, message: String },

  /// A component definition failed to load.
  #[error("invalid component definition: {message}")]
  InvalidDefinition { message: String },

  /// No component with this definition ID is registered.
  #[error("component '{0}' is not registered")]
  UnknownComponent(String),

  /// A component with this definition ID is already registered.
  #[error("component '{0}' is already registered")]
  DuplicateComponent(String),

  /// The batch was cancelled before every job ran.
  #[error("execution cancelled")]
  Cancelled,

  /// The whole batch failed.
  #[error("{message}")]
  Batch { message: String },
}

impl ComponentError {
  pub fn invalid_definition(message: impl Into<String>) -> Self {
    Self::InvalidDefinition {
      message: message.into(),
    }
  }

  pub fn invalid_setup(component: impl Into<String>, message: impl Into<String>) -> Self {
    Self::InvalidSetup {
      component: component.into(),
      message: message.into(),
    }
  }
}

/// A failure recorded against a single job.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct JobError {
  message: String,
}

impl JobError {
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      message: message.into(),
    }
  }

  pub fn cancelled() -> Self {
    Self::new("execution cancelled")
  }

  pub fn message(&self) -> &str {
    &self.message
  }
}

impl From<serde_json::Error> for JobError {
  fn from(e: serde_json::Error) -> Self {
    Self::new(e.to_string())
  }
}
