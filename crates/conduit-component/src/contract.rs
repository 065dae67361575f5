//! The component contract.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::definition::Definition;
use crate::dispatcher::TaskHandler;
use crate::error::ComponentError;
use crate::executor::BatchExecutor;
use crate::job::Job;

/// Setup fields supplied by the recipe for one component node.
pub type Setup = Map<String, Value>;

/// Everything needed to bind a component to one task.
#[derive(Debug, Clone)]
pub struct ExecutionParams {
  /// Recipe node the execution serves, for error context and logs.
  pub component_id: String,
  pub task: String,
  pub setup: Setup,
  /// Batch strategy for the execution.
  pub executor: BatchExecutor,
}

impl ExecutionParams {
  pub fn new(component_id: impl Into<String>, task: impl Into<String>, setup: Setup) -> Self {
    Self {
      component_id: component_id.into(),
      task: task.into(),
      setup,
      executor: BatchExecutor::sequential(),
    }
  }

  pub fn with_executor(mut self, executor: BatchExecutor) -> Self {
    self.executor = executor;
    self
  }

  /// A setup string field, if present.
  pub fn setup_str(&self, field: &str) -> Option<&str> {
    self.setup.get(field).and_then(Value::as_str)
  }
}

/// A pluggable connector or operator.
///
/// Implementations hold their [`Definition`], loaded once at construction,
/// and build a fresh [`Execution`] per trigger node.
pub trait Component: Send + Sync {
  fn definition(&self) -> &Definition;

  /// Build any client the task needs from `params.setup` and resolve
  /// `params.task` to its handler.
  fn create_execution(&self, params: ExecutionParams) -> Result<Box<dyn Execution>, ComponentError>;
}

/// A component bound to one task.
#[async_trait]
pub trait Execution: Send + Sync {
  fn task(&self) -> &str;

  /// Run the bound handler once per job.
  ///
  /// Per-job failures go to each job's error sink. An error here means the
  /// whole batch is invalid, e.g. it was cancelled.
  async fn execute(&self, cancel: &CancellationToken, jobs: Vec<Job>) -> Result<(), ComponentError>;
}

/// The standard [`Execution`]: one resolved handler fed by a [`BatchExecutor`].
pub struct TaskExecution {
  task: String,
  handler: Arc<dyn TaskHandler>,
  executor: BatchExecutor,
}

impl TaskExecution {
  pub fn new(params: &ExecutionParams, handler: Arc<dyn TaskHandler>) -> Self {
    Self {
      task: params.task.clone(),
      handler,
      executor: params.executor,
    }
  }
}

#[async_trait]
impl Execution for TaskExecution {
  fn task(&self) -> &str {
    &self.task
  }

  async fn execute(&self, cancel: &CancellationToken, jobs: Vec<Job>) -> Result<(), ComponentError> {
    self
      .executor
      .run(cancel, jobs, self.handler.clone())
      .await
      .map(|_| ())
  }
}
