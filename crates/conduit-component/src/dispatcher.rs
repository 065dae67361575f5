//! Task dispatch.
//!
//! A [`TaskTable`] maps each declared task of a component to one handler.
//! Components build a table in `create_execution` and resolve the requested
//! task once; the resolved handler then serves every job of the batch.
//! There is no fallback: an unknown or unrouted task is an error.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::definition::{Definition, TaskSchema};
use crate::error::{ComponentError, JobError};

/// Turns one input record into one output record.
///
/// `cancel` fires when the batch is cancelled. Handlers that start work of
/// their own should stop it then; the handler task itself is aborted.
#[async_trait]
pub trait TaskHandler: Send + Sync {
  async fn handle(&self, cancel: CancellationToken, input: Value) -> Result<Value, JobError>;
}

/// A [`TaskHandler`] backed by an async function of the input.
#[derive(Clone)]
pub struct HandlerFn<F> {
  f: F,
}

/// Wrap an async function as a [`TaskHandler`].
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
  F: Fn(Value) -> Fut + Send + Sync,
  Fut: Future<Output = Result<Value, JobError>> + Send,
{
  HandlerFn { f }
}

#[async_trait]
impl<F, Fut> TaskHandler for HandlerFn<F>
where
  F: Fn(Value) -> Fut + Send + Sync,
  Fut: Future<Output = Result<Value, JobError>> + Send,
{
  async fn handle(&self, _cancel: CancellationToken, input: Value) -> Result<Value, JobError> {
    (self.f)(input).await
  }
}

/// A [`TaskHandler`] backed by an async function that observes cancellation.
#[derive(Clone)]
pub struct CancellableFn<F> {
  f: F,
}

/// Wrap an async function of the cancel token and the input.
pub fn cancellable_fn<F, Fut>(f: F) -> CancellableFn<F>
where
  F: Fn(CancellationToken, Value) -> Fut + Send + Sync,
  Fut: Future<Output = Result<Value, JobError>> + Send,
{
  CancellableFn { f }
}

#[async_trait]
impl<F, Fut> TaskHandler for CancellableFn<F>
where
  F: Fn(CancellationToken, Value) -> Fut + Send + Sync,
  Fut: Future<Output = Result<Value, JobError>> + Send,
{
  async fn handle(&self, cancel: CancellationToken, input: Value) -> Result<Value, JobError> {
    (self.f)(cancel, input).await
  }
}

/// Validates input and output against the task schema around a handler.
struct Validated {
  inner: Arc<dyn TaskHandler>,
  schema: TaskSchema,
}

#[async_trait]
impl TaskHandler for Validated {
  async fn handle(&self, cancel: CancellationToken, input: Value) -> Result<Value, JobError> {
    if let Some(input_schema) = &self.schema.input {
      input_schema
        .validate(&input)
        .map_err(|e| JobError::new(format!("invalid input: {}", e)))?;
    }
    let output = self.inner.handle(cancel, input).await?;
    if let Some(output_schema) = &self.schema.output {
      output_schema
        .validate(&output)
        .map_err(|e| JobError::new(format!("invalid output: {}", e)))?;
    }
    Ok(output)
  }
}

/// Task identifier to handler table of one component.
pub struct TaskTable<'d> {
  definition: &'d Definition,
  handlers: BTreeMap<String, Arc<dyn TaskHandler>>,
}

impl<'d> TaskTable<'d> {
  pub fn new(definition: &'d Definition) -> Self {
    Self {
      definition,
      handlers: BTreeMap::new(),
    }
  }

  /// Route a task to a handler.
  pub fn route(mut self, task: &str, handler: impl TaskHandler + 'static) -> Self {
    self.handlers.insert(task.to_string(), Arc::new(handler));
    self
  }

  /// Resolve a task to its handler, wrapped with schema validation.
  pub fn resolve(&self, task: &str) -> Result<Arc<dyn TaskHandler>, ComponentError> {
    let handler = self
      .handlers
      .get(task)
      .filter(|_| self.definition.declares(task))
      .ok_or_else(|| ComponentError::UnsupportedTask {
        component: self.definition.id.clone(),
        task: task.to_string(),
      })?;

    match self.definition.task_schema(task) {
      Some(task_schema) if task_schema.input.is_some() || task_schema.output.is_some() => {
        Ok(Arc::new(Validated {
          inner: handler.clone(),
          schema: task_schema.clone(),
        }))
      }
      _ => Ok(handler.clone()),
    }
  }
}
