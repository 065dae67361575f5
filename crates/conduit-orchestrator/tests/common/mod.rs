//! Shared fixtures: test components and recipe helpers.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use conduit_component::{
  Component, ComponentError, ComponentRegistry, Definition, Execution, ExecutionParams, Job,
  JobError, TaskExecution, TaskTable, handler_fn,
};
use conduit_config::RecipeDef;
use conduit_memory::MemoryStore;
use conduit_orchestrator::{Orchestrator, TriggerService};
use conduit_recipe::Recipe;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Passes its input through once the test opens the gate.
pub struct Gate {
  definition: Definition,
  permits: Arc<Semaphore>,
}

impl Gate {
  pub fn new(permits: Arc<Semaphore>) -> Self {
    Self {
      definition: Definition::must_load(
        r#"{ "id": "gate", "tasks": ["TASK_WAIT"] }"#,
        None,
        r#"{ "TASK_WAIT": {} }"#,
      ),
      permits,
    }
  }
}

impl Component for Gate {
  fn definition(&self) -> &Definition {
    &self.definition
  }

  fn create_execution(&self, params: ExecutionParams) -> Result<Box<dyn Execution>, ComponentError> {
    let permits = self.permits.clone();
    let handler = TaskTable::new(&self.definition)
      .route(
        "TASK_WAIT",
        handler_fn(move |input: Value| {
          let permits = permits.clone();
          async move {
            permits
              .acquire()
              .await
              .map_err(|e| JobError::new(e.to_string()))?
              .forget();
            Ok(input)
          }
        }),
      )
      .resolve(&params.task)?;
    Ok(Box::new(TaskExecution::new(&params, handler)))
  }
}

/// Fails every batch as a whole without touching its jobs.
pub struct Broken {
  definition: Definition,
}

impl Broken {
  pub fn new() -> Self {
    Self {
      definition: Definition::must_load(
        r#"{ "id": "broken", "tasks": ["TASK_CALL"] }"#,
        Some(r#"{ "type": "object", "required": ["api_key"] }"#),
        r#"{ "TASK_CALL": {} }"#,
      ),
    }
  }
}

struct BrokenExecution;

#[async_trait]
impl Execution for BrokenExecution {
  fn task(&self) -> &str {
    "TASK_CALL"
  }

  async fn execute(&self, _cancel: &CancellationToken, _jobs: Vec<Job>) -> Result<(), ComponentError> {
    Err(ComponentError::Batch {
      message: "connection refused".to_string(),
    })
  }
}

impl Component for Broken {
  fn definition(&self) -> &Definition {
    &self.definition
  }

  fn create_execution(&self, _params: ExecutionParams) -> Result<Box<dyn Execution>, ComponentError> {
    Ok(Box::new(BrokenExecution))
  }
}

/// Builtins plus the test components. The gate starts closed.
pub fn registry() -> (ComponentRegistry, Arc<Semaphore>) {
  let permits = Arc::new(Semaphore::new(0));
  let mut registry = conduit_operators::builtin_registry().unwrap();
  registry.register(Arc::new(Gate::new(permits.clone()))).unwrap();
  registry.register(Arc::new(Broken::new())).unwrap();
  (registry, permits)
}

pub fn orchestrator() -> (Orchestrator, Arc<Semaphore>) {
  let (registry, permits) = registry();
  (
    Orchestrator::new(Arc::new(registry), MemoryStore::default()),
    permits,
  )
}

pub fn service() -> (TriggerService, Arc<Semaphore>) {
  let (orchestrator, permits) = orchestrator();
  (TriggerService::new(orchestrator), permits)
}

pub fn recipe(def: Value) -> Arc<Recipe> {
  let def: RecipeDef = serde_json::from_value(def).unwrap();
  Arc::new(Recipe::compile(def).unwrap())
}

/// Poll `check` until it holds or a second has passed.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
  for _ in 0..100 {
    if check() {
      return true;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
  }
  check()
}
