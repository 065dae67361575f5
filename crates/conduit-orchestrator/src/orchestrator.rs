//! Trigger orchestration.
//!
//! The [`Orchestrator`] drives one trigger from request to result:
//!
//! 1. [`Orchestrator::prepare`] binds every recipe node to an execution and
//!    only then allocates workflow memory, so structural errors never leave
//!    state behind.
//! 2. [`PreparedTrigger::run`] walks the dependency groups, feeding each
//!    node's records through its execution, and publishes `PipelineClosed`.
//!    An iterator node walks its nested recipe over a child batch per
//!    record, one child record per element.
//!
//! Memory is purged when the prepared trigger is dropped, whatever the exit
//! path.

use std::collections::BTreeMap;
use std::sync::Arc;

use conduit_component::{
  BatchExecutor, ComponentError, ComponentRegistry, Execution, ExecutionParams, Setup,
};
use conduit_memory::{
  ComponentField, ComponentStatus, MemoryStore, PipelineStatus, PurgeGuard, WorkflowMemory,
};
use conduit_recipe::{
  CONNECTION_SLOT, ELEMENT_KEY, Iteration, IterationSource, Node, Recipe, RecipeError, SECRET_SLOT,
  VARIABLE_SLOT,
};
use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::error::TriggerError;
use crate::io::{memory_job, streamed_output};
use crate::result::{Trace, TraceStatus, TriggerOutput, TriggerRequest};

/// Runs triggers against an explicit component registry.
pub struct Orchestrator {
  registry: Arc<ComponentRegistry>,
  memory: MemoryStore,
  executor: BatchExecutor,
}

impl Orchestrator {
  pub fn new(registry: Arc<ComponentRegistry>, memory: MemoryStore) -> Self {
    Self {
      registry,
      memory,
      executor: BatchExecutor::sequential(),
    }
  }

  /// Batch strategy handed to every execution.
  pub fn with_executor(mut self, executor: BatchExecutor) -> Self {
    self.executor = executor;
    self
  }

  pub fn registry(&self) -> &ComponentRegistry {
    &self.registry
  }

  pub fn memory_store(&self) -> &MemoryStore {
    &self.memory
  }

  /// Run a trigger to completion with a fresh trigger ID.
  pub async fn trigger(
    &self,
    request: TriggerRequest,
    cancel: CancellationToken,
  ) -> Result<TriggerOutput, TriggerError> {
    let trigger_id = uuid::Uuid::new_v4().to_string();
    self.prepare(&trigger_id, request, false)?.run(cancel).await
  }

  /// Validate the request and allocate its workflow memory.
  ///
  /// Every node is bound to an execution before memory exists, so any
  /// unknown component, unsupported task or invalid setup fails here
  /// without side effects.
  #[instrument(
    name = "trigger_prepare",
    skip(self, request),
    fields(trigger_id = %trigger_id, records = request.records.len())
  )]
  pub fn prepare(
    &self,
    trigger_id: &str,
    request: TriggerRequest,
    streaming: bool,
  ) -> Result<PreparedTrigger, TriggerError> {
    let mut setup_context = Map::new();
    setup_context.insert(SECRET_SLOT.to_string(), Value::Object(request.secrets.clone()));
    setup_context.insert(CONNECTION_SLOT.to_string(), Value::Object(request.connections.clone()));
    let setup_context = Value::Object(setup_context);

    let mut executions = BTreeMap::new();
    let mut setups = BTreeMap::new();
    for node in request.recipe.task_nodes() {
      let setup = render_setup(node, &setup_context)?;
      let params = ExecutionParams::new(&node.component_id, &node.def.task, setup.clone())
        .with_executor(self.executor);
      let execution = self
        .registry
        .create_execution(&node.def.component_type, params)
        .map_err(|e| TriggerError::component(&node.component_id, e))?;

      executions.insert(node.component_id.clone(), execution);
      setups.insert(node.component_id.clone(), Value::Object(setup));
    }

    let memory = self
      .memory
      .create(trigger_id, request.records.len(), streaming)?;
    let guard = self.memory.purge_guard(trigger_id);

    info!(components = executions.len(), streaming, "trigger_accepted");

    Ok(PreparedTrigger {
      trigger_id: trigger_id.to_string(),
      request,
      executions,
      setups,
      store: self.memory.clone(),
      memory,
      _guard: guard,
    })
  }
}

impl std::fmt::Debug for Orchestrator {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Orchestrator")
      .field("registry", &self.registry)
      .field("memory", &self.memory)
      .field("executor", &self.executor)
      .finish()
  }
}

fn render_setup(node: &Node, context: &Value) -> Result<Setup, TriggerError> {
  let Some(template) = &node.def.setup else {
    return Ok(Setup::new());
  };
  match conduit_recipe::render(template, context, false)? {
    Value::Object(setup) => Ok(setup),
    other => Err(TriggerError::component(
      &node.component_id,
      ComponentError::invalid_setup(
        &node.def.component_type,
        format!("setup must be an object, got {}", other),
      ),
    )),
  }
}

/// A validated trigger holding its workflow memory.
///
/// Dropping it, run or not, purges the memory.
pub struct PreparedTrigger {
  trigger_id: String,
  request: TriggerRequest,
  executions: BTreeMap<String, Box<dyn Execution>>,
  setups: BTreeMap<String, Value>,
  store: MemoryStore,
  memory: Arc<WorkflowMemory>,
  _guard: PurgeGuard,
}

impl PreparedTrigger {
  pub fn trigger_id(&self) -> &str {
    &self.trigger_id
  }

  /// The trigger's memory, e.g. to subscribe to its events before running.
  pub fn memory(&self) -> &Arc<WorkflowMemory> {
    &self.memory
  }

  /// Walk the recipe and return the per-record result.
  #[instrument(name = "trigger_run", skip(self, cancel), fields(trigger_id = %self.trigger_id))]
  pub async fn run(self, cancel: CancellationToken) -> Result<TriggerOutput, TriggerError> {
    let result = self.execute(&cancel).await;

    match &result {
      Ok(output) => {
        info!(
          records = output.outputs.len(),
          errored = output.errors.iter().filter(|e| !e.is_empty()).count(),
          "trigger_completed"
        );
      }
      Err(e) => {
        error!(error = %e, "trigger_failed");
        self.fail(e);
      }
    }

    result
  }

  async fn execute(&self, cancel: &CancellationToken) -> Result<TriggerOutput, TriggerError> {
    self.load_records()?;
    self.memory.set_pipeline_status(PipelineStatus {
      started: true,
      ..Default::default()
    })?;

    self.walk(&self.request.recipe, &self.memory, cancel).await?;

    let output = self.collect_output()?;
    self.memory.set_pipeline_status(PipelineStatus {
      started: true,
      completed: true,
      ..Default::default()
    })?;
    self.memory.close()?;
    Ok(output)
  }

  /// Seed every record with its variables, the trigger secrets and
  /// connections, and each component's rendered setup.
  fn load_records(&self) -> Result<(), TriggerError> {
    let secrets = Value::Object(self.request.secrets.clone());
    let connections = Value::Object(self.request.connections.clone());

    for (index, record) in self.request.records.iter().enumerate() {
      self.memory.set(index, VARIABLE_SLOT, record.clone())?;
      self.memory.set(index, SECRET_SLOT, secrets.clone())?;
      self.memory.set(index, CONNECTION_SLOT, connections.clone())?;
      self.load_setups(&self.request.recipe, &self.memory, index)?;
    }
    Ok(())
  }

  fn load_setups(&self, recipe: &Recipe, memory: &WorkflowMemory, index: usize) -> Result<(), TriggerError> {
    for node in recipe.nodes() {
      if let Some(setup) = self.setups.get(&node.component_id) {
        memory.set_component(index, &node.component_id, ComponentField::Setup, setup.clone())?;
      }
    }
    Ok(())
  }

  /// Run `recipe` group by group over every record of `memory`.
  ///
  /// Nodes of a group run concurrently and each one observes `cancel`
  /// itself, so a cancelled group still settles every job before returning.
  fn walk<'a>(
    &'a self,
    recipe: &'a Arc<Recipe>,
    memory: &'a Arc<WorkflowMemory>,
    cancel: &'a CancellationToken,
  ) -> BoxFuture<'a, Result<(), TriggerError>> {
    async move {
      for group in recipe.dependency_groups() {
        if cancel.is_cancelled() {
          warn!("trigger cancelled");
          return Err(TriggerError::Cancelled);
        }

        let nodes = group
          .iter()
          .map(|id| self.run_node(recipe, memory, id, cancel));
        for result in futures::future::join_all(nodes).await {
          result?;
        }
      }
      Ok(())
    }
    .boxed()
  }

  async fn run_node(
    &self,
    recipe: &Arc<Recipe>,
    memory: &Arc<WorkflowMemory>,
    component_id: &str,
    cancel: &CancellationToken,
  ) -> Result<(), TriggerError> {
    let unknown = || {
      TriggerError::component(
        component_id,
        ComponentError::UnknownComponent(component_id.to_string()),
      )
    };
    let node = recipe.node(component_id).ok_or_else(unknown)?;
    if let Some(iteration) = &node.iteration {
      return self.run_iterator(recipe, memory, node, iteration, cancel).await;
    }
    let execution = self.executions.get(component_id).ok_or_else(unknown)?;

    let mut batch = Vec::with_capacity(memory.batch_size());
    for index in 0..memory.batch_size() {
      if process_condition(recipe, memory, node, index)? {
        batch.push(index);
      }
    }

    debug!(
      component_id,
      task = %execution.task(),
      jobs = batch.len(),
      "node_started"
    );
    if batch.is_empty() {
      return Ok(());
    }

    let jobs = batch
      .iter()
      .map(|&index| memory_job(memory, recipe, component_id, index, &node.def.input))
      .collect();

    match execution.execute(cancel, jobs).await {
      Ok(()) => {}
      Err(ComponentError::Cancelled) => return Err(TriggerError::Cancelled),
      Err(e) => {
        warn!(component_id, error = %e, "node_failed");
        let message = format!("Component {} failed to execute. {}", component_id, e);
        for &index in &batch {
          let status = memory.component_status(index, component_id)?;
          if !status.errored && !status.completed {
            memory.set_component_error(index, component_id, &message)?;
          }
        }
      }
    }

    debug!(component_id, "node_completed");
    Ok(())
  }

  /// Run an iterator node for every record it is not skipped on.
  ///
  /// A source that does not render to elements fails only that record.
  async fn run_iterator(
    &self,
    recipe: &Arc<Recipe>,
    memory: &Arc<WorkflowMemory>,
    node: &Node,
    iteration: &Iteration,
    cancel: &CancellationToken,
  ) -> Result<(), TriggerError> {
    let component_id = node.component_id.as_str();
    debug!(component_id, records = memory.batch_size(), "iterator_started");

    for index in 0..memory.batch_size() {
      if !process_condition(recipe, memory, node, index)? {
        continue;
      }
      match self.iterate(recipe, memory, node, iteration, index, cancel).await {
        Ok(()) => {}
        Err(TriggerError::Recipe(e)) => {
          warn!(component_id, batch_index = index, error = %e, "iterator_failed");
          memory.set_component_error(index, component_id, &e.to_string())?;
        }
        Err(e) => return Err(e),
      }
    }

    debug!(component_id, "iterator_completed");
    Ok(())
  }

  /// Run the iterator body over the elements of one record.
  async fn iterate(
    &self,
    recipe: &Arc<Recipe>,
    memory: &Arc<WorkflowMemory>,
    node: &Node,
    iteration: &Iteration,
    index: usize,
    cancel: &CancellationToken,
  ) -> Result<(), TriggerError> {
    let component_id = node.component_id.as_str();
    let record = memory.record(index)?;

    let elements = match &iteration.source {
      IterationSource::Elements(template) => match conduit_recipe::render(template, &record, false)? {
        Value::Array(elements) => elements,
        other => {
          return Err(TriggerError::Recipe(RecipeError::InvalidIterator {
            component_id: component_id.to_string(),
            message: format!("input must be an array, got {}", other),
          }));
        }
      },
      IterationSource::Range { template, .. } => {
        let range = conduit_recipe::render(template, &record, false)?;
        conduit_recipe::range_indexes(&range)?
          .into_iter()
          .map(Value::from)
          .collect()
      }
    };
    memory.set_component(
      index,
      component_id,
      ComponentField::Input,
      Value::Array(elements.clone()),
    )?;

    let mut rendered = Vec::with_capacity(elements.len());
    if !elements.is_empty() {
      let child_id = format!("{}/{}/{}", self.trigger_id, component_id, index);
      let child = self.store.create(&child_id, elements.len(), false)?;
      let _child_guard = self.store.purge_guard(&child_id);

      for (element_index, element) in elements.into_iter().enumerate() {
        for slot in [VARIABLE_SLOT, SECRET_SLOT, CONNECTION_SLOT] {
          child.set(element_index, slot, record[slot].clone())?;
        }
        for upstream in recipe.graph().upstream(component_id) {
          child.set(element_index, upstream, record[upstream.as_str()].clone())?;
        }
        match &iteration.source {
          IterationSource::Elements(_) => {
            let mut slot = Map::new();
            slot.insert(ELEMENT_KEY.to_string(), element);
            child.set(element_index, component_id, Value::Object(slot))?;
          }
          IterationSource::Range { index: name, .. } => {
            child.set(element_index, name, element)?;
          }
        }
        self.load_setups(&iteration.body, &child, element_index)?;
      }

      debug!(component_id, batch_index = index, elements = child.batch_size(), "iteration_started");
      self.walk(&iteration.body, &child, cancel).await?;

      for element_index in 0..child.batch_size() {
        rendered.push(iteration.body.render_output(&child.record(element_index)?)?);
      }
    }

    let output = iteration.gather(&rendered);
    let pipeline_output = streamed_output(memory, recipe, index, component_id, &output)?;
    memory.complete_component(index, component_id, output, pipeline_output)?;
    Ok(())
  }

  fn collect_output(&self) -> Result<TriggerOutput, TriggerError> {
    let recipe = &self.request.recipe;
    let batch_size = self.memory.batch_size();

    let mut outputs = Vec::with_capacity(batch_size);
    let mut errors = Vec::with_capacity(batch_size);
    for index in 0..batch_size {
      let record = self.memory.record(index)?;
      let output = recipe.render_output(&record)?;
      self.memory.set_pipeline_output(index, output.clone())?;
      outputs.push(output);

      let record_errors: BTreeMap<String, String> = recipe
        .nodes()
        .filter_map(|node| {
          error_message(&record, &node.component_id).map(|m| (node.component_id.clone(), m))
        })
        .collect();
      errors.push(record_errors);
    }

    let traces = if self.request.return_traces {
      Some(self.collect_traces()?)
    } else {
      None
    };

    Ok(TriggerOutput {
      trigger_id: self.trigger_id.clone(),
      outputs,
      errors,
      traces,
    })
  }

  fn collect_traces(&self) -> Result<BTreeMap<String, Trace>, TriggerError> {
    let batch_size = self.memory.batch_size();
    let records = (0..batch_size)
      .map(|index| self.memory.record(index))
      .collect::<Result<Vec<_>, _>>()?;

    let mut traces = BTreeMap::new();
    for node in self.request.recipe.nodes() {
      let id = node.component_id.as_str();
      let mut trace = Trace {
        statuses: Vec::with_capacity(batch_size),
        inputs: Vec::with_capacity(batch_size),
        outputs: Vec::with_capacity(batch_size),
        errors: Vec::with_capacity(batch_size),
      };
      for (index, record) in records.iter().enumerate() {
        let status = self.memory.component_status(index, id)?;
        trace.statuses.push(trace_status(status));
        trace.inputs.push(record[id]["input"].clone());
        trace.outputs.push(record[id]["output"].clone());
        trace.errors.push(error_message(record, id));
      }
      traces.insert(id.to_string(), trace);
    }
    Ok(traces)
  }

  /// Best-effort terminal events for a failed trigger.
  fn fail(&self, e: &TriggerError) {
    let published = self
      .memory
      .set_pipeline_error(&e.to_string())
      .and_then(|_| {
        self.memory.set_pipeline_status(PipelineStatus {
          started: true,
          errored: true,
          ..Default::default()
        })
      })
      .and_then(|_| self.memory.close());
    if let Err(e) = published {
      debug!(error = %e, "trigger_close_skipped");
    }
  }
}

impl std::fmt::Debug for PreparedTrigger {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("PreparedTrigger")
      .field("trigger_id", &self.trigger_id)
      .field("components", &self.executions.keys().collect::<Vec<_>>())
      .field("records", &self.request.records.len())
      .finish()
  }
}

/// Decide whether `node` runs for one record, recording why not.
fn process_condition(
  recipe: &Recipe,
  memory: &WorkflowMemory,
  node: &Node,
  index: usize,
) -> Result<bool, TriggerError> {
  let component_id = node.component_id.as_str();

  for upstream in recipe.graph().upstream(component_id) {
    if memory.component_status(index, upstream)?.is_blocked() {
      memory.update_component_status(index, component_id, |s| s.skipped = true)?;
      return Ok(false);
    }
  }

  if let Some(condition) = &node.condition {
    let record = memory.record(index)?;
    match condition.evaluate(&record) {
      Ok(true) => {}
      Ok(false) => {
        memory.update_component_status(index, component_id, |s| s.skipped = true)?;
        return Ok(false);
      }
      Err(e) => {
        memory.set_component_error(index, component_id, &e.to_string())?;
        return Ok(false);
      }
    }
  }

  memory.update_component_status(index, component_id, |s| s.started = true)?;
  Ok(true)
}

fn trace_status(status: ComponentStatus) -> TraceStatus {
  if status.errored {
    TraceStatus::Error
  } else if status.skipped {
    TraceStatus::Skipped
  } else if status.completed {
    TraceStatus::Completed
  } else {
    TraceStatus::Pending
  }
}

fn error_message(record: &Value, component_id: &str) -> Option<String> {
  record
    .get(component_id)?
    .get("error")?
    .get("message")?
    .as_str()
    .map(str::to_string)
}
