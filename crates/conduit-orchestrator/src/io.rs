//! Job capabilities backed by workflow memory.
//!
//! Each job of a node reads its input by rendering the node's input template
//! against its own record, and writes its output or error back into that
//! record's component slot.

use std::sync::Arc;

use async_trait::async_trait;
use conduit_component::{Job, JobError, JobErrorSink, JobInput, JobOutput};
use conduit_memory::{ComponentField, WorkflowMemory};
use conduit_recipe::Recipe;
use serde_json::Value;
use tracing::warn;

use crate::error::TriggerError;

/// The slot of one component in one record.
#[derive(Clone)]
struct Slot {
  memory: Arc<WorkflowMemory>,
  batch_index: usize,
  component_id: String,
}

struct MemoryInput {
  slot: Slot,
  template: Value,
}

struct MemoryOutput {
  slot: Slot,
  recipe: Arc<Recipe>,
}

struct MemoryErrorSink {
  slot: Slot,
}

/// Build the job for one component and record.
pub(crate) fn memory_job(
  memory: &Arc<WorkflowMemory>,
  recipe: &Arc<Recipe>,
  component_id: &str,
  batch_index: usize,
  template: &Value,
) -> Job {
  let slot = Slot {
    memory: memory.clone(),
    batch_index,
    component_id: component_id.to_string(),
  };
  Job::new(
    MemoryInput {
      slot: slot.clone(),
      template: template.clone(),
    },
    MemoryOutput {
      slot: slot.clone(),
      recipe: recipe.clone(),
    },
    MemoryErrorSink { slot },
  )
}

/// The pipeline output re-rendered with `output` in place.
///
/// `None` unless the memory streams its events.
pub(crate) fn streamed_output(
  memory: &WorkflowMemory,
  recipe: &Recipe,
  batch_index: usize,
  component_id: &str,
  output: &Value,
) -> Result<Option<Value>, TriggerError> {
  if !memory.is_streaming() {
    return Ok(None);
  }
  let mut record = memory.record(batch_index)?;
  record[component_id]["output"] = output.clone();
  Ok(Some(recipe.render_output(&record)?))
}

fn job_error(e: impl std::fmt::Display) -> JobError {
  JobError::new(e.to_string())
}

#[async_trait]
impl JobInput for MemoryInput {
  async fn read(&self) -> Result<Value, JobError> {
    let Slot {
      memory,
      batch_index,
      component_id,
    } = &self.slot;

    let record = memory.record(*batch_index).map_err(job_error)?;
    let input = conduit_recipe::render(&self.template, &record, false).map_err(job_error)?;
    memory
      .set_component(*batch_index, component_id, ComponentField::Input, input.clone())
      .map_err(job_error)?;
    Ok(input)
  }
}

#[async_trait]
impl JobOutput for MemoryOutput {
  async fn write(&self, output: Value) -> Result<(), JobError> {
    let Slot {
      memory,
      batch_index,
      component_id,
    } = &self.slot;

    // Render first: nothing is stored unless every step can succeed.
    let pipeline_output =
      streamed_output(memory, &self.recipe, *batch_index, component_id, &output).map_err(job_error)?;

    memory
      .complete_component(*batch_index, component_id, output, pipeline_output)
      .map_err(job_error)?;
    Ok(())
  }
}

#[async_trait]
impl JobErrorSink for MemoryErrorSink {
  async fn error(&self, error: JobError) {
    let Slot {
      memory,
      batch_index,
      component_id,
    } = &self.slot;

    if let Err(e) = memory.set_component_error(*batch_index, component_id, error.message()) {
      warn!(
        trigger_id = %memory.trigger_id(),
        component_id = %component_id,
        batch_index,
        error = %e,
        "job_error_dropped"
      );
    }
  }
}

#[cfg(test)]
mod tests {
  use conduit_config::RecipeDef;
  use conduit_memory::MemoryStore;
  use serde_json::json;

  use super::*;

  fn recipe() -> Arc<Recipe> {
    let def: RecipeDef = serde_json::from_value(json!({
      "component": { "a": { "type": "t", "task": "T" } },
      "output": { "n": { "value": "${a.output.n}" } }
    }))
    .unwrap();
    Arc::new(Recipe::compile(def).unwrap())
  }

  #[tokio::test]
  async fn test_write_completes_component_and_pipeline_output() {
    let store = MemoryStore::default();
    let memory = store.create("t1", 1, true).unwrap();
    let job = memory_job(&memory, &recipe(), "a", 0, &json!({}));

    job.output.write(json!({ "n": 3 })).await.unwrap();

    assert_eq!(memory.get(0, "a.output.n").unwrap(), Some(json!(3)));
    assert_eq!(memory.get(0, "output").unwrap(), Some(json!({ "n": 3 })));
    assert!(memory.component_status(0, "a").unwrap().completed);
  }

  #[tokio::test]
  async fn test_failed_write_leaves_no_output() {
    let store = MemoryStore::default();
    let memory = store.create("t1", 1, true).unwrap();
    let job = memory_job(&memory, &recipe(), "a", 0, &json!({}));
    memory.close().unwrap();

    assert!(job.output.write(json!({ "n": 3 })).await.is_err());

    assert_eq!(memory.get(0, "a.output").unwrap(), None);
    assert_eq!(memory.get(0, "output").unwrap(), None);
    assert!(!memory.component_status(0, "a").unwrap().completed);
  }
}
