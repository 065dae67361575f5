//! The json operator driven through the component contract.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use conduit_component::{ExecutionParams, Job, JobError, JobErrorSink, JobInput, JobOutput, Setup};
use conduit_operators::builtin_registry;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct Sink {
  outputs: Mutex<Vec<Value>>,
  errors: Mutex<Vec<String>>,
}

struct Fixed(Value);

struct Out(Arc<Sink>);

struct Errors(Arc<Sink>);

#[async_trait]
impl JobInput for Fixed {
  async fn read(&self) -> Result<Value, JobError> {
    Ok(self.0.clone())
  }
}

#[async_trait]
impl JobOutput for Out {
  async fn write(&self, output: Value) -> Result<(), JobError> {
    self.0.outputs.lock().unwrap().push(output);
    Ok(())
  }
}

#[async_trait]
impl JobErrorSink for Errors {
  async fn error(&self, error: JobError) {
    self.0.errors.lock().unwrap().push(error.message().to_string());
  }
}

async fn run(task: &str, inputs: Vec<Value>) -> Vec<Arc<Sink>> {
  let registry = builtin_registry().unwrap();
  let execution = registry
    .create_execution("json", ExecutionParams::new("step", task, Setup::new()))
    .unwrap();

  let sinks: Vec<Arc<Sink>> = inputs.iter().map(|_| Arc::new(Sink::default())).collect();
  let jobs = inputs
    .into_iter()
    .zip(&sinks)
    .map(|(input, sink)| Job::new(Fixed(input), Out(sink.clone()), Errors(sink.clone())))
    .collect();

  execution
    .execute(&CancellationToken::new(), jobs)
    .await
    .unwrap();
  sinks
}

#[tokio::test]
async fn test_unmarshal_batch_isolates_bad_strings() {
  let sinks = run(
    "TASK_UNMARSHAL",
    vec![
      json!({ "string": "[1, 2]" }),
      json!({ "string": "not json" }),
      json!({ "string": "{\"ok\": true}" }),
    ],
  )
  .await;

  assert_eq!(*sinks[0].outputs.lock().unwrap(), vec![json!({ "json": [1, 2] })]);
  assert!(sinks[1].outputs.lock().unwrap().is_empty());
  assert_eq!(sinks[1].errors.lock().unwrap().len(), 1);
  assert_eq!(
    *sinks[2].outputs.lock().unwrap(),
    vec![json!({ "json": { "ok": true } })]
  );
}

#[tokio::test]
async fn test_missing_field_fails_schema() {
  let sinks = run("TASK_MARSHAL", vec![json!({ "other": 1 })]).await;
  let errors = sinks[0].errors.lock().unwrap();
  assert_eq!(errors.len(), 1);
  assert!(errors[0].starts_with("invalid input: "));
  assert!(errors[0].contains("\"json\""));
}

#[tokio::test]
async fn test_edit_values_with_create() {
  let sinks = run(
    "TASK_EDIT_VALUES",
    vec![json!({
      "data": { "a": 1 },
      "updates": [{ "field": "b.c", "newValue": "x" }],
      "conflictResolution": "create",
    })],
  )
  .await;
  assert_eq!(
    *sinks[0].outputs.lock().unwrap(),
    vec![json!({ "data": { "a": 1, "b": { "c": "x" } } })]
  );
}

#[tokio::test]
async fn test_edit_values_rejects_unknown_conflict_resolution() {
  let sinks = run(
    "TASK_EDIT_VALUES",
    vec![json!({
      "data": { "a": 1 },
      "updates": [{ "field": "a", "newValue": 2 }],
      "conflictResolution": "merge"
    })],
  )
  .await;

  assert!(sinks[0].outputs.lock().unwrap().is_empty());
  let errors = sinks[0].errors.lock().unwrap();
  assert_eq!(errors.len(), 1);
  assert!(errors[0].starts_with("invalid input: "));
  assert!(errors[0].contains("\"merge\""));
}
