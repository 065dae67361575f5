//! Streamed triggers and the event bridge.

mod common;

use conduit_memory::EventKind;
use conduit_orchestrator::TriggerRequest;
use futures::StreamExt;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use common::{eventually, recipe, service};

fn gated() -> Value {
  json!({
    "variable": { "n": {} },
    "component": {
      "wait": { "type": "gate", "task": "TASK_WAIT", "input": { "n": "${variable.n}" } },
      "encode": { "type": "json", "task": "TASK_MARSHAL", "input": { "json": "${wait.output}" } }
    },
    "output": { "text": { "value": "${encode.output.string}" } }
  })
}

#[tokio::test]
async fn test_stream_relays_events_until_closed() {
  let (service, gate) = service();
  gate.add_permits(1);

  let mut stream = service
    .stream_trigger(
      TriggerRequest::new(recipe(gated()), vec![json!({ "n": 1 })]),
      CancellationToken::new(),
    )
    .unwrap();

  let mut events = Vec::new();
  while let Some(event) = stream.next().await {
    events.push(event);
  }

  let names: Vec<EventKind> = events.iter().map(|e| e.name).collect();
  assert_eq!(names.first(), Some(&EventKind::PipelineStatusUpdated));
  assert_eq!(names.last(), Some(&EventKind::PipelineClosed));
  assert!(names.contains(&EventKind::ComponentInputUpdated));
  assert!(names.contains(&EventKind::ComponentOutputUpdated));
  assert!(names.contains(&EventKind::ComponentStatusUpdated));

  let last_output = events
    .iter()
    .rev()
    .find(|e| e.name == EventKind::PipelineOutputUpdated)
    .unwrap();
  assert_eq!(
    last_output.data.output,
    Some(json!({ "text": "{\"n\":1}" }))
  );

  let trigger_id = stream.trigger_id().to_string();
  let output = stream.finish().await.unwrap();
  assert_eq!(output.trigger_id, trigger_id);
  assert!(!service.memory_store().contains(&trigger_id));
}

#[tokio::test]
async fn test_client_disconnect_keeps_trigger_running() {
  let (service, gate) = service();
  let client = CancellationToken::new();

  let mut stream = service
    .stream_trigger(
      TriggerRequest::new(recipe(gated()), vec![json!({ "n": 2 })]),
      client.clone(),
    )
    .unwrap();
  let trigger_id = stream.trigger_id().to_string();
  let memory = service.memory_store().get(&trigger_id).unwrap();
  assert_eq!(memory.subscriber_count(), 1);

  // Hang up after the first event, while the gate is still closed.
  let first = stream.next().await.unwrap();
  assert_eq!(first.name, EventKind::PipelineStatusUpdated);
  client.cancel();
  assert!(stream.next().await.is_none());
  assert_eq!(memory.subscriber_count(), 0);

  gate.add_permits(1);
  let output = stream.finish().await.unwrap();

  assert_eq!(output.outputs, vec![json!({ "text": "{\"n\":2}" })]);
  assert!(memory.is_closed());
  assert!(!service.memory_store().contains(&trigger_id));
}

#[tokio::test]
async fn test_dropped_stream_releases_subscriber() {
  let (service, gate) = service();
  let stream = service
    .stream_trigger(
      TriggerRequest::new(recipe(gated()), vec![json!({ "n": 3 })]),
      CancellationToken::new(),
    )
    .unwrap();
  let trigger_id = stream.trigger_id().to_string();
  let memory = service.memory_store().get(&trigger_id).unwrap();

  drop(stream);
  assert_eq!(memory.subscriber_count(), 0);

  gate.add_permits(1);
  assert!(eventually(|| !service.memory_store().contains(&trigger_id)).await);
}

#[tokio::test]
async fn test_sse_frames() {
  let (service, gate) = service();
  gate.add_permits(1);

  let stream = service
    .stream_trigger(
      TriggerRequest::new(recipe(gated()), vec![json!({ "n": 4 })]),
      CancellationToken::new(),
    )
    .unwrap();
  let frames: Vec<String> = stream.into_sse().collect().await;

  assert!(frames.iter().all(|f| f.starts_with("event: ") && f.ends_with("\n\n")));
  assert!(frames.last().unwrap().starts_with("event: PIPELINE_CLOSED\n"));
}
