//! Event subscriptions against a live memory store.

use std::time::Duration;

use conduit_memory::{ComponentField, EventKind, MemoryStore, PipelineStatus};
use serde_json::json;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_events_arrive_in_order_and_end_at_close() {
  let store = MemoryStore::default();
  let memory = store.create("t1", 1, true).unwrap();
  let mut subscription = memory.listen_event(CancellationToken::new()).unwrap();

  memory
    .set_pipeline_status(PipelineStatus {
      started: true,
      ..Default::default()
    })
    .unwrap();
  memory
    .set_component(0, "fetch", ComponentField::Input, json!({ "url": "x" }))
    .unwrap();
  memory.set_pipeline_output(0, json!({ "done": true })).unwrap();
  memory.close().unwrap();

  let mut names = Vec::new();
  while let Some(event) = subscription.next().await {
    names.push(event.name);
  }
  assert_eq!(
    names,
    vec![
      EventKind::PipelineStatusUpdated,
      EventKind::ComponentInputUpdated,
      EventKind::PipelineOutputUpdated,
      EventKind::PipelineClosed,
    ]
  );
  assert!(!subscription.is_active());
  assert_eq!(memory.subscriber_count(), 0);
}

#[tokio::test]
async fn test_cancel_releases_the_subscriber() {
  let store = MemoryStore::default();
  let memory = store.create("t1", 1, true).unwrap();
  let cancel = CancellationToken::new();
  let mut subscription = memory.listen_event(cancel.clone()).unwrap();
  assert_eq!(memory.subscriber_count(), 1);

  cancel.cancel();
  assert!(subscription.next().await.is_none());
  assert_eq!(memory.subscriber_count(), 0);

  // Publishing with no subscribers still succeeds.
  memory.set_pipeline_output(0, json!({})).unwrap();
}

#[tokio::test]
async fn test_purge_ends_subscription() {
  let store = MemoryStore::default();
  let memory = store.create("t1", 1, false).unwrap();
  let mut subscription = memory.listen_event(CancellationToken::new()).unwrap();

  let waiter = tokio::spawn(async move { subscription.next().await });
  tokio::time::sleep(Duration::from_millis(10)).await;
  store.purge("t1");

  let next = tokio::time::timeout(Duration::from_secs(1), waiter)
    .await
    .unwrap()
    .unwrap();
  assert!(next.is_none());
}

#[tokio::test]
async fn test_lagging_subscriber_skips_ahead() {
  let store = MemoryStore::new(2);
  let memory = store.create("t1", 1, false).unwrap();
  let mut subscription = memory.listen_event(CancellationToken::new()).unwrap();

  for i in 0..5 {
    memory.set_pipeline_output(0, json!({ "i": i })).unwrap();
  }
  memory.close().unwrap();

  let mut received = Vec::new();
  while let Some(event) = subscription.next().await {
    received.push(event);
  }
  assert!(received.len() < 6);
  assert!(received.last().unwrap().is_closed());
}

#[tokio::test]
async fn test_stream_adapter() {
  use futures::StreamExt;

  let store = MemoryStore::default();
  let memory = store.create("t1", 2, false).unwrap();
  let subscription = memory.listen_event(CancellationToken::new()).unwrap();

  memory.set_pipeline_output(1, json!("b")).unwrap();
  memory.close().unwrap();

  let events: Vec<_> = subscription.into_stream().collect().await;
  assert_eq!(events.len(), 2);
  assert_eq!(events[0].data.batch_index, Some(1));
  assert!(events[1].is_closed());
}
