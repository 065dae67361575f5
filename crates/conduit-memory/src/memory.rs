//! Per-trigger workflow memory.
//!
//! Each trigger owns one [`WorkflowMemory`] holding a JSON object per input
//! record (batch index):
//!
//! ```json
//! {
//!   "variable": { "name": "Ada" },
//!   "secret": {},
//!   "connection": {},
//!   "fetch": {
//!     "input": {}, "output": {}, "setup": {},
//!     "status": { "started": true, "skipped": false, "errored": false, "completed": true },
//!     "error": { "message": "..." }
//!   },
//!   "output": { "greeting": "Hello Ada" }
//! }
//! ```
//!
//! All state sits behind one lock per trigger. Events are fanned out through
//! a bounded broadcast channel, so publishing never waits for subscribers.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use conduit_recipe::{CONNECTION_SLOT, OUTPUT_SLOT, SECRET_SLOT, VARIABLE_SLOT};
use serde_json::{Map, Value, json};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::MemoryError;
use crate::event::{ComponentStatus, ErrorData, Event, EventData, EventKind, PipelineStatus};
use crate::subscription::EventSubscription;

/// A field of a component's per-record slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentField {
  Input,
  Output,
  Setup,
}

impl ComponentField {
  fn key(self) -> &'static str {
    match self {
      Self::Input => "input",
      Self::Output => "output",
      Self::Setup => "setup",
    }
  }

  fn event(self) -> Option<EventKind> {
    match self {
      Self::Input => Some(EventKind::ComponentInputUpdated),
      Self::Output => Some(EventKind::ComponentOutputUpdated),
      Self::Setup => None,
    }
  }
}

struct State {
  records: Vec<Map<String, Value>>,
  statuses: BTreeMap<(usize, String), ComponentStatus>,
  log: Vec<Event>,
  sender: Option<broadcast::Sender<Event>>,
  closed: bool,
  purged: bool,
}

/// Mutable state and event bus of one trigger.
pub struct WorkflowMemory {
  trigger_id: String,
  batch_size: usize,
  streaming: bool,
  created_at: Instant,
  state: Mutex<State>,
}

impl WorkflowMemory {
  pub(crate) fn new(
    trigger_id: &str,
    batch_size: usize,
    streaming: bool,
    event_buffer: usize,
  ) -> Self {
    let empty_record: Map<String, Value> = [VARIABLE_SLOT, SECRET_SLOT, CONNECTION_SLOT]
      .into_iter()
      .map(|slot| (slot.to_string(), json!({})))
      .collect();
    let (sender, _) = broadcast::channel(event_buffer.max(1));

    Self {
      trigger_id: trigger_id.to_string(),
      batch_size,
      streaming,
      created_at: Instant::now(),
      state: Mutex::new(State {
        records: vec![empty_record; batch_size],
        statuses: BTreeMap::new(),
        log: Vec::new(),
        sender: Some(sender),
        closed: false,
        purged: false,
      }),
    }
  }

  pub fn trigger_id(&self) -> &str {
    &self.trigger_id
  }

  /// Number of input records.
  pub fn batch_size(&self) -> usize {
    self.batch_size
  }

  /// Whether component-level events are published.
  pub fn is_streaming(&self) -> bool {
    self.streaming
  }

  pub fn created_at(&self) -> Instant {
    self.created_at
  }

  /// Whether `PipelineClosed` has been published (or the memory purged).
  pub fn is_closed(&self) -> bool {
    self.lock().closed
  }

  /// Set a top-level slot of one record. Last write wins.
  pub fn set(&self, batch_index: usize, key: &str, value: Value) -> Result<(), MemoryError> {
    let mut state = self.lock();
    let record = self.record_mut(&mut state, batch_index)?;
    record.insert(key.to_string(), value);
    Ok(())
  }

  /// Read a value by reference path, e.g. `fetch.output.items[0]`.
  pub fn get(&self, batch_index: usize, path: &str) -> Result<Option<Value>, MemoryError> {
    let segments = conduit_recipe::parse_path(path).map_err(|e| MemoryError::InvalidKey {
      key: path.to_string(),
      message: e.to_string(),
    })?;
    let state = self.lock();
    let record = self.record_ref(&state, batch_index)?;
    let (first, rest) = match segments.split_first() {
      Some((conduit_recipe::Segment::Key(first), rest)) => (first, rest),
      _ => return Ok(None),
    };
    Ok(
      record
        .get(first)
        .and_then(|v| conduit_recipe::lookup(v, rest))
        .cloned(),
    )
  }

  /// Snapshot of one record, used as the rendering context.
  pub fn record(&self, batch_index: usize) -> Result<Value, MemoryError> {
    let state = self.lock();
    let record = self.record_ref(&state, batch_index)?;
    Ok(Value::Object(record.clone()))
  }

  /// Write a component field and publish the matching component event.
  pub fn set_component(
    &self,
    batch_index: usize,
    component_id: &str,
    field: ComponentField,
    value: Value,
  ) -> Result<(), MemoryError> {
    let mut state = self.lock();
    let slot = component_slot(self.record_mut(&mut state, batch_index)?, component_id);
    slot.insert(field.key().to_string(), value.clone());

    if let Some(kind) = field.event() {
      let mut data = EventData::now().batch(batch_index).component(component_id);
      match field {
        ComponentField::Input => data.input = Some(value),
        _ => data.output = Some(value),
      }
      self.publish_locked(&mut state, Event::new(kind, data));
    }
    Ok(())
  }

  /// Store a component's output and mark it completed in one step.
  ///
  /// `pipeline_output` is the pipeline output re-rendered with this output,
  /// for streaming triggers. Either everything is written or nothing is.
  pub fn complete_component(
    &self,
    batch_index: usize,
    component_id: &str,
    output: Value,
    pipeline_output: Option<Value>,
  ) -> Result<ComponentStatus, MemoryError> {
    let mut state = self.lock();
    let record = self.record_mut(&mut state, batch_index)?;
    component_slot(record, component_id)
      .insert(ComponentField::Output.key().to_string(), output.clone());
    if let Some(rendered) = &pipeline_output {
      record.insert(OUTPUT_SLOT.to_string(), rendered.clone());
    }

    let mut data = EventData::now().batch(batch_index).component(component_id);
    data.output = Some(output);
    self.publish_locked(&mut state, Event::new(EventKind::ComponentOutputUpdated, data));
    if let Some(rendered) = pipeline_output {
      let mut data = EventData::now().batch(batch_index);
      data.output = Some(rendered);
      self.publish_locked(&mut state, Event::new(EventKind::PipelineOutputUpdated, data));
    }
    self.update_status_locked(&mut state, batch_index, component_id, |s| s.completed = true)
  }

  /// Record a component failure for one record and mark it errored.
  pub fn set_component_error(
    &self,
    batch_index: usize,
    component_id: &str,
    message: &str,
  ) -> Result<(), MemoryError> {
    let mut state = self.lock();
    let slot = component_slot(self.record_mut(&mut state, batch_index)?, component_id);
    slot.insert("error".to_string(), json!({ "message": message }));

    let mut data = EventData::now().batch(batch_index).component(component_id);
    data.error = Some(ErrorData {
      message: message.to_string(),
    });
    self.publish_locked(&mut state, Event::new(EventKind::ComponentErrorUpdated, data));
    self.update_status_locked(&mut state, batch_index, component_id, |s| s.errored = true)?;
    Ok(())
  }

  /// Update a component's status for one record and publish it.
  pub fn update_component_status(
    &self,
    batch_index: usize,
    component_id: &str,
    update: impl FnOnce(&mut ComponentStatus),
  ) -> Result<ComponentStatus, MemoryError> {
    let mut state = self.lock();
    self.update_status_locked(&mut state, batch_index, component_id, update)
  }

  pub fn component_status(
    &self,
    batch_index: usize,
    component_id: &str,
  ) -> Result<ComponentStatus, MemoryError> {
    let state = self.lock();
    self.record_ref(&state, batch_index)?;
    Ok(
      state
        .statuses
        .get(&(batch_index, component_id.to_string()))
        .copied()
        .unwrap_or_default(),
    )
  }

  /// Store the rendered pipeline output of one record.
  pub fn set_pipeline_output(&self, batch_index: usize, output: Value) -> Result<(), MemoryError> {
    let mut state = self.lock();
    let record = self.record_mut(&mut state, batch_index)?;
    record.insert(OUTPUT_SLOT.to_string(), output.clone());

    let mut data = EventData::now().batch(batch_index);
    data.output = Some(output);
    self.publish_locked(&mut state, Event::new(EventKind::PipelineOutputUpdated, data));
    Ok(())
  }

  pub fn set_pipeline_status(&self, status: PipelineStatus) -> Result<(), MemoryError> {
    let mut data = EventData::now();
    data.status = Some(json!({
      "started": status.started,
      "errored": status.errored,
      "completed": status.completed,
    }));
    self.publish_event(Event::new(EventKind::PipelineStatusUpdated, data))
  }

  pub fn set_pipeline_error(&self, message: &str) -> Result<(), MemoryError> {
    let mut data = EventData::now();
    data.error = Some(ErrorData {
      message: message.to_string(),
    });
    self.publish_event(Event::new(EventKind::PipelineErrorUpdated, data))
  }

  /// Publish an event to every current subscriber.
  ///
  /// Component events are dropped unless the memory is streaming. Fails once
  /// `PipelineClosed` has been published.
  pub fn publish_event(&self, event: Event) -> Result<(), MemoryError> {
    let mut state = self.lock();
    self.check_writable(&state)?;
    self.publish_locked(&mut state, event);
    Ok(())
  }

  /// Publish `PipelineClosed`. Later writes and publishes are rejected.
  pub fn close(&self) -> Result<(), MemoryError> {
    self.publish_event(Event::new(EventKind::PipelineClosed, EventData::now()))
  }

  /// Subscribe to events published from now on.
  ///
  /// The subscription ends after `PipelineClosed`, when `cancel` fires, or
  /// when the memory is purged.
  pub fn listen_event(&self, cancel: CancellationToken) -> Result<EventSubscription, MemoryError> {
    let state = self.lock();
    self.check_writable(&state)?;
    let receiver = state
      .sender
      .as_ref()
      .map(broadcast::Sender::subscribe)
      .ok_or_else(|| MemoryError::NotFound(self.trigger_id.clone()))?;
    debug!(trigger_id = %self.trigger_id, "event_subscriber_added");
    Ok(EventSubscription::new(&self.trigger_id, receiver, cancel))
  }

  /// Live subscribers.
  pub fn subscriber_count(&self) -> usize {
    self
      .lock()
      .sender
      .as_ref()
      .map_or(0, broadcast::Sender::receiver_count)
  }

  /// Every event published so far, in order.
  pub fn events(&self) -> Vec<Event> {
    self.lock().log.clone()
  }

  /// Drop all state and the event channel. Subscribers drain what is
  /// buffered and then end.
  pub(crate) fn purge(&self) {
    let mut state = self.lock();
    state.purged = true;
    state.closed = true;
    state.sender = None;
    state.records.clear();
    state.statuses.clear();
    state.log.clear();
  }

  fn lock(&self) -> MutexGuard<'_, State> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn check_writable(&self, state: &State) -> Result<(), MemoryError> {
    if state.purged {
      return Err(MemoryError::NotFound(self.trigger_id.clone()));
    }
    if state.closed {
      return Err(MemoryError::Closed(self.trigger_id.clone()));
    }
    Ok(())
  }

  fn record_ref<'s>(&self, state: &'s State, index: usize) -> Result<&'s Map<String, Value>, MemoryError> {
    if state.purged {
      return Err(MemoryError::NotFound(self.trigger_id.clone()));
    }
    state.records.get(index).ok_or_else(|| MemoryError::RecordOutOfRange {
      trigger_id: self.trigger_id.clone(),
      index,
      size: self.batch_size,
    })
  }

  fn record_mut<'s>(
    &self,
    state: &'s mut State,
    index: usize,
  ) -> Result<&'s mut Map<String, Value>, MemoryError> {
    self.check_writable(state)?;
    state
      .records
      .get_mut(index)
      .ok_or_else(|| MemoryError::RecordOutOfRange {
        trigger_id: self.trigger_id.clone(),
        index,
        size: self.batch_size,
      })
  }

  fn update_status_locked(
    &self,
    state: &mut State,
    batch_index: usize,
    component_id: &str,
    update: impl FnOnce(&mut ComponentStatus),
  ) -> Result<ComponentStatus, MemoryError> {
    self.record_mut(state, batch_index)?;
    let status = state
      .statuses
      .entry((batch_index, component_id.to_string()))
      .or_default();
    update(status);
    let status = *status;

    let status_value = json!({
      "started": status.started,
      "skipped": status.skipped,
      "errored": status.errored,
      "completed": status.completed,
    });
    if let Some(record) = state.records.get_mut(batch_index) {
      component_slot(record, component_id).insert("status".to_string(), status_value.clone());
    }

    let mut data = EventData::now().batch(batch_index).component(component_id);
    data.status = Some(status_value);
    self.publish_locked(state, Event::new(EventKind::ComponentStatusUpdated, data));
    Ok(status)
  }

  fn publish_locked(&self, state: &mut State, event: Event) {
    if event.name.is_component_event() && !self.streaming {
      return;
    }
    if event.is_closed() {
      state.closed = true;
    }
    if let Some(sender) = &state.sender {
      // No receivers is not an error: events are best effort.
      let _ = sender.send(event.clone());
    }
    state.log.push(event);
  }
}

impl std::fmt::Debug for WorkflowMemory {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("WorkflowMemory")
      .field("trigger_id", &self.trigger_id)
      .field("batch_size", &self.batch_size)
      .field("streaming", &self.streaming)
      .finish_non_exhaustive()
  }
}

fn component_slot<'r>(record: &'r mut Map<String, Value>, component_id: &str) -> &'r mut Map<String, Value> {
  let slot = record
    .entry(component_id.to_string())
    .or_insert_with(|| Value::Object(Map::new()));
  if !slot.is_object() {
    *slot = Value::Object(Map::new());
  }
  match slot {
    Value::Object(map) => map,
    _ => unreachable!("slot was just made an object"),
  }
}
