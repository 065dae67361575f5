//! The trigger API exposed to transports.
//!
//! [`TriggerService`] offers the three trigger modes over one
//! [`Orchestrator`]:
//!
//! - [`TriggerService::trigger_sync`]: run and return the result
//! - [`TriggerService::trigger_async`]: run in the background, poll with
//!   [`TriggerService::get_operation`]
//! - [`TriggerService::stream_trigger`]: run in the background and relay the
//!   trigger's events until `PipelineClosed`

use std::sync::Arc;
use std::time::Duration;

use conduit_component::{BatchExecutor, ComponentRegistry};
use conduit_config::Settings;
use conduit_memory::{Event, EventSubscription, MemoryStore};
use futures::{Stream, StreamExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::error::TriggerError;
use crate::operation::{Operation, OperationStore};
use crate::orchestrator::Orchestrator;
use crate::result::{TriggerOutput, TriggerRequest};
use crate::sse::format_event;

/// Expiry of abandoned state. `None` keeps state until it is consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retention {
  pub operation_ttl: Option<Duration>,
  pub memory_ttl: Option<Duration>,
  pub reap_interval: Duration,
}

impl Default for Retention {
  fn default() -> Self {
    Self {
      operation_ttl: None,
      memory_ttl: None,
      reap_interval: Duration::from_secs(30),
    }
  }
}

/// Entry point for triggering recipes.
pub struct TriggerService {
  orchestrator: Arc<Orchestrator>,
  operations: OperationStore,
  retention: Retention,
  shutdown: CancellationToken,
}

impl TriggerService {
  pub fn new(orchestrator: Orchestrator) -> Self {
    Self {
      orchestrator: Arc::new(orchestrator),
      operations: OperationStore::new(),
      retention: Retention::default(),
      shutdown: CancellationToken::new(),
    }
  }

  /// Build a service from runtime settings.
  pub fn from_settings(registry: ComponentRegistry, settings: &Settings) -> Self {
    let executor = match settings.job_concurrency {
      0 | 1 => BatchExecutor::sequential(),
      n => BatchExecutor::concurrent(n),
    };
    let orchestrator = Orchestrator::new(Arc::new(registry), MemoryStore::new(settings.event_buffer))
      .with_executor(executor);

    Self::new(orchestrator).with_retention(Retention {
      operation_ttl: settings.operation_ttl(),
      memory_ttl: settings.memory_ttl(),
      reap_interval: settings.reap_interval(),
    })
  }

  pub fn with_retention(mut self, retention: Retention) -> Self {
    self.retention = retention;
    self
  }

  pub fn orchestrator(&self) -> &Orchestrator {
    &self.orchestrator
  }

  pub fn memory_store(&self) -> &MemoryStore {
    self.orchestrator.memory_store()
  }

  pub fn operations(&self) -> &OperationStore {
    &self.operations
  }

  /// Run a trigger and wait for its result.
  #[instrument(name = "trigger_sync", skip(self, request))]
  pub async fn trigger_sync(&self, request: TriggerRequest) -> Result<TriggerOutput, TriggerError> {
    self
      .orchestrator
      .trigger(request, self.shutdown.child_token())
      .await
  }

  /// Start a trigger in the background and return its running operation.
  ///
  /// Structural errors are returned here, before anything runs.
  #[instrument(name = "trigger_async", skip(self, request))]
  pub fn trigger_async(&self, request: TriggerRequest) -> Result<Operation, TriggerError> {
    let trigger_id = uuid::Uuid::new_v4().to_string();
    let prepared = self.orchestrator.prepare(&trigger_id, request, false)?;
    let operation = self.operations.start(&trigger_id);

    let operations = self.operations.clone();
    let cancel = self.shutdown.child_token();
    tokio::spawn(async move {
      let run = tokio::spawn(prepared.run(cancel));
      let result = match run.await {
        Ok(result) => result,
        Err(e) => Err(TriggerError::Join {
          message: e.to_string(),
        }),
      };
      operations.finish(&trigger_id, result);
    });

    Ok(operation)
  }

  /// Current state of an asynchronous trigger.
  pub fn get_operation(&self, id: &str) -> Result<Operation, TriggerError> {
    self.operations.get(id)
  }

  /// Start a trigger and relay its events.
  ///
  /// The subscription is registered before the trigger starts, so no event
  /// is missed. `client` is the caller's connection token: cancelling it, or
  /// dropping the stream, tears down only the subscription. The trigger runs
  /// to completion and purges its memory either way.
  #[instrument(name = "stream_trigger", skip(self, request, client))]
  pub fn stream_trigger(
    &self,
    request: TriggerRequest,
    client: CancellationToken,
  ) -> Result<TriggerStream, TriggerError> {
    let trigger_id = uuid::Uuid::new_v4().to_string();
    let prepared = self.orchestrator.prepare(&trigger_id, request, true)?;
    let events = prepared.memory().listen_event(client)?;

    let handle = tokio::spawn(prepared.run(self.shutdown.child_token()));

    Ok(TriggerStream {
      trigger_id,
      events,
      handle,
    })
  }

  /// Periodically drop abandoned operations and workflow memory.
  ///
  /// Returns `None` when no TTL is configured. The task stops on
  /// [`TriggerService::shutdown`].
  pub fn spawn_reaper(&self) -> Option<JoinHandle<()>> {
    let Retention {
      operation_ttl,
      memory_ttl,
      reap_interval,
    } = self.retention;
    if operation_ttl.is_none() && memory_ttl.is_none() {
      return None;
    }

    let operations = self.operations.clone();
    let memory = self.memory_store().clone();
    let shutdown = self.shutdown.clone();
    info!(?operation_ttl, ?memory_ttl, ?reap_interval, "reaper_started");

    Some(tokio::spawn(async move {
      let mut interval = tokio::time::interval(reap_interval);
      loop {
        tokio::select! {
          _ = shutdown.cancelled() => break,
          _ = interval.tick() => {
            if let Some(ttl) = operation_ttl {
              operations.reap_finished(ttl);
            }
            if let Some(ttl) = memory_ttl {
              memory.reap_expired(ttl);
            }
          }
        }
      }
      debug!("reaper_stopped");
    }))
  }

  /// Cancel every running trigger and stop the reaper.
  pub fn shutdown(&self) {
    info!("trigger_service_shutdown");
    self.shutdown.cancel();
  }
}

impl std::fmt::Debug for TriggerService {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("TriggerService")
      .field("orchestrator", &self.orchestrator)
      .field("operations", &self.operations)
      .field("retention", &self.retention)
      .finish()
  }
}

/// Events of a streamed trigger, ending with `PipelineClosed`.
#[derive(Debug)]
pub struct TriggerStream {
  trigger_id: String,
  events: EventSubscription,
  handle: JoinHandle<Result<TriggerOutput, TriggerError>>,
}

impl TriggerStream {
  pub fn trigger_id(&self) -> &str {
    &self.trigger_id
  }

  pub async fn next(&mut self) -> Option<Event> {
    self.events.next().await
  }

  /// Stop relaying events. The trigger keeps running.
  pub fn disconnect(&mut self) {
    self.events.close();
  }

  /// Wait for the trigger itself to finish.
  pub async fn finish(self) -> Result<TriggerOutput, TriggerError> {
    drop(self.events);
    self.handle.await.map_err(|e| TriggerError::Join {
      message: e.to_string(),
    })?
  }

  /// The events as server-sent-event frames.
  pub fn into_sse(self) -> impl Stream<Item = String> + Send {
    self.events.into_stream().filter_map(|event| async move {
      match format_event(&event) {
        Ok(frame) => Some(frame),
        Err(e) => {
          tracing::warn!(error = %e, event = %event.name, "sse_frame_dropped");
          None
        }
      }
    })
  }
}
