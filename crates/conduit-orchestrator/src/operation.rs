//! Long-running operations for asynchronous triggers.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::TriggerError;
use crate::result::TriggerOutput;

/// State of an asynchronous trigger.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationState {
  Running,
  Completed { result: TriggerOutput },
  Failed { error: String },
}

/// Pollable handle of an asynchronous trigger. The ID is the trigger ID.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Operation {
  pub id: String,
  #[serde(flatten)]
  pub state: OperationState,
}

impl Operation {
  pub fn is_done(&self) -> bool {
    !matches!(self.state, OperationState::Running)
  }
}

struct Entry {
  state: OperationState,
  finished_at: Option<Instant>,
}

/// Operations by ID.
///
/// State only moves from `Running` to a terminal state, once; reads never
/// change it.
#[derive(Clone, Default)]
pub struct OperationStore {
  entries: Arc<RwLock<HashMap<String, Entry>>>,
}

impl OperationStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a running operation.
  pub fn start(&self, id: &str) -> Operation {
    let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
    entries.insert(
      id.to_string(),
      Entry {
        state: OperationState::Running,
        finished_at: None,
      },
    );
    Operation {
      id: id.to_string(),
      state: OperationState::Running,
    }
  }

  /// Move a running operation to its terminal state.
  ///
  /// Returns `false`, changing nothing, if the operation is unknown or
  /// already terminal.
  pub fn finish(&self, id: &str, result: Result<TriggerOutput, TriggerError>) -> bool {
    let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
    let Some(entry) = entries.get_mut(id) else {
      warn!(operation_id = %id, "operation_finished_after_removal");
      return false;
    };
    if entry.state != OperationState::Running {
      return false;
    }

    entry.state = match result {
      Ok(result) => OperationState::Completed { result },
      Err(e) => OperationState::Failed {
        error: e.to_string(),
      },
    };
    entry.finished_at = Some(Instant::now());
    debug!(operation_id = %id, "operation_finished");
    true
  }

  pub fn get(&self, id: &str) -> Result<Operation, TriggerError> {
    let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
    let entry = entries
      .get(id)
      .ok_or_else(|| TriggerError::OperationNotFound(id.to_string()))?;
    Ok(Operation {
      id: id.to_string(),
      state: entry.state.clone(),
    })
  }

  pub fn remove(&self, id: &str) -> bool {
    self
      .entries
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .remove(id)
      .is_some()
  }

  pub fn len(&self) -> usize {
    self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Drop terminal operations finished more than `ttl` ago. Running
  /// operations are never reaped.
  pub fn reap_finished(&self, ttl: Duration) -> usize {
    let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
    let before = entries.len();
    entries.retain(|_, entry| match entry.finished_at {
      Some(finished_at) => finished_at.elapsed() < ttl,
      None => true,
    });
    let reaped = before - entries.len();
    if reaped > 0 {
      info!(reaped, "operations_reaped");
    }
    reaped
  }
}

impl std::fmt::Debug for OperationStore {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("OperationStore")
      .field("operations", &self.len())
      .finish()
  }
}
