use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tracing::{debug, info};

use crate::error::MemoryError;
use crate::guard::PurgeGuard;
use crate::memory::WorkflowMemory;

/// Default capacity of each trigger's event channel.
pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// Process-wide map from trigger ID to its workflow memory.
///
/// Cloning is cheap; clones share the same map.
#[derive(Clone)]
pub struct MemoryStore {
  memories: Arc<RwLock<HashMap<String, Arc<WorkflowMemory>>>>,
  event_buffer: usize,
}

impl Default for MemoryStore {
  fn default() -> Self {
    Self::new(DEFAULT_EVENT_BUFFER)
  }
}

impl MemoryStore {
  pub fn new(event_buffer: usize) -> Self {
    Self {
      memories: Arc::new(RwLock::new(HashMap::new())),
      event_buffer,
    }
  }

  /// Create the memory for a new trigger.
  pub fn create(
    &self,
    trigger_id: &str,
    batch_size: usize,
    streaming: bool,
  ) -> Result<Arc<WorkflowMemory>, MemoryError> {
    let mut memories = self.memories.write().unwrap_or_else(PoisonError::into_inner);
    if memories.contains_key(trigger_id) {
      return Err(MemoryError::AlreadyExists(trigger_id.to_string()));
    }
    let memory = Arc::new(WorkflowMemory::new(
      trigger_id,
      batch_size,
      streaming,
      self.event_buffer,
    ));
    memories.insert(trigger_id.to_string(), memory.clone());
    debug!(trigger_id, batch_size, streaming, "memory_created");
    Ok(memory)
  }

  pub fn get(&self, trigger_id: &str) -> Result<Arc<WorkflowMemory>, MemoryError> {
    self
      .memories
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .get(trigger_id)
      .cloned()
      .ok_or_else(|| MemoryError::NotFound(trigger_id.to_string()))
  }

  /// Remove a trigger's memory and close its event channel.
  ///
  /// Returns whether anything was removed; purging twice is harmless.
  pub fn purge(&self, trigger_id: &str) -> bool {
    let removed = self
      .memories
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .remove(trigger_id);
    match removed {
      Some(memory) => {
        memory.purge();
        debug!(trigger_id, "memory_purged");
        true
      }
      None => false,
    }
  }

  /// A guard that purges `trigger_id` when dropped.
  pub fn purge_guard(&self, trigger_id: &str) -> PurgeGuard {
    PurgeGuard::new(self.clone(), trigger_id)
  }

  pub fn contains(&self, trigger_id: &str) -> bool {
    self
      .memories
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .contains_key(trigger_id)
  }

  pub fn len(&self) -> usize {
    self.memories.read().unwrap_or_else(PoisonError::into_inner).len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Purge memories older than `ttl`. Returns how many were removed.
  pub fn reap_expired(&self, ttl: Duration) -> usize {
    let expired: Vec<String> = self
      .memories
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .iter()
      .filter(|(_, memory)| memory.created_at().elapsed() >= ttl)
      .map(|(id, _)| id.clone())
      .collect();

    let reaped = expired.iter().filter(|id| self.purge(id)).count();
    if reaped > 0 {
      info!(reaped, "memory_reaped");
    }
    reaped
  }
}

impl std::fmt::Debug for MemoryStore {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("MemoryStore")
      .field("memories", &self.len())
      .field("event_buffer", &self.event_buffer)
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_create_twice_fails() {
    let store = MemoryStore::default();
    store.create("t1", 1, false).unwrap();
    assert_eq!(
      store.create("t1", 1, false).unwrap_err(),
      MemoryError::AlreadyExists("t1".to_string())
    );
  }

  #[test]
  fn test_purge_is_idempotent() {
    let store = MemoryStore::default();
    let memory = store.create("t1", 1, false).unwrap();
    assert!(store.purge("t1"));
    assert!(!store.purge("t1"));
    assert!(store.is_empty());

    assert_eq!(store.get("t1").unwrap_err(), MemoryError::NotFound("t1".to_string()));
    // Handles held across the purge see it too.
    assert!(matches!(memory.record(0), Err(MemoryError::NotFound(_))));
  }

  #[test]
  fn test_triggers_are_isolated() {
    let store = MemoryStore::default();
    let a = store.create("a", 1, false).unwrap();
    let b = store.create("b", 1, false).unwrap();
    a.set(0, "variable", json!({ "name": "Ada" })).unwrap();
    b.set(0, "variable", json!({ "name": "Grace" })).unwrap();

    assert_eq!(a.get(0, "variable.name").unwrap(), Some(json!("Ada")));
    assert_eq!(b.get(0, "variable.name").unwrap(), Some(json!("Grace")));

    store.purge("a");
    assert_eq!(b.get(0, "variable.name").unwrap(), Some(json!("Grace")));
  }

  #[test]
  fn test_reap_expired() {
    let store = MemoryStore::default();
    store.create("t1", 1, false).unwrap();
    assert_eq!(store.reap_expired(Duration::from_secs(3600)), 0);
    assert_eq!(store.reap_expired(Duration::ZERO), 1);
    assert!(!store.contains("t1"));
  }
}
