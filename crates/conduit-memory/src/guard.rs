use crate::store::MemoryStore;

/// Purges a trigger's memory when dropped.
///
/// Held for the whole trigger so memory is released on success, on error,
/// on cancellation and on panic alike.
#[must_use = "the memory is purged as soon as the guard is dropped"]
#[derive(Debug)]
pub struct PurgeGuard {
  store: MemoryStore,
  trigger_id: String,
}

impl PurgeGuard {
  pub(crate) fn new(store: MemoryStore, trigger_id: &str) -> Self {
    Self {
      store,
      trigger_id: trigger_id.to_string(),
    }
  }

  pub fn trigger_id(&self) -> &str {
    &self.trigger_id
  }
}

impl Drop for PurgeGuard {
  fn drop(&mut self) {
    self.store.purge(&self.trigger_id);
  }
}
