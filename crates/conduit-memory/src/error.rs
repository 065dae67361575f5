//! Workflow memory error types.

/// Errors that can occur when accessing workflow memory.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MemoryError {
  /// No memory exists for the trigger, or it was purged.
  #[error("workflow memory not found for trigger '{0}'")]
  NotFound(String),

  /// Memory for the trigger already exists.
  #[error("workflow memory already exists for trigger '{0}'")]
  AlreadyExists(String),

  /// The pipeline was closed; no further writes or events are accepted.
  #[error("workflow memory for trigger '{0}' is closed")]
  Closed(String),

  /// The batch index is outside the trigger's records.
  #[error("record {index} out of range for trigger '{trigger_id}' with {size} records")]
  RecordOutOfRange {
    trigger_id: String,
    index: usize,
    size: usize,
  },

  /// The key is not a valid memory path.
  #[error("invalid memory key '{key}': {message}")]
  InvalidKey { key: String, message: String },
}
