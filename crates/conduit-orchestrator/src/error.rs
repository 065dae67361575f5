//! Trigger error types.

use conduit_component::ComponentError;
use conduit_memory::MemoryError;
use conduit_recipe::RecipeError;

/// Errors that end a whole trigger.
///
/// Per-record failures are never reported here; they are written to the
/// record's error slot and surface in [`crate::TriggerOutput::errors`].
#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
  /// The recipe is structurally invalid.
  #[error("invalid recipe: {0}")]
  Recipe(#[from] RecipeError),

  /// A component could not be bound to its task.
  #[error("component '{component_id}': {source}")]
  Component {
    component_id: String,
    #[source]
    source: ComponentError,
  },

  /// Workflow memory was missing, closed or purged mid-run.
  #[error("workflow memory: {0}")]
  Memory(#[from] MemoryError),

  /// The trigger was cancelled.
  #[error("trigger cancelled")]
  Cancelled,

  /// No operation with this ID is known.
  #[error("operation '{0}' not found")]
  OperationNotFound(String),

  /// The background task running the trigger panicked or was aborted.
  #[error("trigger task failed: {message}")]
  Join { message: String },
}

impl TriggerError {
  pub(crate) fn component(component_id: &str, source: ComponentError) -> Self {
    Self::Component {
      component_id: component_id.to_string(),
      source,
    }
  }

  /// Whether the error was caused by the recipe rather than by running it.
  pub fn is_structural(&self) -> bool {
    matches!(self, Self::Recipe(_) | Self::Component { .. })
  }
}
