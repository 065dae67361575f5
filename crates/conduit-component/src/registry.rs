use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::contract::{Component, Execution, ExecutionParams};
use crate::definition::Definition;
use crate::error::ComponentError;

/// Components available to the orchestrator, keyed by definition ID.
///
/// Built once at startup and shared by reference.
#[derive(Clone, Default)]
pub struct ComponentRegistry {
  components: BTreeMap<String, Arc<dyn Component>>,
}

impl ComponentRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a component under its definition ID.
  pub fn register(&mut self, component: Arc<dyn Component>) -> Result<(), ComponentError> {
    let id = component.definition().id.clone();
    if self.components.contains_key(&id) {
      return Err(ComponentError::DuplicateComponent(id));
    }
    debug!(component = %id, "component_registered");
    self.components.insert(id, component);
    Ok(())
  }

  pub fn get(&self, id: &str) -> Option<&Arc<dyn Component>> {
    self.components.get(id)
  }

  pub fn definitions(&self) -> impl Iterator<Item = &Definition> {
    self.components.values().map(|c| c.definition())
  }

  pub fn len(&self) -> usize {
    self.components.len()
  }

  pub fn is_empty(&self) -> bool {
    self.components.is_empty()
  }

  /// Create an execution of component `id`.
  ///
  /// The task and setup are checked against the definition before the
  /// component sees them.
  pub fn create_execution(
    &self,
    id: &str,
    params: ExecutionParams,
  ) -> Result<Box<dyn Execution>, ComponentError> {
    let component = self
      .get(id)
      .ok_or_else(|| ComponentError::UnknownComponent(id.to_string()))?;
    let definition = component.definition();

    if !definition.declares(&params.task) {
      return Err(ComponentError::UnsupportedTask {
        component: definition.id.clone(),
        task: params.task,
      });
    }
    definition.validate_setup(&Value::Object(params.setup.clone()))?;

    component.create_execution(params)
  }
}

impl std::fmt::Debug for ComponentRegistry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ComponentRegistry")
      .field("components", &self.components.keys().collect::<Vec<_>>())
      .finish()
  }
}
